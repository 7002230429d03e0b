use glam::Vec2;

use crate::geo::Georef;

/// Terrain elevations in metres on a regular grid.
///
/// Cell `(col, row)` sits at world position `(col * cell_size, row * cell_size)`.
/// NaN cells are treated as no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightmap {
    /// Height values (row-major).
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    /// Metres per cell.
    pub cell_size: f32,
    pub georef: Option<Georef>,
}

impl Heightmap {
    pub fn new(width: usize, height: usize, cell_size: f32) -> Self {
        Self::filled(width, height, cell_size, 0.0)
    }

    pub fn filled(width: usize, height: usize, cell_size: f32, value: f32) -> Self {
        Self {
            data: vec![value; width * height],
            width,
            height,
            cell_size,
            georef: None,
        }
    }

    /// Build from a row-major sample vector; `None` if the length mismatches.
    pub fn from_data(width: usize, height: usize, cell_size: f32, data: Vec<f32>) -> Option<Self> {
        if data.len() != width * height || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            cell_size,
            georef: None,
        })
    }

    pub fn with_georef(mut self, georef: Georef) -> Self {
        self.georef = Some(georef);
        self
    }

    /// World-space size of the grid in metres.
    #[inline]
    pub fn extent_m(&self) -> Vec2 {
        Vec2::new(
            self.width.saturating_sub(1) as f32 * self.cell_size,
            self.height.saturating_sub(1) as f32 * self.cell_size,
        )
    }

    #[inline]
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col < self.width && row < self.height {
            Some(self.data[self.index(col, row)])
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        if col < self.width && row < self.height {
            let idx = self.index(col, row);
            self.data[idx] = value;
        }
    }

    #[inline]
    pub fn cell_to_world(&self, col: usize, row: usize) -> Vec2 {
        Vec2::new(col as f32 * self.cell_size, row as f32 * self.cell_size)
    }

    #[inline]
    pub fn world_to_cell(&self, p: Vec2) -> Vec2 {
        p / self.cell_size
    }

    #[inline]
    fn get_clamped(&self, col: i64, row: i64) -> f32 {
        let c = col.clamp(0, self.width as i64 - 1) as usize;
        let r = row.clamp(0, self.height as i64 - 1) as usize;
        self.data[r * self.width + c]
    }

    /// Bilinear sample at a world position. `None` outside the grid or when
    /// any contributing cell is no-data.
    pub fn sample(&self, p: Vec2) -> Option<f32> {
        if self.data.is_empty() || !p.is_finite() {
            return None;
        }

        let g = self.world_to_cell(p);
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        if g.x < 0.0 || g.y < 0.0 || g.x > max_x || g.y > max_y {
            return None;
        }

        let x0 = g.x.floor() as i64;
        let y0 = g.y.floor() as i64;
        let fx = g.x - x0 as f32;
        let fy = g.y - y0 as f32;

        let h00 = self.get_clamped(x0, y0);
        let h10 = self.get_clamped(x0 + 1, y0);
        let h01 = self.get_clamped(x0, y0 + 1);
        let h11 = self.get_clamped(x0 + 1, y0 + 1);

        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        let h = h0 * (1.0 - fy) + h1 * fy;

        h.is_finite().then_some(h)
    }
}
