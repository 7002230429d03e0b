//! Per-material road masks.

use std::collections::BTreeMap;

use glam::Vec2;
use log::info;

use crate::heightmap::Heightmap;
use crate::network::RoadNetwork;

/// 8-bit coverage mask, one byte per heightmap cell, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialMask {
    pub material: String,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl MaterialMask {
    pub fn new(material: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            material: material.into(),
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<u8> {
        (col < self.width && row < self.height).then(|| self.data[row * self.width + col])
    }

    /// Keeps the stronger coverage.
    #[inline]
    fn paint(&mut self, col: usize, row: usize, value: u8) {
        let idx = row * self.width + col;
        if value > self.data[idx] {
            self.data[idx] = value;
        }
    }

    /// Paints a polyline given in cell coordinates, `radius` cells around
    /// it at full coverage and one more cell fading out.
    pub fn rasterize_polyline(&mut self, line: &[Vec2], radius: f32) {
        if line.len() < 2 || self.width == 0 || self.height == 0 {
            return;
        }

        let radius = radius.max(0.5);
        let outer = radius + 1.0;
        let (max_c, max_r) = (self.width as i64 - 1, self.height as i64 - 1);

        for segment in line.windows(2) {
            let (a, b) = (segment[0], segment[1]);

            // Bounding box of the segment grown by the outer radius, clamped
            // to the mask.
            let min_c = ((a.x.min(b.x) - outer).floor() as i64).clamp(0, max_c);
            let max_cc = ((a.x.max(b.x) + outer).ceil() as i64).clamp(0, max_c);
            let min_r = ((a.y.min(b.y) - outer).floor() as i64).clamp(0, max_r);
            let max_rr = ((a.y.max(b.y) + outer).ceil() as i64).clamp(0, max_r);

            let ab = b - a;
            let denom = ab.length_squared() + 1e-12;

            for row in min_r..=max_rr {
                for col in min_c..=max_cc {
                    let p = Vec2::new(col as f32, row as f32);
                    let t = ((p - a).dot(ab) / denom).clamp(0.0, 1.0);
                    let d = p.distance(a + ab * t);

                    let value = if d <= radius {
                        255
                    } else if d < outer {
                        (255.0 * (outer - d)).round() as u8
                    } else {
                        continue;
                    };
                    self.paint(col as usize, row as usize, value);
                }
            }
        }
    }
}

/// One mask per material, in material-name order. Roads flagged as excluded
/// structures are left out.
pub fn paint_materials(network: &RoadNetwork, heightmap: &Heightmap) -> Vec<MaterialMask> {
    let mut masks: BTreeMap<&str, MaterialMask> = BTreeMap::new();
    let cell = heightmap.cell_size.max(f32::EPSILON);

    for road in network.splines() {
        let mask = masks
            .entry(road.material.as_str())
            .or_insert_with(|| MaterialMask::new(road.material.clone(), heightmap.width, heightmap.height));
        if road.is_excluded_structure() {
            continue;
        }

        let mut line: Vec<Vec2> = network
            .sections_of(road.id)
            .iter()
            .map(|&c| network.cross_section(c).position / cell)
            .collect();
        if road.is_roundabout {
            if let Some(&first) = line.first() {
                line.push(first);
            }
        }

        mask.rasterize_polyline(&line, road.half_width() / cell);
    }

    let masks: Vec<MaterialMask> = masks.into_values().collect();
    info!(
        "Painted {} material masks: {}",
        masks.len(),
        masks
            .iter()
            .map(|m| format!("{} ({} cells)", m.material, m.data.iter().filter(|&&v| v == 255).count()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_core_with_soft_rim() {
        let mut mask = MaterialMask::new("asphalt", 20, 20);
        mask.rasterize_polyline(&[Vec2::new(2.0, 10.0), Vec2::new(17.0, 10.0)], 1.5);

        assert_eq!(mask.get(10, 10), Some(255));
        assert_eq!(mask.get(10, 11), Some(255));
        assert_eq!(mask.get(10, 12), Some(128));
        assert_eq!(mask.get(10, 13), Some(0));
        assert_eq!(mask.get(10, 5), Some(0));
    }

    #[test]
    fn painting_keeps_the_stronger_value() {
        let mut mask = MaterialMask::new("gravel", 10, 10);
        mask.rasterize_polyline(&[Vec2::new(0.0, 5.0), Vec2::new(9.0, 5.0)], 1.0);
        // Its rim reaches row 6 with partial coverage only.
        mask.rasterize_polyline(&[Vec2::new(0.0, 7.2), Vec2::new(9.0, 7.2)], 0.5);
        assert_eq!(mask.get(4, 6), Some(255));
        assert_eq!(mask.get(4, 7), Some(255));
        let rim = mask.get(4, 8).unwrap();
        assert!(rim > 0 && rim < 255);
    }
}
