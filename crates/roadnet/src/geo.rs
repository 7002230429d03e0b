//! Geographic extent of a heightmap and the lon/lat ↔ local-metre mapping.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// CRS:84 bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl GeoBounds {
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.lon_min + self.lon_max),
            0.5 * (self.lat_min + self.lat_max),
        )
    }

    #[inline]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.lon_min..=self.lon_max).contains(&lon) && (self.lat_min..=self.lat_max).contains(&lat)
    }

    /// Grow the box by `pad_m` metres on every side.
    pub fn padded(&self, pad_m: f64) -> Self {
        let (_, lat_c) = self.center();
        let (pad_lat, pad_lon) = pad_degrees_for(lat_c, pad_m);
        Self {
            lon_min: self.lon_min - pad_lon,
            lat_min: self.lat_min - pad_lat,
            lon_max: self.lon_max + pad_lon,
            lat_max: self.lat_max + pad_lat,
        }
    }
}

/// Convert padding (metres) to degree offsets for latitude and longitude.
#[inline]
pub fn pad_degrees_for(latitude_deg: f64, pad_meters: f64) -> (f64, f64) {
    const METERS_PER_DEG_LAT: f64 = 110_574.0;
    const METERS_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

    let meters_per_deg_lon =
        METERS_PER_DEG_LON_EQUATOR * latitude_deg.to_radians().cos().abs().max(1e-6);

    (pad_meters / METERS_PER_DEG_LAT, pad_meters / meters_per_deg_lon)
}

/// Linear mapping between a geographic extent and the heightmap's local
/// metre frame. Row 0 of the heightmap is the northern edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georef {
    pub bounds: GeoBounds,
    /// Local extent in metres covered by `bounds`.
    pub extent_m: Vec2,
}

impl Georef {
    pub fn new(bounds: GeoBounds, extent_m: Vec2) -> Self {
        Self { bounds, extent_m }
    }

    pub fn to_world(&self, lon: f64, lat: f64) -> Vec2 {
        const EPS: f64 = 1e-12;
        let lon_range = (self.bounds.lon_max - self.bounds.lon_min).max(EPS);
        let lat_range = (self.bounds.lat_max - self.bounds.lat_min).max(EPS);

        let u = (lon - self.bounds.lon_min) / lon_range;
        let v = (self.bounds.lat_max - lat) / lat_range;

        Vec2::new(
            (u * self.extent_m.x as f64) as f32,
            (v * self.extent_m.y as f64) as f32,
        )
    }

    pub fn to_geo(&self, p: Vec2) -> (f64, f64) {
        let u = p.x as f64 / (self.extent_m.x as f64).max(1e-9);
        let v = p.y as f64 / (self.extent_m.y as f64).max(1e-9);
        (
            self.bounds.lon_min + u * (self.bounds.lon_max - self.bounds.lon_min),
            self.bounds.lat_max - v * (self.bounds.lat_max - self.bounds.lat_min),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn georef() -> Georef {
        Georef::new(
            GeoBounds {
                lon_min: 8.0,
                lat_min: 47.0,
                lon_max: 8.01,
                lat_max: 47.01,
            },
            Vec2::new(1000.0, 1000.0),
        )
    }

    #[test]
    fn corners_map_to_extent() {
        let g = georef();
        assert!(g.to_world(8.0, 47.01).length() < 1e-3);
        assert!((g.to_world(8.01, 47.0) - Vec2::new(1000.0, 1000.0)).length() < 1e-2);
    }

    #[test]
    fn to_geo_inverts_to_world() {
        let g = georef();
        let p = Vec2::new(250.0, 730.0);
        let (lon, lat) = g.to_geo(p);
        assert!((g.to_world(lon, lat) - p).length() < 1e-2);
    }

    #[test]
    fn padding_grows_box() {
        let b = georef().bounds.padded(100.0);
        assert!(b.lon_min < 8.0 && b.lat_max > 47.01);
    }
}
