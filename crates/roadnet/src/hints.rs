//! External junction hints (e.g. intersection nodes from a map service).
//!
//! Hints only refine detection: a geometric cluster close to a hint takes the
//! hint's position. A source that fails is logged and detection carries on
//! without hints.

use glam::Vec2;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::HintError;
use crate::geo::{GeoBounds, Georef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionHint {
    pub lon: f64,
    pub lat: f64,
    /// Number of ways meeting at the node, if known.
    #[serde(default)]
    pub degree: Option<u8>,
}

pub trait JunctionHintSource: Send + Sync {
    fn fetch(&self, bounds: &GeoBounds) -> Result<Vec<JunctionHint>, HintError>;
}

/// In-memory hints.
#[derive(Debug, Clone, Default)]
pub struct StaticHints {
    hints: Vec<JunctionHint>,
}

impl StaticHints {
    pub fn new(hints: Vec<JunctionHint>) -> Self {
        Self { hints }
    }
}

impl JunctionHintSource for StaticHints {
    fn fetch(&self, bounds: &GeoBounds) -> Result<Vec<JunctionHint>, HintError> {
        Ok(self
            .hints
            .iter()
            .filter(|h| bounds.contains(h.lon, h.lat))
            .cloned()
            .collect())
    }
}

/// Margin around the heightmap footprint when requesting hints, metres.
const HINT_MARGIN_M: f64 = 50.0;

/// Fetches hints for the heightmap footprint and maps them into the local
/// frame. Any failure yields an empty list.
pub fn local_hint_positions(source: Option<&dyn JunctionHintSource>, georef: Option<&Georef>) -> Vec<Vec2> {
    let (Some(source), Some(georef)) = (source, georef) else {
        return Vec::new();
    };

    match source.fetch(&georef.bounds.padded(HINT_MARGIN_M)) {
        Ok(hints) => hints.iter().map(|h| georef.to_world(h.lon, h.lat)).collect(),
        Err(e) => {
            warn!("Junction hint source unavailable, continuing without hints: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offline;

    impl JunctionHintSource for Offline {
        fn fetch(&self, _bounds: &GeoBounds) -> Result<Vec<JunctionHint>, HintError> {
            Err(HintError::Unavailable("no network".into()))
        }
    }

    fn georef() -> Georef {
        Georef::new(
            GeoBounds {
                lon_min: 8.0,
                lat_min: 47.0,
                lon_max: 8.01,
                lat_max: 47.01,
            },
            Vec2::new(760.0, 1110.0),
        )
    }

    #[test]
    fn failing_source_degrades_to_empty() {
        let g = georef();
        assert!(local_hint_positions(Some(&Offline), Some(&g)).is_empty());
        assert!(local_hint_positions(None, Some(&g)).is_empty());
    }

    #[test]
    fn static_hints_are_clipped_to_bounds() {
        let hints = StaticHints::new(vec![
            JunctionHint { lon: 8.005, lat: 47.005, degree: Some(3) },
            JunctionHint { lon: 9.0, lat: 47.005, degree: None },
        ]);
        let g = georef();
        let pts = local_hint_positions(Some(&hints), Some(&g));
        assert_eq!(pts.len(), 1);
        assert!((pts[0].x - 380.0).abs() < 1.0);
        assert!((pts[0].y - 555.0).abs() < 1.0);
    }
}
