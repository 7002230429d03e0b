//! Road sources as handed over by the extraction collaborators.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::SplineError;
use crate::geo::Georef;
use crate::params::RoadParameters;
use crate::spline::InterpolationMode;

/// One ordered centerline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "space", content = "points", rename_all = "snake_case")]
pub enum SourcePath {
    /// Local metres in the heightmap frame (raster-derived skeletons).
    Local(Vec<[f32; 2]>),
    /// `[lon, lat]` degrees, mapped through the heightmap's georeference.
    Geographic(Vec<[f64; 2]>),
}

impl SourcePath {
    pub fn len(&self) -> usize {
        match self {
            SourcePath::Local(p) => p.len(),
            SourcePath::Geographic(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points in the local metre frame.
    pub fn to_world(&self, georef: Option<&Georef>) -> Result<Vec<Vec2>, SplineError> {
        match self {
            SourcePath::Local(points) => Ok(points.iter().map(|&[x, y]| Vec2::new(x, y)).collect()),
            SourcePath::Geographic(points) => {
                let georef = georef.ok_or(SplineError::MissingGeoreference)?;
                Ok(points
                    .iter()
                    .map(|&[lon, lat]| georef.to_world(lon, lat))
                    .collect())
            }
        }
    }
}

/// All roads of one material, with that material's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadSource {
    pub material: String,
    #[serde(default)]
    pub interpolation: InterpolationMode,
    #[serde(default)]
    pub parameters: RoadParameters,
    pub paths: Vec<SourcePath>,
}
