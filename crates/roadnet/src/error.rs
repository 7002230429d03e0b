use thiserror::Error;

use crate::pipeline::PipelinePhase;

/// Invalid per-source or network-wide parameters. Always fatal, raised before
/// any phase runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("{field} must be finite and > 0 (got {value})")]
    NotPositive { field: &'static str, value: f32 },

    #[error("{field} must be finite and >= 0 (got {value})")]
    Negative { field: &'static str, value: f32 },

    #[error("{field} must lie in [{min}, {max}] (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("elevation_sample_count must be odd and >= 1 (got {0})")]
    SampleCount(usize),

    #[error("material '{material}': {source}")]
    Material {
        material: String,
        #[source]
        source: Box<ParameterError>,
    },
}

/// Degenerate spline input. Only the offending path is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    #[error("path needs at least 2 distinct points, got {0}")]
    TooFewPoints(usize),

    #[error("path contains a non-finite coordinate at index {0}")]
    NonFinite(usize),

    #[error("path has zero arc length")]
    ZeroLength,

    #[error("geographic path supplied but the heightmap carries no georeference")]
    MissingGeoreference,
}

/// Failure of an external junction hint source. Never fatal: detection falls
/// back to geometry only.
#[derive(Debug, Error)]
pub enum HintError {
    #[error("hint source unavailable: {0}")]
    Unavailable(String),

    #[error("hint source returned malformed data: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step '{step}' requires phase {expected:?}, pipeline is at {actual:?}")]
    OutOfOrder {
        step: &'static str,
        expected: PipelinePhase,
        actual: PipelinePhase,
    },

    #[error("invalid parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("heightmap is empty or malformed: {0}")]
    Heightmap(String),

    #[error("no road source produced a usable spline")]
    EmptyNetwork,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
