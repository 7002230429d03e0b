//! Road network elevation harmonization and terrain baking.
//!
//! Road centerlines come in as [`RoadSource`]s, become splines with
//! cross-sections in a [`RoadNetwork`], get smoothed elevations, banking and
//! harmonized junctions, and are finally blended into a [`Heightmap`] in one
//! pass. [`TerrainPipeline`] runs the phases in their required order.

pub mod banking;
pub mod blend;
pub mod builder;
pub mod elevation;
pub mod error;
pub mod geo;
pub mod heightmap;
pub mod hints;
pub mod junction;
pub mod network;
pub mod paint;
pub mod params;
pub mod pipeline;
pub mod roundabout;
pub mod source;
pub mod spatial;
pub mod spline;

pub use banking::{BankingOrchestrator, BankingReport};
pub use blend::{BlendOutput, BlendStatistics, TerrainBlender};
pub use builder::{assign_priorities, BuildReport, NetworkBuilder};
pub use elevation::{ElevationReport, ElevationSmoother};
pub use error::{HintError, ParameterError, PipelineError, Result, SplineError};
pub use geo::{GeoBounds, Georef};
pub use heightmap::Heightmap;
pub use hints::{JunctionHint, JunctionHintSource, StaticHints};
pub use junction::{JunctionDetector, JunctionFilter, JunctionHarmonizer};
pub use network::{
    CrossSection, CrossSectionId, Junction, JunctionBankingBehavior, JunctionId, JunctionKind, JunctionOrigin,
    ParameterizedRoadSpline, RoadNetwork, SplineId,
};
pub use paint::MaterialMask;
pub use params::{BankingParameters, BlendFalloff, JunctionParameters, PipelineConfig, RoadClass, RoadParameters};
pub use pipeline::{PipelinePhase, PipelineReport, TerrainPipeline};
pub use roundabout::RoundaboutHarmonizer;
pub use source::{RoadSource, SourcePath};
pub use spline::{InterpolationMode, RoadSpline};
