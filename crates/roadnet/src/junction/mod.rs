//! Junction detection and elevation harmonization.

pub mod detect;
pub mod harmonize;

pub use detect::{DetectionReport, JunctionDetector};
pub use harmonize::{idw_consensus, HarmonizationReport, JunctionFilter, JunctionHarmonizer};
