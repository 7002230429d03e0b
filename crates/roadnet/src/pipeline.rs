//! The phase state machine that drives a network from road sources to a
//! baked heightmap.
//!
//! Each step checks that the previous one has run and fails with
//! [`PipelineError::OutOfOrder`] otherwise. Parameters are validated once,
//! in [`TerrainPipeline::new`], before any phase runs.

use log::info;
use serde::Serialize;

use crate::banking::{BankingOrchestrator, BankingReport};
use crate::blend::{BlendOutput, BlendStatistics, TerrainBlender};
use crate::builder::NetworkBuilder;
use crate::elevation::{ElevationReport, ElevationSmoother};
use crate::error::{ParameterError, PipelineError, Result};
use crate::heightmap::Heightmap;
use crate::hints::{local_hint_positions, JunctionHintSource};
use crate::junction::{DetectionReport, HarmonizationReport, JunctionDetector, JunctionFilter, JunctionHarmonizer};
use crate::network::RoadNetwork;
use crate::paint::{paint_materials, MaterialMask};
use crate::params::PipelineConfig;
use crate::roundabout::{RoundaboutHarmonizer, RoundaboutReport};
use crate::source::RoadSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelinePhase {
    Created,
    NetworkBuilt,
    ElevationComputed,
    BankingPrecalculated,
    JunctionsHarmonized,
    BankingFinalized,
    Blended,
    MaterialsPainted,
}

/// Summaries of every phase that has run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub splines: usize,
    pub roundabouts: usize,
    pub skipped_paths: usize,
    pub cross_sections: usize,
    pub elevation: ElevationReport,
    pub banking_precalculated: BankingReport,
    pub roundabout_harmonization: RoundaboutReport,
    pub detection: DetectionReport,
    pub harmonization: HarmonizationReport,
    pub cross_material_harmonization: HarmonizationReport,
    pub banking: BankingReport,
    pub blend: BlendStatistics,
}

pub struct TerrainPipeline {
    config: PipelineConfig,
    sources: Vec<RoadSource>,
    terrain: Heightmap,
    hints: Option<Box<dyn JunctionHintSource>>,
    network: RoadNetwork,
    phase: PipelinePhase,
    report: PipelineReport,
    blended: Option<BlendOutput>,
    masks: Vec<MaterialMask>,
}

impl TerrainPipeline {
    /// Validates everything up front; nothing runs yet.
    pub fn new(config: PipelineConfig, terrain: Heightmap, sources: Vec<RoadSource>) -> Result<Self> {
        config.validate()?;
        for source in &sources {
            source.parameters.validate().map_err(|e| ParameterError::Material {
                material: source.material.clone(),
                source: Box::new(e),
            })?;
        }

        if terrain.width == 0 || terrain.height == 0 {
            return Err(PipelineError::Heightmap(format!(
                "{}x{} grid",
                terrain.width, terrain.height
            )));
        }
        if !(terrain.cell_size.is_finite() && terrain.cell_size > 0.0) {
            return Err(PipelineError::Heightmap(format!("cell size {}", terrain.cell_size)));
        }
        if terrain.data.len() != terrain.width * terrain.height {
            return Err(PipelineError::Heightmap(format!(
                "{} samples for a {}x{} grid",
                terrain.data.len(),
                terrain.width,
                terrain.height
            )));
        }

        Ok(Self {
            config,
            sources,
            terrain,
            hints: None,
            network: RoadNetwork::new(),
            phase: PipelinePhase::Created,
            report: PipelineReport::default(),
            blended: None,
            masks: Vec::new(),
        })
    }

    pub fn with_hints(mut self, hints: Box<dyn JunctionHintSource>) -> Self {
        self.hints = Some(hints);
        self
    }

    #[inline]
    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    #[inline]
    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    #[inline]
    pub fn terrain(&self) -> &Heightmap {
        &self.terrain
    }

    #[inline]
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Present once `blend_terrain` has run.
    #[inline]
    pub fn blended(&self) -> Option<&BlendOutput> {
        self.blended.as_ref()
    }

    #[inline]
    pub fn masks(&self) -> &[MaterialMask] {
        &self.masks
    }

    fn require(&self, step: &'static str, expected: PipelinePhase) -> Result<()> {
        if self.phase != expected {
            return Err(PipelineError::OutOfOrder {
                step,
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    pub fn build_network(&mut self) -> Result<()> {
        self.require("build_network", PipelinePhase::Created)?;

        let (network, build) = NetworkBuilder::new(&self.config)
            .with_georef(self.terrain.georef.as_ref())
            .build(&self.sources);
        if network.splines().is_empty() {
            return Err(PipelineError::EmptyNetwork);
        }

        self.report.splines = build.splines_built;
        self.report.roundabouts = build.roundabouts;
        self.report.skipped_paths = build.skipped.len();
        self.report.cross_sections = network.cross_sections().len();
        self.network = network;
        self.phase = PipelinePhase::NetworkBuilt;
        Ok(())
    }

    pub fn compute_elevations(&mut self) -> Result<()> {
        self.require("compute_elevations", PipelinePhase::NetworkBuilt)?;
        self.report.elevation = ElevationSmoother::new(&self.terrain).compute_network(&mut self.network);
        self.phase = PipelinePhase::ElevationComputed;
        Ok(())
    }

    pub fn precalculate_banking(&mut self) -> Result<()> {
        self.require("precalculate_banking", PipelinePhase::ElevationComputed)?;
        self.report.banking_precalculated = BankingOrchestrator::new(&self.config).precalculate(&mut self.network);
        self.phase = PipelinePhase::BankingPrecalculated;
        Ok(())
    }

    /// Roundabouts, then detection (roundabout junctions preserved), then
    /// same-material and cross-material harmonization.
    pub fn harmonize_junctions(&mut self) -> Result<()> {
        self.require("harmonize_junctions", PipelinePhase::BankingPrecalculated)?;

        self.network.restore_baselines();
        self.report.roundabout_harmonization = RoundaboutHarmonizer::harmonize(&mut self.network);

        let hints = local_hint_positions(self.hints.as_deref(), self.terrain.georef.as_ref());
        self.report.detection = JunctionDetector::new(&self.config)
            .with_hints(hints)
            .detect_into(&mut self.network);

        let harmonizer = JunctionHarmonizer::new(&self.config);
        self.report.harmonization = harmonizer.harmonize(&mut self.network, JunctionFilter::SameMaterialOnly);
        if self.config.enable_cross_material_harmonization {
            self.report.cross_material_harmonization =
                harmonizer.harmonize(&mut self.network, JunctionFilter::CrossMaterialOnly);
        }

        self.phase = PipelinePhase::JunctionsHarmonized;
        Ok(())
    }

    pub fn finalize_banking(&mut self) -> Result<()> {
        self.require("finalize_banking", PipelinePhase::JunctionsHarmonized)?;
        self.report.banking = BankingOrchestrator::new(&self.config).finalize(&mut self.network);
        self.phase = PipelinePhase::BankingFinalized;
        Ok(())
    }

    pub fn blend_terrain(&mut self) -> Result<()> {
        self.require("blend_terrain", PipelinePhase::BankingFinalized)?;
        let output = TerrainBlender::new(self.config.terrain_falloff).blend(&self.network, &self.terrain);
        self.report.blend = output.statistics;
        self.blended = Some(output);
        self.phase = PipelinePhase::Blended;
        Ok(())
    }

    pub fn paint_materials(&mut self) -> Result<()> {
        self.require("paint_materials", PipelinePhase::Blended)?;
        self.masks = paint_materials(&self.network, &self.terrain);
        self.phase = PipelinePhase::MaterialsPainted;
        Ok(())
    }

    /// Runs every remaining phase in order.
    pub fn run_to_completion(&mut self) -> Result<()> {
        let steps: [(PipelinePhase, fn(&mut Self) -> Result<()>); 7] = [
            (PipelinePhase::Created, Self::build_network),
            (PipelinePhase::NetworkBuilt, Self::compute_elevations),
            (PipelinePhase::ElevationComputed, Self::precalculate_banking),
            (PipelinePhase::BankingPrecalculated, Self::harmonize_junctions),
            (PipelinePhase::JunctionsHarmonized, Self::finalize_banking),
            (PipelinePhase::BankingFinalized, Self::blend_terrain),
            (PipelinePhase::Blended, Self::paint_materials),
        ];

        for (from, step) in steps {
            if self.phase == from {
                step(self)?;
            }
        }

        info!(
            "Pipeline complete: {} splines, {} junctions, {} cells modified",
            self.network.splines().len(),
            self.network.junctions().len(),
            self.report.blend.pixels_modified
        );
        Ok(())
    }

    /// The finished network and outputs.
    pub fn into_parts(self) -> (RoadNetwork, Option<BlendOutput>, Vec<MaterialMask>, PipelineReport) {
        (self.network, self.blended, self.masks, self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RoadParameters;
    use crate::source::SourcePath;
    use crate::spline::InterpolationMode;

    fn sources() -> Vec<RoadSource> {
        vec![RoadSource {
            material: "asphalt".into(),
            interpolation: InterpolationMode::Linear,
            parameters: RoadParameters::default(),
            paths: vec![SourcePath::Local(vec![[5.0, 32.0], [120.0, 32.0]])],
        }]
    }

    #[test]
    fn phases_must_run_in_order() {
        let terrain = Heightmap::filled(128, 64, 1.0, 4.0);
        let mut p = TerrainPipeline::new(PipelineConfig::default(), terrain, sources()).unwrap();

        let err = p.compute_elevations().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                step: "compute_elevations",
                expected: PipelinePhase::NetworkBuilt,
                actual: PipelinePhase::Created
            }
        ));

        p.build_network().unwrap();
        assert!(p.build_network().is_err());
        p.run_to_completion().unwrap();
        assert_eq!(p.phase(), PipelinePhase::MaterialsPainted);
        assert!(p.blended().is_some());
        assert_eq!(p.masks().len(), 1);
    }

    #[test]
    fn invalid_parameters_fail_before_any_phase() {
        let mut bad = sources();
        bad[0].parameters.road_width_m = -3.0;
        let terrain = Heightmap::filled(16, 16, 1.0, 0.0);
        let err = TerrainPipeline::new(PipelineConfig::default(), terrain, bad).err().unwrap();
        assert!(matches!(err, PipelineError::Parameters(ParameterError::Material { .. })));
    }

    #[test]
    fn no_usable_path_is_an_empty_network() {
        let mut degenerate = sources();
        degenerate[0].paths = vec![SourcePath::Local(vec![[1.0, 1.0]])];
        let terrain = Heightmap::filled(16, 16, 1.0, 0.0);
        let mut p = TerrainPipeline::new(PipelineConfig::default(), terrain, degenerate).unwrap();
        assert!(matches!(p.build_network(), Err(PipelineError::EmptyNetwork)));
    }
}
