//! Turns road sources into a [`RoadNetwork`]: one spline per path, a
//! network-wide priority per spline, and cross-sections at the configured
//! interval.

use std::cmp::Reverse;

use log::{debug, info, warn};

use crate::error::SplineError;
use crate::geo::Georef;
use crate::network::{ParameterizedRoadSpline, RoadNetwork, SplineId};
use crate::params::PipelineConfig;
use crate::source::RoadSource;
use crate::spline::RoadSpline;

/// A path that could not be turned into a spline.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPath {
    pub material: String,
    pub path_index: usize,
    pub error: SplineError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub splines_built: usize,
    pub roundabouts: usize,
    pub skipped: Vec<SkippedPath>,
}

pub struct NetworkBuilder<'a> {
    config: &'a PipelineConfig,
    georef: Option<&'a Georef>,
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            georef: None,
        }
    }

    /// Georeference used for `SourcePath::Geographic` inputs.
    pub fn with_georef(mut self, georef: Option<&'a Georef>) -> Self {
        self.georef = georef;
        self
    }

    /// Builds the network. Paths that fail are logged and skipped; sibling
    /// paths and sources continue.
    pub fn build(&self, sources: &[RoadSource]) -> (RoadNetwork, BuildReport) {
        let mut network = RoadNetwork::new();
        let mut report = BuildReport::default();

        for (order, source) in sources.iter().enumerate() {
            for (path_index, path) in source.paths.iter().enumerate() {
                let built = path
                    .to_world(self.georef)
                    .and_then(|pts| RoadSpline::new(&pts, source.interpolation));

                let spline = match built {
                    Ok(s) => s,
                    Err(error) => {
                        warn!(
                            "Skipping path {} of '{}' ({} pts): {}",
                            path_index,
                            source.material,
                            path.len(),
                            error
                        );
                        report.skipped.push(SkippedPath {
                            material: source.material.clone(),
                            path_index,
                            error,
                        });
                        continue;
                    }
                };

                let params = &source.parameters;
                let is_roundabout = params.is_roundabout || self.is_closed_loop(&spline);

                let id = network.add_spline(ParameterizedRoadSpline {
                    id: SplineId(0),
                    spline,
                    parameters: params.clone(),
                    material: source.material.clone(),
                    source_order: order,
                    priority: 0,
                    is_roundabout,
                    is_bridge: params.is_bridge,
                    is_tunnel: params.is_tunnel,
                });

                self.generate_cross_sections(&mut network, id);

                report.splines_built += 1;
                if is_roundabout {
                    report.roundabouts += 1;
                }
            }
        }

        assign_priorities(&mut network);

        info!(
            "Built network: {} splines ({} roundabouts), {} cross-sections, {} paths skipped",
            report.splines_built,
            report.roundabouts,
            network.cross_sections().len(),
            report.skipped.len()
        );

        (network, report)
    }

    /// Start and end within the closure tolerance, and the path at least
    /// three times longer than the gap between them. A straight stub has
    /// length equal to its gap and never qualifies.
    fn is_closed_loop(&self, spline: &RoadSpline) -> bool {
        let gap = spline.start().distance(spline.end());
        spline.is_closed(self.config.roundabout_closure_tolerance_m) && spline.length() >= 3.0 * gap
    }

    fn generate_cross_sections(&self, network: &mut RoadNetwork, id: SplineId) {
        let road = network.spline(id);
        let interval = road.parameters.cross_section_interval_m;
        let mut samples = road.spline.resample(interval);

        // On a ring the last frame duplicates the first one.
        if road.is_roundabout && samples.len() > 2 {
            let first = samples[0].position;
            if let Some(last) = samples.last() {
                if last.position.distance(first) < 0.5 * interval {
                    samples.pop();
                }
            }
        }

        debug!(
            "Spline {:?} ('{}'): length {:.1} m, {} cross-sections",
            id,
            road.material,
            road.spline.length(),
            samples.len()
        );

        network.add_cross_sections(id, &samples);
    }
}

/// Priority cascade: explicit road class, then width, then source order
/// (earlier sources win). Splines with identical keys share a priority;
/// larger values govern.
pub fn assign_priorities(network: &mut RoadNetwork) {
    let mut keyed: Vec<(SplineId, (u8, i64, Reverse<usize>))> = network
        .splines()
        .iter()
        .map(|s| {
            let class_rank = s.parameters.road_class.map(|c| c.rank()).unwrap_or(0);
            let width_mm = (s.parameters.road_width_m * 1000.0).round() as i64;
            (s.id, (class_rank, width_mm, Reverse(s.source_order)))
        })
        .collect();

    keyed.sort_by(|a, b| a.1.cmp(&b.1));

    let mut priority = 0i32;
    let mut previous = None;
    for (id, key) in keyed {
        if previous != Some(key) {
            priority += 1;
            previous = Some(key);
        }
        network.spline_mut(id).priority = priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{RoadClass, RoadParameters};
    use crate::source::SourcePath;
    use crate::spline::InterpolationMode;
    use std::f32::consts::TAU;

    fn source(material: &str, params: RoadParameters, paths: Vec<Vec<[f32; 2]>>) -> RoadSource {
        RoadSource {
            material: material.into(),
            interpolation: InterpolationMode::Smooth,
            parameters: params,
            paths: paths.into_iter().map(SourcePath::Local).collect(),
        }
    }

    fn ring(center: [f32; 2], radius: f32, gap_deg: f32) -> Vec<[f32; 2]> {
        let span = TAU - gap_deg.to_radians();
        (0..=48)
            .map(|i| {
                let a = i as f32 / 48.0 * span;
                [center[0] + radius * a.cos(), center[1] + radius * a.sin()]
            })
            .collect()
    }

    #[test]
    fn bad_paths_are_skipped_not_fatal() {
        let sources = vec![source(
            "asphalt",
            RoadParameters::default(),
            vec![vec![[0.0, 0.0]], vec![[0.0, 0.0], [100.0, 0.0]]],
        )];

        let config = PipelineConfig::default();
        let (net, report) = NetworkBuilder::new(&config).build(&sources);

        assert_eq!(net.splines().len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].error, SplineError::TooFewPoints(1));
        // 100 m at 2 m interval.
        assert_eq!(net.sections_of(SplineId(0)).len(), 51);
    }

    #[test]
    fn priority_cascade_class_then_width_then_order() {
        let wide = RoadParameters {
            road_width_m: 14.0,
            ..Default::default()
        };
        let narrow_primary = RoadParameters {
            road_width_m: 6.0,
            road_class: Some(RoadClass::Primary),
            ..Default::default()
        };
        let line = || vec![vec![[0.0, 0.0], [50.0, 0.0]]];

        let sources = vec![
            source("a", RoadParameters::default(), line()),
            source("b", RoadParameters::default(), line()),
            source("c", wide, line()),
            source("d", narrow_primary, line()),
        ];

        let config = PipelineConfig::default();
        let (net, _) = NetworkBuilder::new(&config).build(&sources);
        let p: Vec<i32> = net.splines().iter().map(|s| s.priority).collect();

        // Class hint beats width, width beats order, earlier source beats later.
        assert!(p[3] > p[2]);
        assert!(p[2] > p[0]);
        assert!(p[0] > p[1]);
    }

    #[test]
    fn closed_loop_is_roundabout_without_metadata() {
        let mut params = RoadParameters::default();
        params.banking.enabled = true;

        // 10° gap on a 30 m ring leaves ~5 m between the ends.
        let sources = vec![source("ring", params, vec![ring([200.0, 200.0], 30.0, 10.0)])];

        let config = PipelineConfig::default();
        let (net, report) = NetworkBuilder::new(&config).build(&sources);

        let road = &net.splines()[0];
        assert!(road.is_roundabout);
        assert!(!road.banking_enabled());
        assert_eq!(report.roundabouts, 1);
    }

    #[test]
    fn small_ring_is_roundabout() {
        let mut params = RoadParameters::default();
        params.banking.enabled = true;

        // r = 4 m with a 44° gap: ~3 m between the ends, ~22 m of road.
        let sources = vec![source("mini", params, vec![ring([100.0, 100.0], 4.0, 44.0)])];

        let config = PipelineConfig::default();
        let (net, report) = NetworkBuilder::new(&config).build(&sources);

        let road = &net.splines()[0];
        assert!(road.spline.length() < 2.0 * config.roundabout_closure_tolerance_m);
        assert!(road.is_roundabout);
        assert!(!road.banking_enabled());
        assert_eq!(report.roundabouts, 1);
    }

    #[test]
    fn short_stub_is_not_a_roundabout() {
        let sources = vec![source(
            "stub",
            RoadParameters::default(),
            vec![vec![[0.0, 0.0], [8.0, 0.0]]],
        )];
        let config = PipelineConfig::default();
        let (net, _) = NetworkBuilder::new(&config).build(&sources);
        assert!(!net.splines()[0].is_roundabout);
    }
}
