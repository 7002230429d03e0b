//! Elevation harmonization at junctions.
//!
//! The highest-priority participants of a junction are authoritative and keep
//! their elevation. Every other participant takes the authoritative road
//! surface at its junction cross-section and blends back to its own profile
//! over the blend distance with a raised cosine. When all participants share
//! one priority they meet at the inverse-distance-weighted consensus.
//!
//! Blends always start from each section's harmonization baseline, so a
//! second pass reproduces the first.

use glam::Vec2;
use log::{debug, info};
use serde::Serialize;
use smallvec::SmallVec;

use crate::banking::cosine_weight;
use crate::network::{JunctionId, JunctionKind, JunctionParticipant, RoadNetwork};
use crate::params::PipelineConfig;

/// Which junctions a pass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionFilter {
    All,
    SameMaterialOnly,
    /// Junctions between roads of different materials.
    CrossMaterialOnly,
}

impl JunctionFilter {
    #[inline]
    fn accepts(self, cross_material: bool) -> bool {
        match self {
            JunctionFilter::All => true,
            JunctionFilter::SameMaterialOnly => !cross_material,
            JunctionFilter::CrossMaterialOnly => cross_material,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HarmonizationReport {
    pub junctions: usize,
    pub sections_adjusted: usize,
    /// Largest |new − baseline| written, metres.
    pub max_adjustment_m: f32,
}

impl HarmonizationReport {
    pub fn merge(&mut self, other: HarmonizationReport) {
        self.junctions += other.junctions;
        self.sections_adjusted += other.sections_adjusted;
        self.max_adjustment_m = self.max_adjustment_m.max(other.max_adjustment_m);
    }
}

/// Σ wᵢeᵢ / Σ wᵢ with wᵢ = 1/(dᵢ + ε). `None` when no sample is usable.
pub fn idw_consensus(samples: &[(f32, f32)], epsilon: f32) -> Option<f32> {
    let (num, den) = samples
        .iter()
        .filter(|(d, e)| d.is_finite() && e.is_finite())
        .fold((0.0f64, 0.0f64), |(num, den), &(d, e)| {
            let w = 1.0 / (d.max(0.0) as f64 + epsilon as f64);
            (num + w * e as f64, den + w)
        });
    (den > 0.0).then(|| (num / den) as f32)
}

pub struct JunctionHarmonizer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> JunctionHarmonizer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn harmonize(&self, network: &mut RoadNetwork, filter: JunctionFilter) -> HarmonizationReport {
        let mut report = HarmonizationReport::default();

        // Governing junctions first, so lower ones read settled surfaces.
        let mut order: Vec<(i32, JunctionId)> = network
            .junctions()
            .iter()
            .filter(|j| !j.excluded && j.kind != JunctionKind::Roundabout && filter.accepts(j.cross_material))
            .map(|j| {
                let top = j
                    .participants
                    .iter()
                    .map(|p| network.spline(p.spline).priority)
                    .max()
                    .unwrap_or(i32::MIN);
                (top, j.id)
            })
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, id) in order {
            let junction = network.junction(id);
            let participants = junction.participants.clone();
            let position = junction.position;

            let targets = self.participant_targets(network, position, &participants);
            for (participant, target) in participants.iter().zip(targets) {
                let Some(target) = target else {
                    continue;
                };
                self.blend_spline(network, participant, target, &mut report);
            }
            report.junctions += 1;
        }

        info!(
            "Junction harmonization ({:?}): {} junctions, {} cross-sections adjusted, max adjustment {:.2} m",
            filter, report.junctions, report.sections_adjusted, report.max_adjustment_m
        );
        report
    }

    /// Elevation each participant's junction section should reach; `None`
    /// for authoritative participants and those that opted out.
    fn participant_targets(
        &self,
        network: &mut RoadNetwork,
        position: Vec2,
        participants: &[JunctionParticipant],
    ) -> SmallVec<[Option<f32>; 4]> {
        let eps = self.config.consensus_epsilon_m;
        for p in participants {
            network.cross_section_mut(p.cross_section).baseline_elevation();
        }
        let network: &RoadNetwork = network;

        let priority = |p: &JunctionParticipant| network.spline(p.spline).priority;
        let top = participants.iter().map(priority).max().unwrap_or(i32::MIN);
        let all_equal = participants.iter().all(|p| priority(p) == top);

        if all_equal {
            let samples: SmallVec<[(f32, f32); 4]> = participants
                .iter()
                .filter_map(|p| {
                    let cs = network.cross_section(p.cross_section);
                    Some((cs.position.distance(position), cs.harmonization_baseline?))
                })
                .collect();
            let consensus = idw_consensus(&samples, eps);
            return participants
                .iter()
                .map(|p| consensus.filter(|_| harmonizes(network, p)))
                .collect();
        }

        let authoritative: SmallVec<[&JunctionParticipant; 4]> =
            participants.iter().filter(|p| priority(p) == top).collect();

        participants
            .iter()
            .map(|p| {
                if priority(p) == top || !harmonizes(network, p) {
                    return None;
                }
                let own = network.cross_section(p.cross_section).position;
                let samples: SmallVec<[(f32, f32); 4]> = authoritative
                    .iter()
                    .filter_map(|a| {
                        let cs = network.cross_section(a.cross_section);
                        Some((cs.position.distance(own), cs.surface_elevation_at(own)?))
                    })
                    .collect();
                idw_consensus(&samples, eps)
            })
            .collect()
    }

    fn blend_spline(
        &self,
        network: &mut RoadNetwork,
        participant: &JunctionParticipant,
        target: f32,
        report: &mut HarmonizationReport,
    ) {
        let blend = network
            .spline(participant.spline)
            .parameters
            .junction
            .blend_distance_m
            .max(f32::EPSILON);
        let sections = network.sections_of(participant.spline).to_vec();

        let mut adjusted = 0usize;
        for k in sections {
            let d = network.along_distance(k, participant.cross_section);
            if d >= blend {
                continue;
            }
            let t = d / blend;
            let cs = network.cross_section_mut(k);
            let Some(base) = cs.baseline_elevation() else {
                continue;
            };

            let w = cosine_weight(t);
            let value = target * (1.0 - w) + base * w;
            if cs.apply_harmonized(value, t) {
                adjusted += 1;
                report.max_adjustment_m = report.max_adjustment_m.max((value - base).abs());
            }
        }

        report.sections_adjusted += adjusted;
        debug!(
            "Spline {:?}: {} cross-sections blended towards {:.2} m",
            participant.spline, adjusted, target
        );
    }
}

#[inline]
fn harmonizes(network: &RoadNetwork, p: &JunctionParticipant) -> bool {
    network.spline(p.spline).parameters.junction.enable_harmonization
}
