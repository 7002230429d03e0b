//! Curvature-driven superelevation.
//!
//! Runs twice. `precalculate` (before junction harmonization) derives the
//! curvature of every cross-section and the bank angle it implies, so the
//! harmonizer sees banked surfaces. `finalize` (after harmonization) assigns
//! each cross-section near a junction a [`JunctionBankingBehavior`], blends
//! the bank accordingly and recomputes the edge elevations from the
//! harmonized centers.

use std::f32::consts::PI;

use glam::Vec2;
use log::{debug, info};
use serde::Serialize;

use crate::network::{
    CrossSectionId, JunctionBankingBehavior, JunctionKind, RoadNetwork, SplineId,
};
use crate::params::{BankingParameters, PipelineConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BankingReport {
    pub banked: usize,
    pub adapted: usize,
    pub suppressed: usize,
    pub max_bank_deg: f32,
}

/// Signed curvature (1/m) of the circle through three points; positive when
/// the path turns left.
pub fn curvature_at(prev: Vec2, cur: Vec2, next: Vec2) -> f32 {
    let a = cur - prev;
    let b = next - cur;
    let c = next - prev;
    let denom = a.length() * b.length() * c.length();
    if denom <= 1e-9 {
        return 0.0;
    }
    2.0 * a.perp_dot(b) / denom
}

/// Bank magnitude (radians, >= 0) for a curvature:
/// `max · min(1, strength · scale · |κ|)^falloff`, capped by the transverse
/// slope limit. Monotone non-decreasing in `|κ|`.
pub fn bank_magnitude(curvature: f32, banking: &BankingParameters, max_transverse_slope: f32) -> f32 {
    let max = banking.max_bank_angle_deg.to_radians();
    let demand = (banking.strength * banking.curvature_to_bank_scale * curvature.abs()).min(1.0);
    if demand <= 0.0 {
        return 0.0;
    }
    (max * demand.powf(banking.falloff)).min(max_transverse_slope.atan()).max(0.0)
}

/// Signed bank for a curvature: the inside of the curve is lowered.
#[inline]
fn natural_bank(curvature: f32, banking: &BankingParameters, max_transverse_slope: f32) -> f32 {
    -curvature.signum() * bank_magnitude(curvature, banking, max_transverse_slope)
}

/// Raised-cosine weight, 0 at `t = 0`, 1 at `t >= 1`.
#[inline]
pub fn cosine_weight(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    0.5 - 0.5 * (PI * t).cos()
}

pub struct BankingOrchestrator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> BankingOrchestrator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn precalculate(&self, network: &mut RoadNetwork) -> BankingReport {
        let ids: Vec<SplineId> = network.splines().iter().map(|s| s.id).collect();

        for id in ids {
            let sections = network.sections_of(id).to_vec();
            let positions: Vec<Vec2> = sections
                .iter()
                .map(|&c| network.cross_section(c).position)
                .collect();
            let curvatures = discrete_curvature(&positions);

            let road = network.spline(id);
            let enabled = road.banking_enabled();
            let banking = road.parameters.banking.clone();
            let transverse = road.parameters.max_transverse_slope;

            for (&c, kappa) in sections.iter().zip(curvatures) {
                let cs = network.cross_section_mut(c);
                cs.curvature = kappa;
                cs.bank_angle = if enabled && cs.target_elevation().is_some() {
                    natural_bank(kappa, &banking, transverse)
                } else {
                    0.0
                };
                cs.update_edges();
            }
        }

        let report = self.report(network);
        info!(
            "Banking pre-calculation: {} banked cross-sections, max {:.2}°",
            report.banked, report.max_bank_deg
        );
        report
    }

    pub fn finalize(&self, network: &mut RoadNetwork) -> BankingReport {
        let states = self.assign_behaviors(network);
        let max_ramp = self.config.max_ramp_angle_deg.to_radians();

        // Pass 1: every section that does not adapt to another road. Ramps
        // read these banks, so they are settled first.
        for (idx, &(behavior, distance)) in states.iter().enumerate() {
            if matches!(behavior, JunctionBankingBehavior::AdaptToHigherPriority { .. }) {
                continue;
            }
            let id = CrossSectionId(idx as u32);
            let natural = natural_bank_of(network, id);
            let w = self.zone_weight(network, id, distance);

            let bank = match behavior {
                JunctionBankingBehavior::SuppressBanking => natural * w,
                _ => natural,
            };

            let cs = network.cross_section_mut(id);
            cs.banking_behavior = behavior;
            cs.bank_angle = bank;
            cs.update_edges();
        }

        // Pass 2: secondary roads tilt towards the governing surface.
        for (idx, &(behavior, distance)) in states.iter().enumerate() {
            let JunctionBankingBehavior::AdaptToHigherPriority { primary } = behavior else {
                continue;
            };
            let id = CrossSectionId(idx as u32);
            let natural = natural_bank_of(network, id);
            let w = self.zone_weight(network, id, distance);
            let road = network.spline(network.cross_section(id).spline);
            let bank = if road.is_roundabout {
                0.0
            } else {
                // A ramp never tilts the road past its own bank limit.
                let cap = max_ramp.min(road.parameters.banking.max_bank_angle_deg.to_radians());
                let ramp = ramp_angle(network, id, primary, cap);
                ramp * (1.0 - w) + natural * w
            };

            let cs = network.cross_section_mut(id);
            cs.banking_behavior = behavior;
            cs.bank_angle = bank;
            cs.update_edges();
        }

        let report = self.report(network);
        info!(
            "Banking finalized: {} banked, {} adapting to higher priority, {} suppressed, max {:.2}°",
            report.banked, report.adapted, report.suppressed, report.max_bank_deg
        );
        report
    }

    /// 0 at the junction, 1 at the end of the spline's transition zone.
    fn zone_weight(&self, network: &RoadNetwork, id: CrossSectionId, distance: f32) -> f32 {
        let road = network.spline(network.cross_section(id).spline);
        let zone = road.parameters.banking.transition_length_m.max(f32::EPSILON);
        cosine_weight(distance / zone)
    }

    /// Runs the behaviour transition for every cross-section within the
    /// banking transition zone of a junction, once per foreign participant.
    /// Returns per cross-section the final state and the along-spline
    /// distance to the junction that set it.
    fn assign_behaviors(&self, network: &RoadNetwork) -> Vec<(JunctionBankingBehavior, f32)> {
        let mut states =
            vec![(JunctionBankingBehavior::Normal, f32::INFINITY); network.cross_sections().len()];

        for junction in network.junctions().iter().filter(|j| !j.excluded) {
            for own in &junction.participants {
                let road = network.spline(own.spline);
                let zone = road.parameters.banking.transition_length_m;
                let own_priority = effective_priority(network, junction.kind, own.spline);

                for other in junction.participants.iter().filter(|o| o.spline != own.spline) {
                    let other_priority = effective_priority(network, junction.kind, other.spline);

                    for &k in network.sections_of(own.spline) {
                        let d = network.along_distance(k, own.cross_section);
                        if d > zone {
                            continue;
                        }

                        let (current, current_d) = states[k.index()];
                        let demanded = JunctionBankingBehavior::demanded(
                            own_priority,
                            other_priority,
                            d,
                            zone,
                            other.cross_section,
                        );
                        let next = current.transition(own_priority, other_priority, d, zone, other.cross_section);

                        if next != current {
                            states[k.index()] = (next, d);
                        } else if std::mem::discriminant(&demanded) == std::mem::discriminant(&current)
                            && d < current_d
                        {
                            // Same state from a nearer junction: follow that one.
                            states[k.index()] = (demanded, d);
                        }
                    }
                }
            }
        }

        let adapting = states
            .iter()
            .filter(|(b, _)| matches!(b, JunctionBankingBehavior::AdaptToHigherPriority { .. }))
            .count();
        debug!("Junction banking states assigned; {} cross-sections adapting", adapting);

        states
    }

    fn report(&self, network: &RoadNetwork) -> BankingReport {
        let mut report = BankingReport::default();
        for cs in network.cross_sections() {
            if cs.bank_angle.abs() > 1e-6 {
                report.banked += 1;
            }
            match cs.banking_behavior {
                JunctionBankingBehavior::AdaptToHigherPriority { .. } => report.adapted += 1,
                JunctionBankingBehavior::SuppressBanking => report.suppressed += 1,
                _ => {}
            }
            report.max_bank_deg = report.max_bank_deg.max(cs.bank_angle.abs().to_degrees());
        }
        report
    }
}

/// Ring splines govern their roundabout junctions regardless of class.
fn effective_priority(network: &RoadNetwork, kind: JunctionKind, spline: SplineId) -> i32 {
    let road = network.spline(spline);
    if kind == JunctionKind::Roundabout && road.is_roundabout {
        i32::MAX
    } else {
        road.priority
    }
}

/// Curvature-driven bank of a section, zero where banking does not apply.
fn natural_bank_of(network: &RoadNetwork, id: CrossSectionId) -> f32 {
    let cs = network.cross_section(id);
    let road = network.spline(cs.spline);
    if !road.banking_enabled() || cs.target_elevation().is_none() {
        return 0.0;
    }
    natural_bank(cs.curvature, &road.parameters.banking, road.parameters.max_transverse_slope)
}

/// Tilt that lets the edge of `own` facing `primary` meet the primary road's
/// banked surface.
fn ramp_angle(network: &RoadNetwork, own: CrossSectionId, primary: CrossSectionId, max_ramp: f32) -> f32 {
    let cs = network.cross_section(own);
    let prim = network.cross_section(primary);

    let Some(own_elev) = cs.target_elevation() else {
        return 0.0;
    };
    let half_width = cs.half_width.max(f32::EPSILON);

    let side = if (prim.position - cs.position).dot(cs.normal) >= 0.0 { 1.0 } else { -1.0 };
    let edge_point = cs.position + cs.normal * side * half_width;
    let Some(surface) = prim.surface_elevation_at(edge_point) else {
        return 0.0;
    };

    let ramp = ((surface - own_elev) / half_width).clamp(-1.0, 1.0).asin();
    (side * ramp).clamp(-max_ramp, max_ramp)
}

/// Menger curvature at every interior point; ends copy their neighbour.
fn discrete_curvature(positions: &[Vec2]) -> Vec<f32> {
    let n = positions.len();
    let mut out = vec![0.0; n];
    if n < 3 {
        return out;
    }
    for i in 1..n - 1 {
        out[i] = curvature_at(positions[i - 1], positions[i], positions[i + 1]);
    }
    out[0] = out[1];
    out[n - 1] = out[n - 2];
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Junction, JunctionOrigin, JunctionParticipant, ParameterizedRoadSpline};
    use crate::params::RoadParameters;
    use crate::spline::{InterpolationMode, RoadSpline};

    fn banking() -> BankingParameters {
        BankingParameters {
            enabled: true,
            ..Default::default()
        }
    }

    fn add_road(net: &mut RoadNetwork, pts: &[Vec2], params: RoadParameters, priority: i32) -> SplineId {
        let spline = RoadSpline::new(pts, InterpolationMode::Smooth).unwrap();
        let samples = spline.resample(params.cross_section_interval_m);
        let id = net.add_spline(ParameterizedRoadSpline {
            id: SplineId(0),
            spline,
            parameters: params,
            material: "asphalt".into(),
            source_order: 0,
            priority,
            is_roundabout: false,
            is_bridge: false,
            is_tunnel: false,
        });
        net.add_cross_sections(id, &samples);
        for &c in net.sections_of(id).to_vec().iter() {
            net.cross_section_mut(c).set_profile_elevation(Some(50.0));
        }
        id
    }

    fn arc(radius: f32, sweep: f32, n: usize) -> Vec<Vec2> {
        (0..=n)
            .map(|i| {
                let a = i as f32 / n as f32 * sweep;
                Vec2::new(radius * a.sin(), radius * (1.0 - a.cos()))
            })
            .collect()
    }

    #[test]
    fn curvature_of_circle_points() {
        let r = 25.0;
        let k = curvature_at(
            Vec2::new(r, 0.0),
            Vec2::new(0.0, r),
            Vec2::new(-r, 0.0),
        );
        assert!((k - 1.0 / r).abs() < 1e-5);
        // Reversed direction turns right.
        let k = curvature_at(Vec2::new(-r, 0.0), Vec2::new(0.0, r), Vec2::new(r, 0.0));
        assert!((k + 1.0 / r).abs() < 1e-5);
    }

    #[test]
    fn magnitude_is_monotone_and_capped() {
        let b = banking();
        let cap = b.max_bank_angle_deg.to_radians();
        let mut last = 0.0;
        for i in 0..200 {
            let kappa = i as f32 * 0.0005;
            let m = bank_magnitude(kappa, &b, 1.0);
            assert!(m >= last - 1e-7, "not monotone at kappa {kappa}");
            assert!(m <= cap + 1e-7);
            last = m;
        }
        assert!((last - cap).abs() < 1e-6);

        // Transverse slope limit caps below the angle limit.
        assert!(bank_magnitude(1.0, &b, 0.05) <= 0.05f32.atan() + 1e-7);
    }

    #[test]
    fn left_curve_lowers_left_edge() {
        let mut net = RoadNetwork::new();
        let params = RoadParameters {
            banking: banking(),
            ..Default::default()
        };
        add_road(&mut net, &arc(60.0, 1.2, 24), params, 1);

        let config = PipelineConfig::default();
        BankingOrchestrator::new(&config).precalculate(&mut net);

        let mid = net.cross_section(net.sections_of(SplineId(0))[10]);
        assert!(mid.curvature > 0.0);
        assert!(mid.bank_angle < 0.0);
        assert!(mid.left_edge_elevation.unwrap() < mid.right_edge_elevation.unwrap());

        for cs in net.cross_sections() {
            let rise = cs.half_width * cs.bank_angle.sin();
            let center = cs.target_elevation().unwrap();
            assert!((cs.left_edge_elevation.unwrap() - (center + rise)).abs() < 1e-4);
            assert!((cs.right_edge_elevation.unwrap() - (center - rise)).abs() < 1e-4);
        }
    }

    /// A banked primary along the x axis and a secondary running parallel
    /// 7 m to its left that merges into it at x = 100. Returns the network,
    /// the two junction sections and the primary's bank.
    fn merge_into_banked_primary(secondary_params: RoadParameters) -> (RoadNetwork, CrossSectionId, CrossSectionId, f32) {
        let mut net = RoadNetwork::new();
        let primary_params = RoadParameters {
            road_width_m: 10.0,
            banking: banking(),
            ..Default::default()
        };
        let primary = add_road(&mut net, &[Vec2::new(0.0, 0.0), Vec2::new(200.0, 0.0)], primary_params, 10);
        let secondary = add_road(&mut net, &[Vec2::new(0.0, 7.0), Vec2::new(100.0, 7.0)], secondary_params, 5);

        // Pretend the primary is in a gentle right-hand curve: left edge up.
        for &c in net.sections_of(primary).to_vec().iter() {
            net.cross_section_mut(c).curvature = -0.01;
        }
        let primary_bank = bank_magnitude(-0.01, &banking(), 0.1);
        assert!(primary_bank > 0.0);

        let p_cs = net.nearest_section(primary, Vec2::new(100.0, 0.0)).unwrap();
        let s_cs = net.last_section(secondary).unwrap();
        let mut junction = Junction::new(Vec2::new(100.0, 3.5), JunctionKind::Endpoint, JunctionOrigin::Geometric);
        junction.participants.push(JunctionParticipant { cross_section: p_cs, spline: primary, at_endpoint: false });
        junction.participants.push(JunctionParticipant { cross_section: s_cs, spline: secondary, at_endpoint: true });
        net.replace_detected_junctions(vec![junction], 15.0);

        let config = PipelineConfig::default();
        BankingOrchestrator::new(&config).finalize(&mut net);
        (net, p_cs, s_cs, primary_bank)
    }

    #[test]
    fn secondary_ramp_meets_banked_primary() {
        let (net, p_cs, s_cs, primary_bank) = merge_into_banked_primary(RoadParameters::default());

        let s = net.cross_section(s_cs);
        assert_eq!(s.banking_behavior, JunctionBankingBehavior::AdaptToHigherPriority { primary: p_cs });

        // Primary is on the secondary's right; its right edge meets the
        // primary's surface 3 m left of the primary centerline.
        let expected = 50.0 + 3.0 * primary_bank.sin();
        assert!((s.right_edge_elevation.unwrap() - expected).abs() < 1e-3);

        // Governing road keeps its own bank.
        let p = net.cross_section(p_cs);
        assert_eq!(p.banking_behavior, JunctionBankingBehavior::MaintainBanking);
        assert!((p.bank_angle - primary_bank).abs() < 1e-6);
    }

    #[test]
    fn ramp_respects_secondary_bank_limit() {
        let limited = RoadParameters {
            banking: BankingParameters {
                max_bank_angle_deg: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let (net, _, s_cs, primary_bank) = merge_into_banked_primary(limited);
        let cap = 2.0f32.to_radians();

        // Meeting the primary edge would need more than the limit allows.
        assert!((0.75 * primary_bank.sin()).asin() > cap);

        let s = net.cross_section(s_cs);
        assert!(matches!(s.banking_behavior, JunctionBankingBehavior::AdaptToHigherPriority { .. }));
        assert!((s.bank_angle.abs() - cap).abs() < 1e-6, "bank {}", s.bank_angle.to_degrees());
        assert!(s.right_edge_elevation.unwrap() < 50.0 + 3.0 * primary_bank.sin());
    }
}
