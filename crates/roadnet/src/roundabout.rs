//! Roundabouts: one flat ring elevation, connecting roads eased onto it.

use log::{debug, info};
use serde::Serialize;
use smallvec::smallvec;

use crate::banking::cosine_weight;
use crate::network::{
    CrossSectionId, Junction, JunctionKind, JunctionOrigin, JunctionParticipant, RoadNetwork, SplineId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RoundaboutReport {
    pub rings: usize,
    pub connections: usize,
}

/// Arc-length weighted mean of a closed ring's elevations. Each sample is
/// weighted by half the distance to its two neighbours, wrapping around.
pub fn ring_elevation(distances: &[f32], elevations: &[Option<f32>], ring_length: f32) -> Option<f32> {
    let n = distances.len();
    if n == 0 {
        return None;
    }
    let mut num = 0.0f64;
    let mut den = 0.0f64;
    for i in 0..n {
        let Some(e) = elevations[i] else {
            continue;
        };
        let prev = if i == 0 { distances[n - 1] - ring_length } else { distances[i - 1] };
        let next = if i + 1 == n { distances[0] + ring_length } else { distances[i + 1] };
        let w = (0.5 * (next - prev)).max(f32::EPSILON) as f64;
        num += w * e as f64;
        den += w;
    }
    (den > 0.0).then(|| (num / den) as f32)
}

pub struct RoundaboutHarmonizer;

impl RoundaboutHarmonizer {
    pub fn harmonize(network: &mut RoadNetwork) -> RoundaboutReport {
        let mut report = RoundaboutReport::default();
        network.remove_preserved_junctions(JunctionKind::Roundabout);

        let rings: Vec<SplineId> = network
            .splines()
            .iter()
            .filter(|s| s.is_roundabout)
            .map(|s| s.id)
            .collect();

        for ring in rings {
            let sections = network.sections_of(ring).to_vec();
            let distances: Vec<f32> = sections.iter().map(|&c| network.cross_section(c).distance).collect();
            let baselines: Vec<Option<f32>> = sections
                .iter()
                .map(|&c| network.cross_section_mut(c).baseline_elevation())
                .collect();

            let Some(level) = ring_elevation(&distances, &baselines, network.spline(ring).spline.length()) else {
                debug!("Ring {:?} has no calculated elevation, left as is", ring);
                continue;
            };

            for &c in &sections {
                network.cross_section_mut(c).apply_harmonized(level, 0.0);
            }
            report.rings += 1;

            for (road, end, ring_section) in connections(network, ring) {
                ease_onto_ring(network, road, end, level);

                let position = network.cross_section(ring_section).position;
                let mut junction = Junction::new(position, JunctionKind::Roundabout, JunctionOrigin::Preserved);
                junction.participants = smallvec![
                    JunctionParticipant {
                        cross_section: ring_section,
                        spline: ring,
                        at_endpoint: false,
                    },
                    JunctionParticipant {
                        cross_section: end,
                        spline: road,
                        at_endpoint: true,
                    },
                ];
                junction.cross_material = network.spline(ring).material != network.spline(road).material;
                network.add_preserved_junction(junction);
                report.connections += 1;
            }

            debug!("Ring {:?}: level {:.2} m", ring, level);
        }

        info!(
            "Roundabouts: {} rings levelled, {} connecting roads",
            report.rings, report.connections
        );
        report
    }
}

/// `(road, road end section, nearest ring section)` for every non-ring road
/// end within reach of the ring.
fn connections(network: &RoadNetwork, ring: SplineId) -> Vec<(SplineId, CrossSectionId, CrossSectionId)> {
    let ring_road = network.spline(ring);
    let mut out = Vec::new();

    for road in network.splines().iter().filter(|s| !s.is_roundabout) {
        let reach = ring_road.half_width() + road.parameters.junction.detection_radius_m;
        let ends = [network.first_section(road.id), network.last_section(road.id)];

        for end in ends.into_iter().flatten() {
            let p = network.cross_section(end).position;
            let (_, d) = ring_road.spline.project(p);
            if d > reach {
                continue;
            }
            if let Some(ring_section) = network.nearest_section(ring, p) {
                out.push((road.id, end, ring_section));
            }
        }
    }
    out
}

fn ease_onto_ring(network: &mut RoadNetwork, road: SplineId, end: CrossSectionId, level: f32) {
    let blend = network
        .spline(road)
        .parameters
        .junction
        .blend_distance_m
        .max(f32::EPSILON);

    for k in network.sections_of(road).to_vec() {
        let d = network.along_distance(k, end);
        if d >= blend {
            continue;
        }
        let t = d / blend;
        let cs = network.cross_section_mut(k);
        if let Some(base) = cs.baseline_elevation() {
            let w = cosine_weight(t);
            cs.apply_harmonized(level * (1.0 - w) + base * w, t);
        }
    }
}
