//! Geometric junction detection.
//!
//! Every place a road ends or crosses another contributes "arms": a road
//! ending contributes one arm, a road passing through contributes two. Arms
//! within the detection radius of each other are clustered and the cluster is
//! typed by its arm count and arm directions.

use std::collections::BTreeMap;

use glam::Vec2;
use log::{debug, info};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::Serialize;
use smallvec::SmallVec;

use crate::network::{Junction, JunctionKind, JunctionOrigin, JunctionParticipant, RoadNetwork, SplineId};
use crate::params::PipelineConfig;
use crate::spatial::{segment_intersection, segments_near, SegmentBox};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub detected: usize,
    pub excluded: usize,
    pub hinted: usize,
    pub collinear_skipped: usize,
}

/// Where a spline meets a junction.
#[derive(Debug, Clone, Copy)]
struct Contact {
    position: Vec2,
    spline: SplineId,
    /// Arc length of the contact along its spline.
    distance: f32,
    at_endpoint: bool,
    radius: f32,
}

pub struct JunctionDetector<'a> {
    config: &'a PipelineConfig,
    hints: Vec<Vec2>,
}

impl<'a> JunctionDetector<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            hints: Vec::new(),
        }
    }

    /// Junction positions from an external source, already in the local frame.
    pub fn with_hints(mut self, hints: Vec<Vec2>) -> Self {
        self.hints = hints;
        self
    }

    /// Detects junctions and replaces the network's detected junctions with
    /// them; preserved junctions survive.
    pub fn detect_into(&self, network: &mut RoadNetwork) -> DetectionReport {
        let (junctions, mut report) = self.detect(network);
        let before = junctions.len();
        network.replace_detected_junctions(junctions, self.config.preserved_junction_radius_m);

        let kept = network
            .junctions()
            .iter()
            .filter(|j| j.origin != JunctionOrigin::Preserved)
            .count();
        report.detected = kept;

        info!(
            "Junction detection: {} junctions ({} overlapped preserved ones), {} excluded, {} placed by hints, {} collinear joins skipped",
            kept,
            before - kept,
            report.excluded,
            report.hinted,
            report.collinear_skipped
        );
        report
    }

    /// Detects junctions without touching the network.
    pub fn detect(&self, network: &RoadNetwork) -> (Vec<Junction>, DetectionReport) {
        let mut report = DetectionReport::default();

        let eligible: Vec<SplineId> = network
            .splines()
            .iter()
            .filter(|s| !s.is_roundabout && s.parameters.junction.enable_detection)
            .map(|s| s.id)
            .collect();
        if eligible.len() < 2 {
            return (Vec::new(), report);
        }

        let contacts = self.collect_contacts(network, &eligible);
        let clusters = cluster(&contacts);
        debug!("{} contacts in {} clusters", contacts.len(), clusters.len());

        let mut junctions = Vec::new();
        for members in clusters {
            let mut group: Vec<Contact> = members.iter().map(|&i| contacts[i]).collect();
            dedupe(&mut group);

            let mut splines: SmallVec<[SplineId; 4]> = group.iter().map(|c| c.spline).collect();
            splines.sort();
            splines.dedup();
            if splines.len() < 2 {
                continue;
            }

            let Some(kind) = self.classify(network, &group) else {
                report.collinear_skipped += 1;
                continue;
            };

            let centroid = group.iter().map(|c| c.position).sum::<Vec2>() / group.len() as f32;
            let reach = group.iter().map(|c| c.radius).fold(0.0, f32::max);
            let hint = self
                .hints
                .iter()
                .copied()
                .filter(|h| h.distance(centroid) <= reach)
                .min_by(|a, b| a.distance_squared(centroid).total_cmp(&b.distance_squared(centroid)));

            let (position, origin) = match hint {
                Some(h) => {
                    report.hinted += 1;
                    (h, JunctionOrigin::ExplicitHint)
                }
                None => (centroid, JunctionOrigin::Geometric),
            };

            let mut junction = Junction::new(position, kind, origin);
            for c in &group {
                let section = if c.at_endpoint {
                    if c.distance < 0.5 * network.spline(c.spline).spline.length() {
                        network.first_section(c.spline)
                    } else {
                        network.last_section(c.spline)
                    }
                } else {
                    network.nearest_section(c.spline, c.position)
                };
                if let Some(cross_section) = section {
                    junction.participants.push(JunctionParticipant {
                        cross_section,
                        spline: c.spline,
                        at_endpoint: c.at_endpoint,
                    });
                }
            }

            let mut materials: SmallVec<[&str; 4]> = splines
                .iter()
                .map(|&s| network.spline(s).material.as_str())
                .collect();
            materials.sort_unstable();
            materials.dedup();
            junction.cross_material = materials.len() > 1;

            let crosses_structure = group.iter().any(|c| !c.at_endpoint)
                && splines.iter().any(|&s| {
                    let road = network.spline(s);
                    road.is_bridge || road.is_tunnel
                });
            if crosses_structure {
                junction.exclude("grade-separated crossing");
                report.excluded += 1;
            }

            junctions.push(junction);
        }

        report.detected = junctions.len();
        (junctions, report)
    }

    fn collect_contacts(&self, network: &RoadNetwork, eligible: &[SplineId]) -> Vec<Contact> {
        let mut contacts = Vec::new();
        let max_radius = eligible
            .iter()
            .map(|&s| network.spline(s).parameters.junction.detection_radius_m)
            .fold(0.0, f32::max);

        // Polyline segment index over all eligible splines.
        let mut boxes = Vec::new();
        for &id in eligible {
            let poly = network.spline(id).spline.polyline();
            for (i, w) in poly.windows(2).enumerate() {
                boxes.push(SegmentBox::new(id, i as u32, w[0], w[1], max_radius));
            }
        }
        let tree = RTree::bulk_load(boxes);

        // ------------------------------------------------------------------
        // 1. Road ends, and road ends landing on another road's interior.
        // ------------------------------------------------------------------
        for &id in eligible {
            let road = network.spline(id);
            let radius = road.parameters.junction.detection_radius_m;
            let length = road.spline.length();

            for (position, distance) in [(road.spline.start(), 0.0), (road.spline.end(), length)] {
                contacts.push(Contact {
                    position,
                    spline: id,
                    distance,
                    at_endpoint: true,
                    radius,
                });

                let mut others: SmallVec<[SplineId; 4]> = segments_near(&tree, position)
                    .map(|b| b.spline)
                    .filter(|&s| s != id)
                    .collect();
                others.sort();
                others.dedup();

                for other in others {
                    let target = &network.spline(other).spline;
                    let (s, d) = target.project(position);
                    if d <= radius && is_interior(s, target.length(), radius) {
                        contacts.push(Contact {
                            position: target.position_at(s),
                            spline: other,
                            distance: s,
                            at_endpoint: false,
                            radius,
                        });
                    }
                }
            }
        }

        // ------------------------------------------------------------------
        // 2. Two roads crossing away from their ends.
        // ------------------------------------------------------------------
        if self.config.detect_interior_crossings {
            for seg in tree.iter() {
                for other in tree.locate_in_envelope_intersecting(&seg.bare_envelope()) {
                    if other.spline <= seg.spline {
                        continue;
                    }
                    let Some(p) = segment_intersection(seg.a, seg.b, other.a, other.b) else {
                        continue;
                    };

                    let first = network.spline(seg.spline);
                    let second = network.spline(other.spline);
                    let (s1, _) = first.spline.project(p);
                    let (s2, _) = second.spline.project(p);
                    let r1 = first.parameters.junction.detection_radius_m;
                    let r2 = second.parameters.junction.detection_radius_m;

                    if is_interior(s1, first.spline.length(), r1) && is_interior(s2, second.spline.length(), r2) {
                        contacts.push(Contact {
                            position: p,
                            spline: seg.spline,
                            distance: s1,
                            at_endpoint: false,
                            radius: r1,
                        });
                        contacts.push(Contact {
                            position: p,
                            spline: other.spline,
                            distance: s2,
                            at_endpoint: false,
                            radius: r2,
                        });
                    }
                }
            }
        }

        contacts
    }

    /// `None` for two roads simply continuing into each other.
    fn classify(&self, network: &RoadNetwork, group: &[Contact]) -> Option<JunctionKind> {
        let arms: SmallVec<[Vec2; 8]> = group.iter().flat_map(|c| arm_directions(network, c)).collect();
        let interior = group.iter().filter(|c| !c.at_endpoint).count();

        match arms.len() {
            2 => {
                let straight = (180.0 - self.config.collinear_tolerance_deg).to_radians().cos();
                if arms[0].dot(arms[1]) <= straight {
                    None
                } else {
                    Some(JunctionKind::Endpoint)
                }
            }
            3 => Some(JunctionKind::TJunction),
            4 if interior == 2 && group.len() == 2 => Some(JunctionKind::MidSplineCrossing),
            4 if is_orthogonal(&arms, self.config.orthogonal_tolerance_deg) => Some(JunctionKind::CrossRoads),
            _ => Some(JunctionKind::Complex),
        }
    }
}

#[inline]
fn is_interior(s: f32, length: f32, radius: f32) -> bool {
    s > radius && s < length - radius
}

/// Unit directions pointing away from the junction along the road.
fn arm_directions(network: &RoadNetwork, contact: &Contact) -> SmallVec<[Vec2; 2]> {
    let spline = &network.spline(contact.spline).spline;
    let tangent = spline.tangent_at(contact.distance);
    let mut arms = SmallVec::new();
    if contact.at_endpoint {
        if contact.distance < 0.5 * spline.length() {
            arms.push(tangent);
        } else {
            arms.push(-tangent);
        }
    } else {
        arms.push(tangent);
        arms.push(-tangent);
    }
    arms
}

/// Four arms, each consecutive pair roughly 90° apart.
fn is_orthogonal(arms: &[Vec2], tolerance_deg: f32) -> bool {
    let mut angles: SmallVec<[f32; 8]> = arms.iter().map(|a| a.y.atan2(a.x)).collect();
    angles.sort_by(f32::total_cmp);
    let n = angles.len();
    (0..n).all(|i| {
        let next = if i + 1 < n {
            angles[i + 1]
        } else {
            angles[0] + std::f32::consts::TAU
        };
        ((next - angles[i]).to_degrees() - 90.0).abs() <= tolerance_deg
    })
}

/// Keeps one contact per endpoint and one interior contact per spline.
fn dedupe(group: &mut Vec<Contact>) {
    let mut seen: SmallVec<[(SplineId, bool, bool); 8]> = SmallVec::new();
    group.retain(|c| {
        let key = if c.at_endpoint {
            (c.spline, true, c.distance > 0.0)
        } else {
            (c.spline, false, false)
        };
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

/// Single-linkage clusters of contacts within `max(rᵢ, rⱼ)` of each other.
fn cluster(contacts: &[Contact]) -> Vec<Vec<usize>> {
    let max_radius = contacts.iter().map(|c| c.radius).fold(0.0, f32::max);
    let tree = RTree::bulk_load(
        contacts
            .iter()
            .enumerate()
            .map(|(i, c)| GeomWithData::new([c.position.x, c.position.y], i))
            .collect(),
    );

    let mut parent: Vec<usize> = (0..contacts.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for (i, c) in contacts.iter().enumerate() {
        let p = [c.position.x, c.position.y];
        for hit in tree.locate_within_distance(p, max_radius * max_radius) {
            let j = hit.data;
            if j <= i {
                continue;
            }
            let reach = c.radius.max(contacts[j].radius);
            if c.position.distance(contacts[j].position) <= reach {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..contacts.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}
