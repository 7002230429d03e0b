//! Single-pass terrain blending.
//!
//! Every road segment (pair of consecutive cross-sections) goes into one
//! R-tree, padded by its half-width plus affected range. Each heightmap cell
//! then asks the tree which roads reach it and resolves them at once:
//!
//! - core (distance <= half-width): the road surface, interpolated between
//!   the two cross-sections and tilted by their bank. The nearest core road
//!   owns the cell; equal distances go to the higher priority.
//! - blend band (distance <= half-width + range): the road edge eased into
//!   the original terrain by the configured falloff, nearest road wins.
//! - beyond: untouched.
//!
//! A cell owned as core by one road is never written by another road's blend
//! band, so there is no ordering between roads to get wrong.

use log::{debug, info};
use rayon::prelude::*;
use rstar::RTree;
use serde::Serialize;

use crate::heightmap::Heightmap;
use crate::network::{CrossSectionId, RoadNetwork, SplineId};
use crate::params::BlendFalloff;
use crate::spatial::{segments_near, SegmentBox};
use crate::spline::project_on_segment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BlendStatistics {
    pub pixels_modified: usize,
    /// Material removed, m³.
    pub cut_volume_m3: f64,
    /// Material added, m³.
    pub fill_volume_m3: f64,
    /// Largest step between two adjacent modified cells, metres.
    pub max_discontinuity_m: f32,
    /// `max_discontinuity_m / cell_size`.
    pub max_slope: f32,
}

#[derive(Debug, Clone)]
pub struct BlendOutput {
    pub heightmap: Heightmap,
    /// `blended − original`; zero where nothing changed or the original was
    /// no-data.
    pub delta: Heightmap,
    /// Road owning each core cell, row-major.
    pub ownership: Vec<Option<SplineId>>,
    pub statistics: BlendStatistics,
}

/// Pre-resolved data of one segment, looked up by `SegmentBox::index`.
struct Piece {
    spline: SplineId,
    a: CrossSectionId,
    b: CrossSectionId,
    priority: i32,
    half_width: f32,
    range: f32,
}

#[derive(Clone, Copy)]
struct Hit {
    spline: SplineId,
    priority: i32,
    /// Distance from the centerline.
    distance: f32,
    /// Distance past the road edge.
    beyond_edge: f32,
    range: f32,
    surface: f32,
}

pub struct TerrainBlender {
    falloff: BlendFalloff,
}

impl TerrainBlender {
    pub fn new(falloff: BlendFalloff) -> Self {
        Self { falloff }
    }

    pub fn blend(&self, network: &RoadNetwork, terrain: &Heightmap) -> BlendOutput {
        let (pieces, tree) = index_segments(network);
        debug!("Blend index: {} road segments", pieces.len());

        let width = terrain.width;
        let mut heights = terrain.data.clone();
        let mut ownership: Vec<Option<SplineId>> = vec![None; terrain.data.len()];

        heights
            .par_chunks_mut(width.max(1))
            .zip(ownership.par_chunks_mut(width.max(1)))
            .enumerate()
            .for_each(|(row, (cells, owners))| {
                for (col, (cell, owner)) in cells.iter_mut().zip(owners.iter_mut()).enumerate() {
                    let p = terrain.cell_to_world(col, row);
                    let (value, claimed) = self.resolve_cell(network, &pieces, &tree, p, *cell);
                    *cell = value;
                    *owner = claimed;
                }
            });

        let heightmap = Heightmap {
            data: heights,
            width: terrain.width,
            height: terrain.height,
            cell_size: terrain.cell_size,
            georef: terrain.georef.clone(),
        };
        let (delta, statistics) = compare(terrain, &heightmap);

        info!(
            "Terrain blend: {} cells modified, cut {:.1} m³, fill {:.1} m³, max step {:.3} m (slope {:.3})",
            statistics.pixels_modified,
            statistics.cut_volume_m3,
            statistics.fill_volume_m3,
            statistics.max_discontinuity_m,
            statistics.max_slope
        );

        BlendOutput {
            heightmap,
            delta,
            ownership,
            statistics,
        }
    }

    fn resolve_cell(
        &self,
        network: &RoadNetwork,
        pieces: &[Piece],
        tree: &RTree<SegmentBox>,
        p: glam::Vec2,
        original: f32,
    ) -> (f32, Option<SplineId>) {
        let mut core: Option<Hit> = None;
        let mut band: Option<Hit> = None;

        for seg in segments_near(tree, p) {
            let piece = &pieces[seg.index as usize];
            let (t, d) = project_on_segment(p, seg.a, seg.b);
            if d > piece.half_width + piece.range {
                continue;
            }

            let (ca, cb) = (network.cross_section(piece.a), network.cross_section(piece.b));
            let (Some(sa), Some(sb)) = (ca.surface_elevation_at(p), cb.surface_elevation_at(p)) else {
                continue;
            };

            let hit = Hit {
                spline: piece.spline,
                priority: piece.priority,
                distance: d,
                beyond_edge: (d - piece.half_width).max(0.0),
                range: piece.range,
                surface: sa + (sb - sa) * t,
            };

            if d <= piece.half_width {
                let better = match core {
                    None => true,
                    Some(c) => hit.distance < c.distance || (hit.distance == c.distance && hit.priority > c.priority),
                };
                if better {
                    core = Some(hit);
                }
            } else {
                let better = match band {
                    None => true,
                    Some(b) => {
                        hit.beyond_edge < b.beyond_edge
                            || (hit.beyond_edge == b.beyond_edge && hit.priority > b.priority)
                    }
                };
                if better {
                    band = Some(hit);
                }
            }
        }

        if let Some(c) = core {
            return (c.surface, Some(c.spline));
        }
        match band {
            Some(b) if original.is_finite() && b.range > 0.0 => {
                let w = self.falloff.weight(b.beyond_edge / b.range);
                (b.surface * (1.0 - w) + original * w, None)
            }
            _ => (original, None),
        }
    }
}

/// One box per consecutive cross-section pair of every road that may touch
/// the terrain. Rings also get their closing pair.
fn index_segments(network: &RoadNetwork) -> (Vec<Piece>, RTree<SegmentBox>) {
    let mut pieces = Vec::new();
    let mut boxes = Vec::new();

    for road in network.splines() {
        if road.is_excluded_structure() {
            continue;
        }
        let ids = network.sections_of(road.id);
        let half_width = road.half_width();
        let range = road.parameters.terrain_affected_range_m.max(0.0);

        let mut pairs: Vec<(CrossSectionId, CrossSectionId)> = ids.windows(2).map(|w| (w[0], w[1])).collect();
        if road.is_roundabout && ids.len() > 2 {
            if let (Some(&last), Some(&first)) = (ids.last(), ids.first()) {
                pairs.push((last, first));
            }
        }

        for (a, b) in pairs {
            let (ca, cb) = (network.cross_section(a), network.cross_section(b));
            if ca.excluded || cb.excluded {
                continue;
            }
            if ca.target_elevation().is_none() || cb.target_elevation().is_none() {
                continue;
            }
            boxes.push(SegmentBox::new(
                road.id,
                pieces.len() as u32,
                ca.position,
                cb.position,
                half_width + range,
            ));
            pieces.push(Piece {
                spline: road.id,
                a,
                b,
                priority: road.priority,
                half_width,
                range,
            });
        }
    }

    (pieces, RTree::bulk_load(boxes))
}

/// Delta map and statistics between the original and blended terrain.
pub fn compare(original: &Heightmap, blended: &Heightmap) -> (Heightmap, BlendStatistics) {
    let mut stats = BlendStatistics::default();
    let cell_area = (original.cell_size as f64) * (original.cell_size as f64);

    let delta_data: Vec<f32> = original
        .data
        .iter()
        .zip(&blended.data)
        .map(|(&o, &b)| if o.is_finite() && b.is_finite() { b - o } else { 0.0 })
        .collect();

    let modified: Vec<bool> = original
        .data
        .iter()
        .zip(&blended.data)
        .map(|(&o, &b)| {
            if o.is_finite() {
                (b - o).abs() > 1e-6
            } else {
                b.is_finite()
            }
        })
        .collect();

    for (&d, &m) in delta_data.iter().zip(&modified) {
        if !m {
            continue;
        }
        stats.pixels_modified += 1;
        if d < 0.0 {
            stats.cut_volume_m3 += -(d as f64) * cell_area;
        } else {
            stats.fill_volume_m3 += d as f64 * cell_area;
        }
    }

    let (w, h) = (blended.width, blended.height);
    for r in 0..h {
        for c in 0..w {
            let i = r * w + c;
            if !modified[i] {
                continue;
            }
            for j in [(c + 1 < w).then(|| i + 1), (r + 1 < h).then(|| i + w)].into_iter().flatten() {
                if modified[j] {
                    let step = (blended.data[i] - blended.data[j]).abs();
                    if step.is_finite() {
                        stats.max_discontinuity_m = stats.max_discontinuity_m.max(step);
                    }
                }
            }
        }
    }
    if blended.cell_size > 0.0 {
        stats.max_slope = stats.max_discontinuity_m / blended.cell_size;
    }

    let delta = Heightmap {
        data: delta_data,
        width: original.width,
        height: original.height,
        cell_size: original.cell_size,
        georef: original.georef.clone(),
    };
    (delta, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ParameterizedRoadSpline;
    use crate::params::RoadParameters;
    use crate::spline::{InterpolationMode, RoadSpline};
    use glam::Vec2;

    fn add_flat_road(net: &mut RoadNetwork, from: Vec2, to: Vec2, params: RoadParameters, priority: i32, elevation: f32) -> SplineId {
        let spline = RoadSpline::new(&[from, to], InterpolationMode::Linear).unwrap();
        let samples = spline.resample(params.cross_section_interval_m);
        let is_bridge = params.is_bridge;
        let id = net.add_spline(ParameterizedRoadSpline {
            id: SplineId(0),
            spline,
            parameters: params,
            material: "asphalt".into(),
            source_order: 0,
            priority,
            is_roundabout: false,
            is_bridge,
            is_tunnel: false,
        });
        net.add_cross_sections(id, &samples);
        for &c in net.sections_of(id).to_vec().iter() {
            net.cross_section_mut(c).set_profile_elevation(Some(elevation));
        }
        id
    }

    #[test]
    fn zero_range_touches_only_the_carriageway() {
        let mut net = RoadNetwork::new();
        let params = RoadParameters {
            terrain_affected_range_m: 0.0,
            ..Default::default()
        };
        add_flat_road(&mut net, Vec2::new(0.0, 50.0), Vec2::new(99.0, 50.0), params, 1, 7.0);

        let terrain = Heightmap::filled(100, 100, 1.0, 3.0);
        let out = TerrainBlender::new(BlendFalloff::Smoothstep).blend(&net, &terrain);

        for r in 0..100 {
            for c in 0..100 {
                let v = out.heightmap.get(c, r).unwrap();
                let inside = (r as f32 - 50.0).abs() <= 4.0;
                if inside {
                    assert!((v - 7.0).abs() < 1e-5, "core cell ({c},{r}) = {v}");
                } else {
                    assert_eq!(v, 3.0, "cell ({c},{r}) outside the road changed");
                }
            }
        }
        assert_eq!(out.statistics.pixels_modified, 100 * 9);
        assert!((out.statistics.fill_volume_m3 - 900.0 * 4.0).abs() < 1e-3);
    }

    #[test]
    fn band_eases_into_terrain() {
        let mut net = RoadNetwork::new();
        add_flat_road(&mut net, Vec2::new(0.0, 50.0), Vec2::new(99.0, 50.0), RoadParameters::default(), 1, 10.0);

        let terrain = Heightmap::filled(100, 100, 1.0, 0.0);
        let out = TerrainBlender::new(BlendFalloff::Linear).blend(&net, &terrain);

        // Half-width 4, range 6: 3 m past the edge is half way.
        assert!((out.heightmap.get(20, 57).unwrap() - 5.0).abs() < 1e-4);
        assert_eq!(out.heightmap.get(20, 61).unwrap(), 0.0);
        assert!(out.ownership[57 * 100 + 20].is_none());
        assert_eq!(out.ownership[50 * 100 + 20], Some(SplineId(0)));
    }

    #[test]
    fn core_cell_is_protected_from_other_roads_band() {
        let mut net = RoadNetwork::new();
        // Low-priority road at 10 m, a high-priority one 8 m away at 0 m.
        let low = add_flat_road(&mut net, Vec2::new(0.0, 50.0), Vec2::new(99.0, 50.0), RoadParameters::default(), 1, 10.0);
        add_flat_road(&mut net, Vec2::new(0.0, 58.0), Vec2::new(99.0, 58.0), RoadParameters::default(), 9, 0.0);

        let terrain = Heightmap::filled(100, 100, 1.0, 5.0);
        let out = TerrainBlender::new(BlendFalloff::Smoothstep).blend(&net, &terrain);

        // Row 52 is core of the low road and inside the high road's band.
        assert_eq!(out.ownership[52 * 100 + 30], Some(low));
        assert!((out.heightmap.get(30, 52).unwrap() - 10.0).abs() < 1e-5);
        // Row 53 is still nearer the low road.
        assert_eq!(out.ownership[53 * 100 + 30], Some(low));
        assert!((out.heightmap.get(30, 53).unwrap() - 10.0).abs() < 1e-5);
        // Row 54 is 4 m from both centerlines; the higher priority breaks the tie.
        assert_ne!(out.ownership[54 * 100 + 30], Some(low));
        assert!(out.heightmap.get(30, 54).unwrap().abs() < 1e-5);
    }

    #[test]
    fn overlapping_carriageways_split_at_the_midline() {
        let mut net = RoadNetwork::new();
        // Centerlines 5 m apart with 4 m half-widths: rows 51..=54 are core of both.
        let major = add_flat_road(&mut net, Vec2::new(0.0, 50.0), Vec2::new(99.0, 50.0), RoadParameters::default(), 9, 0.0);
        let minor = add_flat_road(&mut net, Vec2::new(0.0, 55.0), Vec2::new(99.0, 55.0), RoadParameters::default(), 1, 10.0);

        let terrain = Heightmap::filled(100, 100, 1.0, 5.0);
        let out = TerrainBlender::new(BlendFalloff::Smoothstep).blend(&net, &terrain);

        for (row, owner, elevation) in [(51, major, 0.0), (52, major, 0.0), (53, minor, 10.0), (54, minor, 10.0)] {
            assert_eq!(out.ownership[row * 100 + 40], Some(owner), "row {row}");
            let v = out.heightmap.get(40, row).unwrap();
            assert!((v - elevation).abs() < 1e-5, "row {row} = {v}");
        }
    }

    #[test]
    fn bridges_leave_terrain_alone() {
        let mut net = RoadNetwork::new();
        let params = RoadParameters {
            is_bridge: true,
            ..Default::default()
        };
        add_flat_road(&mut net, Vec2::new(0.0, 50.0), Vec2::new(99.0, 50.0), params, 1, 30.0);

        let terrain = Heightmap::filled(100, 100, 1.0, 2.0);
        let out = TerrainBlender::new(BlendFalloff::Smoothstep).blend(&net, &terrain);
        assert_eq!(out.heightmap.data, terrain.data);
        assert_eq!(out.statistics, BlendStatistics::default());
    }
}
