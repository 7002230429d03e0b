//! Target elevation per cross-section.
//!
//! 1. Sample the raw heightmap across the road along the cross-section's
//!    normal and keep the median (robust against one bank of a cutting or a
//!    ditch pulling the value; grid-aligned sampling would tilt roads on
//!    curves).
//! 2. Moving-average along the spline with prefix sums.
//! 3. Clamp the profile so no adjacent pair exceeds the maximum slope
//!    (forward sweep, then backward sweep).
//!
//! Cross-sections whose samples are all no-data stay uncalculated and split
//! the profile into independent runs.

use glam::Vec2;
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::heightmap::Heightmap;
use crate::network::{RoadNetwork, SplineId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ElevationReport {
    pub computed: usize,
    pub uncalculated: usize,
    pub excluded: usize,
}

pub struct ElevationSmoother<'a> {
    heightmap: &'a Heightmap,
}

impl<'a> ElevationSmoother<'a> {
    pub fn new(heightmap: &'a Heightmap) -> Self {
        Self { heightmap }
    }

    pub fn compute_network(&self, network: &mut RoadNetwork) -> ElevationReport {
        // ------------------------------------------------------------------
        // Raw median samples; independent per cross-section.
        // ------------------------------------------------------------------
        let raw: Vec<Option<f32>> = {
            let net: &RoadNetwork = network;
            net.cross_sections()
                .par_iter()
                .map(|cs| {
                    let count = net.spline(cs.spline).parameters.elevation_sample_count;
                    median_across(self.heightmap, cs.position, cs.normal, cs.half_width, count)
                })
                .collect()
        };

        for (cs, value) in network.cross_sections_mut().iter_mut().zip(raw) {
            cs.original_elevation = value;
        }

        // ------------------------------------------------------------------
        // Longitudinal smoothing + slope constraint per spline.
        // ------------------------------------------------------------------
        let spline_ids: Vec<SplineId> = network.splines().iter().map(|s| s.id).collect();
        for id in spline_ids {
            self.smooth_spline(network, id);
        }

        let mut report = ElevationReport::default();
        for cs in network.cross_sections() {
            match cs.target_elevation() {
                Some(_) => report.computed += 1,
                None => report.uncalculated += 1,
            }
            if cs.excluded {
                report.excluded += 1;
            }
        }

        info!(
            "Elevations: {} computed, {} uncalculated, {} on excluded structures",
            report.computed, report.uncalculated, report.excluded
        );

        report
    }

    fn smooth_spline(&self, network: &mut RoadNetwork, id: SplineId) {
        let road = network.spline(id);
        let interval = road.parameters.cross_section_interval_m;
        let window_m = road.parameters.smoothing_distance_m;
        let max_slope = road.parameters.max_longitudinal_slope;
        let structure = road.is_excluded_structure();

        let ids = network.sections_of(id).to_vec();
        let distances: Vec<f32> = ids.iter().map(|&c| network.cross_section(c).distance).collect();
        let mut values: Vec<Option<f32>> = ids
            .iter()
            .map(|&c| network.cross_section(c).original_elevation)
            .collect();

        let half_window = (window_m / (2.0 * interval)).round() as usize;

        for run in finite_runs(&values) {
            let mut profile: Vec<f32> = values[run.clone()].iter().flatten().copied().collect();
            let dist = &distances[run.clone()];

            moving_average(&mut profile, half_window);
            if structure {
                straight_deck(&mut profile, dist);
            }
            clamp_slope(&mut profile, dist, max_slope);

            for (slot, v) in values[run].iter_mut().zip(profile) {
                *slot = Some(v);
            }
        }

        for (&c, v) in ids.iter().zip(values) {
            network.cross_section_mut(c).set_profile_elevation(v);
        }

        debug!("Spline {:?}: smoothed {} cross-sections (half window {})", id, ids.len(), half_window);
    }
}

/// Median of `count` heightmap samples spread evenly across the carriageway
/// along `normal`. No-data samples are ignored; `None` if all are no-data.
pub fn median_across(
    heightmap: &Heightmap,
    center: Vec2,
    normal: Vec2,
    half_width: f32,
    count: usize,
) -> Option<f32> {
    let count = count.max(1);
    let mut samples: Vec<f32> = (0..count)
        .filter_map(|i| {
            let offset = if count == 1 {
                0.0
            } else {
                -half_width + 2.0 * half_width * i as f32 / (count - 1) as f32
            };
            heightmap.sample(center + normal * offset)
        })
        .collect();

    if samples.is_empty() {
        return None;
    }

    samples.sort_by(f32::total_cmp);
    let n = samples.len();
    Some(if n % 2 == 1 {
        samples[n / 2]
    } else {
        0.5 * (samples[n / 2 - 1] + samples[n / 2])
    })
}

/// Maximal index ranges of consecutive `Some` values.
fn finite_runs(values: &[Option<f32>]) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, v) in values.iter().enumerate() {
        match (v.is_some(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..values.len());
    }
    runs
}

/// Centered moving average over `2·half_window + 1` samples, truncated at the
/// ends, in O(n) using a prefix sum.
pub fn moving_average(values: &mut [f32], half_window: usize) {
    let n = values.len();
    if n < 3 || half_window == 0 {
        return;
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    for &v in values.iter() {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v as f64);
    }

    for (i, v) in values.iter_mut().enumerate() {
        let lo = i.saturating_sub(half_window);
        let hi = (i + half_window + 1).min(n);
        *v = ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32;
    }
}

/// Straight line between the first and last value (bridge / tunnel deck).
fn straight_deck(values: &mut [f32], distances: &[f32]) {
    let n = values.len();
    if n < 2 {
        return;
    }
    let (e0, e1) = (values[0], values[n - 1]);
    let (s0, s1) = (distances[0], distances[n - 1]);
    let span = (s1 - s0).max(f32::EPSILON);
    for (v, &s) in values.iter_mut().zip(distances) {
        let t = (s - s0) / span;
        *v = e0 + (e1 - e0) * t;
    }
}

/// Limits `|Δe| / Δs` between neighbours to `max_slope`. Violations are
/// clamped. The backward sweep alone guarantees the bound for every pair;
/// the forward sweep first spreads corrections in the other direction.
pub fn clamp_slope(values: &mut [f32], distances: &[f32], max_slope: f32) {
    let n = values.len();
    if n < 2 {
        return;
    }

    for i in 1..n {
        let allowed = max_slope * (distances[i] - distances[i - 1]).abs();
        values[i] = values[i].clamp(values[i - 1] - allowed, values[i - 1] + allowed);
    }
    for i in (0..n - 1).rev() {
        let allowed = max_slope * (distances[i + 1] - distances[i]).abs();
        values[i] = values[i].clamp(values[i + 1] - allowed, values[i + 1] + allowed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NetworkBuilder;
    use crate::params::{PipelineConfig, RoadParameters};
    use crate::source::{RoadSource, SourcePath};
    use crate::spline::InterpolationMode;

    fn build(params: RoadParameters, path: Vec<[f32; 2]>) -> RoadNetwork {
        let config = PipelineConfig::default();
        let sources = vec![RoadSource {
            material: "asphalt".into(),
            interpolation: InterpolationMode::Smooth,
            parameters: params,
            paths: vec![SourcePath::Local(path)],
        }];
        NetworkBuilder::new(&config).build(&sources).0
    }

    #[test]
    fn median_ignores_one_sided_outlier() {
        // Flat 10 m terrain with a deep ditch along y < 97.
        let mut hm = Heightmap::filled(64, 64, 2.0, 10.0);
        for r in 0..64 {
            for c in 0..64 {
                if (r as f32) * 2.0 < 97.0 {
                    hm.set(c, r, -5.0);
                }
            }
        }
        let h = median_across(&hm, Vec2::new(60.0, 100.0), Vec2::Y, 4.0, 5).unwrap();
        assert!((h - 10.0).abs() < 1e-4);
    }

    #[test]
    fn all_nodata_is_uncalculated_not_zero() {
        let hm = Heightmap::filled(8, 8, 1.0, f32::NAN);
        assert_eq!(median_across(&hm, Vec2::new(4.0, 4.0), Vec2::Y, 2.0, 5), None);

        let mut net = build(RoadParameters::default(), vec![[1.0, 4.0], [6.0, 4.0]]);
        ElevationSmoother::new(&hm).compute_network(&mut net);
        assert!(net.cross_sections().iter().all(|cs| cs.target_elevation().is_none()));
    }

    #[test]
    fn slope_bound_holds_on_a_cliff() {
        // Step of 40 m halfway along the road.
        let mut hm = Heightmap::filled(128, 32, 2.0, 0.0);
        for r in 0..32 {
            for c in 64..128 {
                hm.set(c, r, 40.0);
            }
        }

        let params = RoadParameters {
            max_longitudinal_slope: 0.06,
            ..Default::default()
        };
        let mut net = build(params, vec![[4.0, 30.0], [250.0, 30.0]]);
        ElevationSmoother::new(&hm).compute_network(&mut net);

        let ids = net.sections_of(SplineId(0));
        for w in ids.windows(2) {
            let a = net.cross_section(w[0]);
            let b = net.cross_section(w[1]);
            let de = (a.target_elevation().unwrap() - b.target_elevation().unwrap()).abs();
            let ds = b.distance - a.distance;
            assert!(de / ds <= 0.06 + 1e-4, "slope {} exceeds bound", de / ds);
        }
    }

    #[test]
    fn moving_average_keeps_constant_profile() {
        let mut v = vec![3.0f32; 20];
        moving_average(&mut v, 4);
        assert!(v.iter().all(|x| (x - 3.0).abs() < 1e-6));
    }

    #[test]
    fn bridge_profile_is_straight_and_flagged() {
        // Valley under the middle of the road.
        let mut hm = Heightmap::filled(64, 16, 2.0, 20.0);
        for r in 0..16 {
            for c in 20..44 {
                hm.set(c, r, 0.0);
            }
        }
        let params = RoadParameters {
            is_bridge: true,
            ..Default::default()
        };
        let mut net = build(params, vec![[2.0, 16.0], [124.0, 16.0]]);
        ElevationSmoother::new(&hm).compute_network(&mut net);

        let ids = net.sections_of(SplineId(0));
        assert!(ids.iter().all(|&c| net.cross_section(c).excluded));
        let mid = net.cross_section(ids[ids.len() / 2]).target_elevation().unwrap();
        assert!(mid > 15.0, "deck sagged into the valley: {mid}");
    }
}
