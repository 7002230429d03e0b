//! Arc-length parameterised road centerlines.
//!
//! A [`RoadSpline`] interpolates its control points with piecewise cubic
//! Hermite segments whose end tangents are shared between neighbouring
//! segments, so the tangent direction is continuous everywhere. The curve is
//! flattened once into a dense table (position, unit tangent, cumulative arc
//! length) and every query works on that table by arc-length distance.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::SplineError;

/// Consecutive control points closer than this are merged.
pub const MIN_POINT_SPACING_M: f32 = 0.01;

/// Target spacing of the flattened table.
const FLATTEN_STEP_M: f32 = 0.5;
const MAX_STEPS_PER_SEGMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Straight segments between control points (tangent jumps at corners).
    Linear,
    /// Tangent-continuous cubic through every control point.
    #[default]
    Smooth,
}

/// One resampled frame along a spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineSample {
    /// Arc-length distance from the start.
    pub distance: f32,
    pub position: Vec2,
    /// Unit tangent (direction of travel).
    pub tangent: Vec2,
    /// Unit left normal, `tangent.perp()`.
    pub normal: Vec2,
}

/// Immutable smooth curve through an ordered set of points.
#[derive(Debug, Clone)]
pub struct RoadSpline {
    control_points: Vec<Vec2>,
    samples: Vec<Vec2>,
    tangents: Vec<Vec2>,
    cumulative: Vec<f32>,
}

impl RoadSpline {
    pub fn new(points: &[Vec2], mode: InterpolationMode) -> Result<Self, SplineError> {
        if let Some(bad) = points.iter().position(|p| !p.is_finite()) {
            return Err(SplineError::NonFinite(bad));
        }

        // Drop degenerate (duplicate / near-duplicate) consecutive points.
        let mut control_points: Vec<Vec2> = Vec::with_capacity(points.len());
        for &p in points {
            match control_points.last() {
                Some(&last) if last.distance(p) < MIN_POINT_SPACING_M => {}
                _ => control_points.push(p),
            }
        }

        if control_points.len() < 2 {
            return Err(SplineError::TooFewPoints(control_points.len()));
        }

        let (samples, tangents) = match mode {
            InterpolationMode::Linear => flatten_linear(&control_points),
            InterpolationMode::Smooth => flatten_smooth(&control_points),
        };

        let mut cumulative = Vec::with_capacity(samples.len());
        let mut acc = 0.0f32;
        cumulative.push(0.0);
        for w in samples.windows(2) {
            acc += w[0].distance(w[1]);
            cumulative.push(acc);
        }

        if acc <= f32::EPSILON {
            return Err(SplineError::ZeroLength);
        }

        Ok(Self {
            control_points,
            samples,
            tangents,
            cumulative,
        })
    }

    #[inline]
    pub fn control_points(&self) -> &[Vec2] {
        &self.control_points
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn start(&self) -> Vec2 {
        self.samples[0]
    }

    #[inline]
    pub fn end(&self) -> Vec2 {
        self.samples[self.samples.len() - 1]
    }

    /// Start and end coincide within `tolerance`.
    #[inline]
    pub fn is_closed(&self, tolerance: f32) -> bool {
        self.start().distance(self.end()) < tolerance
    }

    /// Flattened polyline used for every query.
    #[inline]
    pub fn polyline(&self) -> &[Vec2] {
        &self.samples
    }

    /// Index `i` and fraction `f` such that `distance` lies between table
    /// entries `i` and `i + 1`.
    fn locate(&self, distance: f32) -> (usize, f32) {
        let s = distance.clamp(0.0, self.length());
        let last = self.cumulative.len() - 1;

        let i = match self
            .cumulative
            .binary_search_by(|d| d.total_cmp(&s))
        {
            Ok(i) => i.min(last - 1),
            Err(i) => i.saturating_sub(1).min(last - 1),
        };

        let seg = self.cumulative[i + 1] - self.cumulative[i];
        let f = if seg > f32::EPSILON {
            ((s - self.cumulative[i]) / seg).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (i, f)
    }

    pub fn position_at(&self, distance: f32) -> Vec2 {
        let (i, f) = self.locate(distance);
        self.samples[i].lerp(self.samples[i + 1], f)
    }

    pub fn tangent_at(&self, distance: f32) -> Vec2 {
        let (i, f) = self.locate(distance);
        let t = self.tangents[i].lerp(self.tangents[i + 1], f);
        t.try_normalize()
            .or_else(|| (self.samples[i + 1] - self.samples[i]).try_normalize())
            .unwrap_or(Vec2::X)
    }

    pub fn sample_at(&self, distance: f32) -> SplineSample {
        let tangent = self.tangent_at(distance);
        SplineSample {
            distance: distance.clamp(0.0, self.length()),
            position: self.position_at(distance),
            tangent,
            normal: tangent.perp(),
        }
    }

    /// Evenly spaced frames from start to end inclusive. The spacing is the
    /// largest value `<= interval` that divides the length exactly, so
    /// distances are strictly increasing and both ends are always present.
    pub fn resample(&self, interval: f32) -> Vec<SplineSample> {
        let length = self.length();
        let n = ((length / interval.max(1e-3)).ceil() as usize).max(1);
        let step = length / n as f32;

        (0..=n)
            .map(|i| {
                let s = if i == n { length } else { i as f32 * step };
                self.sample_at(s)
            })
            .collect()
    }

    /// Arc-length distance of the closest point on the spline to `p`, and
    /// the distance from `p` to that point.
    pub fn project(&self, p: Vec2) -> (f32, f32) {
        let mut best = (0.0f32, f32::INFINITY);
        for (i, w) in self.samples.windows(2).enumerate() {
            let (t, d) = project_on_segment(p, w[0], w[1]);
            if d < best.1 {
                let s = self.cumulative[i] + t * (self.cumulative[i + 1] - self.cumulative[i]);
                best = (s, d);
            }
        }
        best
    }
}

/// Parameter `t ∈ [0,1]` of the closest point on segment `a→b`, and the
/// distance from `p` to it.
#[inline]
pub fn project_on_segment(p: Vec2, a: Vec2, b: Vec2) -> (f32, f32) {
    let ab = b - a;
    let denom = ab.length_squared() + 1e-12;
    let t = ((p - a).dot(ab) / denom).clamp(0.0, 1.0);
    (t, p.distance(a + ab * t))
}

fn flatten_linear(points: &[Vec2]) -> (Vec<Vec2>, Vec<Vec2>) {
    let mut samples = Vec::new();
    let mut tangents = Vec::new();

    for w in points.windows(2) {
        let dir = (w[1] - w[0]).normalize_or_zero();
        let steps = segment_steps(w[0].distance(w[1]));
        for j in 0..steps {
            samples.push(w[0].lerp(w[1], j as f32 / steps as f32));
            tangents.push(dir);
        }
    }

    let n = points.len();
    samples.push(points[n - 1]);
    tangents.push((points[n - 1] - points[n - 2]).normalize_or_zero());
    (samples, tangents)
}

fn flatten_smooth(points: &[Vec2]) -> (Vec<Vec2>, Vec<Vec2>) {
    let n = points.len();
    let closed = points[0].distance(points[n - 1]) < MIN_POINT_SPACING_M * 10.0 && n > 3;

    // Unit direction at every control point from its two neighbours.
    let dirs: Vec<Vec2> = (0..n)
        .map(|i| {
            let (prev, next) = match i {
                0 if closed => (points[n - 2], points[1]),
                0 => (points[0], points[1]),
                i if i == n - 1 && closed => (points[n - 2], points[1]),
                i if i == n - 1 => (points[n - 2], points[n - 1]),
                i => (points[i - 1], points[i + 1]),
            };
            (next - prev)
                .try_normalize()
                .unwrap_or_else(|| (points[(i + 1).min(n - 1)] - points[i.saturating_sub(1)]).normalize_or_zero())
        })
        .collect();

    let mut samples = Vec::new();
    let mut tangents = Vec::new();

    for i in 0..n - 1 {
        let p0 = points[i];
        let p1 = points[i + 1];
        let chord = p0.distance(p1);
        let m0 = dirs[i] * chord;
        let m1 = dirs[i + 1] * chord;

        let steps = segment_steps(chord);
        for j in 0..steps {
            let t = j as f32 / steps as f32;
            let (pos, deriv) = hermite(p0, m0, p1, m1, t);
            samples.push(pos);
            tangents.push(deriv.try_normalize().unwrap_or(dirs[i]));
        }
    }

    samples.push(points[n - 1]);
    tangents.push(dirs[n - 1]);
    (samples, tangents)
}

#[inline]
fn segment_steps(chord: f32) -> usize {
    ((chord / FLATTEN_STEP_M).ceil() as usize).clamp(1, MAX_STEPS_PER_SEGMENT)
}

/// Cubic Hermite position and derivative.
#[inline]
fn hermite(p0: Vec2, m0: Vec2, p1: Vec2, m1: Vec2, t: f32) -> (Vec2, Vec2) {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    let d00 = 6.0 * t2 - 6.0 * t;
    let d10 = 3.0 * t2 - 4.0 * t + 1.0;
    let d01 = -6.0 * t2 + 6.0 * t;
    let d11 = 3.0 * t2 - 2.0 * t;

    (
        p0 * h00 + m0 * h10 + p1 * h01 + m1 * h11,
        p0 * d00 + m0 * d10 + p1 * d01 + m1 * d11,
    )
}
