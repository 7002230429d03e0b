//! R-tree entries for road segments.

use glam::Vec2;
use rstar::{RTree, RTreeObject, AABB};

use crate::network::SplineId;

/// One straight piece of a road, with its bounding box grown by `pad`.
#[derive(Debug, Clone)]
pub struct SegmentBox {
    pub spline: SplineId,
    /// Index of the segment's first vertex in whatever sequence it was cut
    /// from (polyline vertex or cross-section position).
    pub index: u32,
    pub a: Vec2,
    pub b: Vec2,
    env: AABB<[f32; 2]>,
}

impl SegmentBox {
    pub fn new(spline: SplineId, index: u32, a: Vec2, b: Vec2, pad: f32) -> Self {
        let lo = a.min(b) - Vec2::splat(pad);
        let hi = a.max(b) + Vec2::splat(pad);
        Self {
            spline,
            index,
            a,
            b,
            env: AABB::from_corners([lo.x, lo.y], [hi.x, hi.y]),
        }
    }

    /// Box of the segment without padding.
    pub fn bare_envelope(&self) -> AABB<[f32; 2]> {
        let lo = self.a.min(self.b);
        let hi = self.a.max(self.b);
        AABB::from_corners([lo.x, lo.y], [hi.x, hi.y])
    }
}

impl RTreeObject for SegmentBox {
    type Envelope = AABB<[f32; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Segments whose padded box contains `p`.
pub fn segments_near(tree: &RTree<SegmentBox>, p: Vec2) -> impl Iterator<Item = &SegmentBox> {
    tree.locate_in_envelope_intersecting(&AABB::from_point([p.x, p.y]))
}

/// Proper intersection point of segments `ab` and `cd`, if any.
pub fn segment_intersection(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> Option<Vec2> {
    let r = b - a;
    let s = d - c;
    let denom = r.perp_dot(s);
    if denom.abs() < 1e-9 {
        return None;
    }
    let t = (c - a).perp_dot(s) / denom;
    let u = (c - a).perp_dot(r) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a + r * t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_segments_meet() {
        let p = segment_intersection(
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(4.0, -3.0),
            Vec2::new(4.0, 3.0),
        )
        .unwrap();
        assert!((p - Vec2::new(4.0, 0.0)).length() < 1e-5);

        assert!(segment_intersection(Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::new(1.0, 1.0)).is_none());
        assert!(segment_intersection(Vec2::ZERO, Vec2::X, Vec2::new(2.0, -1.0), Vec2::new(2.0, 1.0)).is_none());
    }

    #[test]
    fn padded_boxes_are_found() {
        let tree = RTree::bulk_load(vec![
            SegmentBox::new(SplineId(0), 0, Vec2::ZERO, Vec2::new(10.0, 0.0), 2.0),
            SegmentBox::new(SplineId(1), 0, Vec2::new(50.0, 50.0), Vec2::new(60.0, 50.0), 2.0),
        ]);
        let hits: Vec<_> = segments_near(&tree, Vec2::new(5.0, 1.5)).map(|s| s.spline).collect();
        assert_eq!(hits, vec![SplineId(0)]);
    }
}
