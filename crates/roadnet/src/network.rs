//! The unified road-network data model.
//!
//! Splines, cross-sections and junctions live in flat arenas addressed by
//! integer ids. Cross-references (cross-section → owning spline, junction →
//! participating cross-sections) are ids, never pointers, so every phase can
//! mutate the collections in bulk.

use glam::Vec2;
use serde::Serialize;
use smallvec::SmallVec;

use crate::params::RoadParameters;
use crate::spline::{RoadSpline, SplineSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SplineId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CrossSectionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JunctionId(pub u32);

impl SplineId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl CrossSectionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl JunctionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Splines
// ============================================================================

/// A spline plus everything the pipeline needs to know about the road it
/// describes.
#[derive(Debug, Clone)]
pub struct ParameterizedRoadSpline {
    pub id: SplineId,
    pub spline: RoadSpline,
    pub parameters: RoadParameters,
    /// Material / source name the road came from.
    pub material: String,
    /// Position of the source in the input list (last rule of the priority
    /// cascade).
    pub source_order: usize,
    /// Network-wide priority, larger governs.
    pub priority: i32,
    pub is_roundabout: bool,
    pub is_bridge: bool,
    pub is_tunnel: bool,
}

impl ParameterizedRoadSpline {
    #[inline]
    pub fn half_width(&self) -> f32 {
        self.parameters.half_width()
    }

    /// Roundabouts never bank, whatever their curvature.
    #[inline]
    pub fn banking_enabled(&self) -> bool {
        self.parameters.banking.enabled && !self.is_roundabout
    }

    #[inline]
    pub fn is_excluded_structure(&self) -> bool {
        (self.is_bridge || self.is_tunnel) && self.parameters.exclude_structures_from_terrain
    }
}

// ============================================================================
// Junction-aware banking state
// ============================================================================

/// How a cross-section's banking reacts to a nearby junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum JunctionBankingBehavior {
    /// No junction influence.
    #[default]
    Normal,
    /// Governing road: keep the curvature-driven bank.
    MaintainBanking,
    /// Secondary road: tilt so the edge facing `primary` meets its banked
    /// surface.
    AdaptToHigherPriority { primary: CrossSectionId },
    /// Equal-priority roads meeting: flatten towards zero bank.
    SuppressBanking,
}

impl JunctionBankingBehavior {
    #[inline]
    fn strength(self) -> u8 {
        match self {
            JunctionBankingBehavior::Normal => 0,
            JunctionBankingBehavior::MaintainBanking => 1,
            JunctionBankingBehavior::SuppressBanking => 2,
            JunctionBankingBehavior::AdaptToHigherPriority { .. } => 3,
        }
    }

    /// The behaviour demanded by one neighbouring junction participant.
    /// `zone` is the distance within which the junction has any influence;
    /// `neighbor_section` is the neighbour's cross-section at the junction.
    pub fn demanded(
        own_priority: i32,
        neighbor_priority: i32,
        distance_to_junction: f32,
        zone: f32,
        neighbor_section: CrossSectionId,
    ) -> Self {
        if distance_to_junction > zone {
            return JunctionBankingBehavior::Normal;
        }
        match own_priority.cmp(&neighbor_priority) {
            std::cmp::Ordering::Greater => JunctionBankingBehavior::MaintainBanking,
            std::cmp::Ordering::Equal => JunctionBankingBehavior::SuppressBanking,
            std::cmp::Ordering::Less => JunctionBankingBehavior::AdaptToHigherPriority {
                primary: neighbor_section,
            },
        }
    }

    /// Transition to the stronger of the current state and the state
    /// demanded by the neighbour. On a tie the current state is kept.
    pub fn transition(
        self,
        own_priority: i32,
        neighbor_priority: i32,
        distance_to_junction: f32,
        zone: f32,
        neighbor_section: CrossSectionId,
    ) -> Self {
        let demanded = Self::demanded(
            own_priority,
            neighbor_priority,
            distance_to_junction,
            zone,
            neighbor_section,
        );
        if demanded.strength() > self.strength() {
            demanded
        } else {
            self
        }
    }
}

// ============================================================================
// Cross-sections
// ============================================================================

#[derive(Debug, Clone)]
pub struct CrossSection {
    pub id: CrossSectionId,
    pub spline: SplineId,
    /// Strictly increasing along the owning spline.
    pub local_index: u32,
    /// Arc-length distance from the spline start.
    pub distance: f32,
    pub position: Vec2,
    pub tangent: Vec2,
    /// Unit left normal.
    pub normal: Vec2,
    pub half_width: f32,
    target_elevation: Option<f32>,
    /// Raw (median-sampled) terrain elevation before smoothing.
    pub original_elevation: Option<f32>,
    /// Elevation before the first junction/roundabout harmonization pass.
    pub harmonization_baseline: Option<f32>,
    /// Normalised distance `t` to the junction whose blend currently owns
    /// this section; the nearest junction wins.
    pub junction_influence: Option<f32>,
    /// Signed curvature (1/m), positive for left turns.
    pub curvature: f32,
    /// Radians, positive raises the left edge.
    pub bank_angle: f32,
    pub left_edge_elevation: Option<f32>,
    pub right_edge_elevation: Option<f32>,
    pub excluded: bool,
    pub banking_behavior: JunctionBankingBehavior,
}

impl CrossSection {
    pub fn new(id: CrossSectionId, spline: SplineId, local_index: u32, sample: SplineSample, half_width: f32) -> Self {
        Self {
            id,
            spline,
            local_index,
            distance: sample.distance,
            position: sample.position,
            tangent: sample.tangent,
            normal: sample.normal,
            half_width,
            target_elevation: None,
            original_elevation: None,
            harmonization_baseline: None,
            junction_influence: None,
            curvature: 0.0,
            bank_angle: 0.0,
            left_edge_elevation: None,
            right_edge_elevation: None,
            excluded: false,
            banking_behavior: JunctionBankingBehavior::Normal,
        }
    }

    /// `None` means "uncalculated"; there is no default elevation.
    #[inline]
    pub fn target_elevation(&self) -> Option<f32> {
        self.target_elevation
    }

    /// Profile assignment by the elevation phase. Non-finite input leaves the
    /// section uncalculated.
    #[inline]
    pub fn set_profile_elevation(&mut self, elevation: Option<f32>) {
        self.target_elevation = elevation.filter(|e| e.is_finite());
    }

    /// Later-phase assignment. Excluded sections keep their profile; returns
    /// whether the value was applied.
    #[inline]
    pub fn assign_target_elevation(&mut self, elevation: f32) -> bool {
        if self.excluded || !elevation.is_finite() {
            return false;
        }
        self.target_elevation = Some(elevation);
        true
    }

    /// Elevation the harmonizers blend from. Recorded on first use so
    /// repeated passes start from the same values.
    pub fn baseline_elevation(&mut self) -> Option<f32> {
        if self.harmonization_baseline.is_none() {
            self.harmonization_baseline = self.target_elevation;
        }
        self.harmonization_baseline
    }

    /// Writes a harmonized elevation blended at normalised distance `t` from
    /// its junction, unless a nearer junction already owns the section.
    pub fn apply_harmonized(&mut self, elevation: f32, t: f32) -> bool {
        if self.junction_influence.is_some_and(|owner| owner < t) {
            return false;
        }
        if !self.assign_target_elevation(elevation) {
            return false;
        }
        self.junction_influence = Some(t);
        true
    }

    /// `left = center + hw·sin(bank)`, `right = center − hw·sin(bank)`.
    pub fn update_edges(&mut self) {
        match self.target_elevation {
            Some(center) => {
                let rise = self.half_width * self.bank_angle.sin();
                self.left_edge_elevation = Some(center + rise);
                self.right_edge_elevation = Some(center - rise);
            }
            None => {
                self.left_edge_elevation = None;
                self.right_edge_elevation = None;
            }
        }
    }

    /// Elevation of the banked road surface at world point `p`, taking its
    /// lateral offset along the normal (clamped to the carriageway).
    pub fn surface_elevation_at(&self, p: Vec2) -> Option<f32> {
        let center = self.target_elevation?;
        let offset = (p - self.position)
            .dot(self.normal)
            .clamp(-self.half_width, self.half_width);
        Some(center + offset * self.bank_angle.sin())
    }
}

// ============================================================================
// Junctions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JunctionKind {
    /// Two road ends meeting at an angle.
    Endpoint,
    TJunction,
    CrossRoads,
    Complex,
    Roundabout,
    /// Two splines crossing away from their ends.
    MidSplineCrossing,
}

/// Where a junction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JunctionOrigin {
    Geometric,
    /// Geometric cluster whose position was taken from an external hint.
    ExplicitHint,
    /// Managed outside detection (roundabouts); survives re-detection.
    Preserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JunctionParticipant {
    pub cross_section: CrossSectionId,
    pub spline: SplineId,
    /// The spline ends here (one arm) rather than passing through (two arms).
    pub at_endpoint: bool,
}

#[derive(Debug, Clone)]
pub struct Junction {
    pub id: JunctionId,
    pub position: Vec2,
    pub kind: JunctionKind,
    pub participants: SmallVec<[JunctionParticipant; 4]>,
    pub excluded: bool,
    pub exclusion_reason: Option<String>,
    pub cross_material: bool,
    pub origin: JunctionOrigin,
}

impl Junction {
    pub fn new(position: Vec2, kind: JunctionKind, origin: JunctionOrigin) -> Self {
        Self {
            id: JunctionId(0),
            position,
            kind,
            participants: SmallVec::new(),
            excluded: false,
            exclusion_reason: None,
            cross_material: false,
            origin,
        }
    }

    pub fn exclude(&mut self, reason: impl Into<String>) {
        self.excluded = true;
        self.exclusion_reason = Some(reason.into());
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    splines: Vec<ParameterizedRoadSpline>,
    cross_sections: Vec<CrossSection>,
    junctions: Vec<Junction>,
    /// Cross-section ids per spline, ordered by local index.
    by_spline: Vec<Vec<CrossSectionId>>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a spline; its `id` field is overwritten with the arena id.
    pub fn add_spline(&mut self, mut spline: ParameterizedRoadSpline) -> SplineId {
        let id = SplineId(self.splines.len() as u32);
        spline.id = id;
        self.splines.push(spline);
        self.by_spline.push(Vec::new());
        id
    }

    /// Appends cross-sections for `spline` from ordered samples.
    pub fn add_cross_sections(&mut self, spline: SplineId, samples: &[SplineSample]) {
        let half_width = self.splines[spline.index()].half_width();
        let excluded = self.splines[spline.index()].is_excluded_structure();
        let start_index = self.by_spline[spline.index()].len() as u32;

        for (i, sample) in samples.iter().enumerate() {
            let id = CrossSectionId(self.cross_sections.len() as u32);
            let mut cs = CrossSection::new(id, spline, start_index + i as u32, *sample, half_width);
            cs.excluded = excluded;
            self.cross_sections.push(cs);
            self.by_spline[spline.index()].push(id);
        }
    }

    #[inline]
    pub fn splines(&self) -> &[ParameterizedRoadSpline] {
        &self.splines
    }

    #[inline]
    pub fn spline(&self, id: SplineId) -> &ParameterizedRoadSpline {
        &self.splines[id.index()]
    }

    #[inline]
    pub fn spline_mut(&mut self, id: SplineId) -> &mut ParameterizedRoadSpline {
        &mut self.splines[id.index()]
    }

    #[inline]
    pub fn cross_sections(&self) -> &[CrossSection] {
        &self.cross_sections
    }

    #[inline]
    pub fn cross_sections_mut(&mut self) -> &mut [CrossSection] {
        &mut self.cross_sections
    }

    #[inline]
    pub fn cross_section(&self, id: CrossSectionId) -> &CrossSection {
        &self.cross_sections[id.index()]
    }

    #[inline]
    pub fn cross_section_mut(&mut self, id: CrossSectionId) -> &mut CrossSection {
        &mut self.cross_sections[id.index()]
    }

    /// Cross-section ids of one spline in local-index order.
    #[inline]
    pub fn sections_of(&self, spline: SplineId) -> &[CrossSectionId] {
        &self.by_spline[spline.index()]
    }

    pub fn first_section(&self, spline: SplineId) -> Option<CrossSectionId> {
        self.sections_of(spline).first().copied()
    }

    pub fn last_section(&self, spline: SplineId) -> Option<CrossSectionId> {
        self.sections_of(spline).last().copied()
    }

    /// Target elevations of one spline in order.
    pub fn elevations_of(&self, spline: SplineId) -> Vec<Option<f32>> {
        self.sections_of(spline)
            .iter()
            .map(|&id| self.cross_section(id).target_elevation())
            .collect()
    }

    #[inline]
    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    #[inline]
    pub fn junction(&self, id: JunctionId) -> &Junction {
        &self.junctions[id.index()]
    }

    /// Copies of every junction managed outside detection.
    pub fn preserved_junctions(&self) -> Vec<Junction> {
        self.junctions
            .iter()
            .filter(|j| j.origin == JunctionOrigin::Preserved)
            .cloned()
            .collect()
    }

    /// Adds an out-of-band junction that survives re-detection.
    pub fn add_preserved_junction(&mut self, mut junction: Junction) -> JunctionId {
        let id = JunctionId(self.junctions.len() as u32);
        junction.id = id;
        junction.origin = JunctionOrigin::Preserved;
        self.junctions.push(junction);
        id
    }

    /// Drops preserved junctions of `kind` (before a manager re-adds them).
    pub fn remove_preserved_junctions(&mut self, kind: JunctionKind) {
        self.junctions
            .retain(|j| !(j.origin == JunctionOrigin::Preserved && j.kind == kind));
        self.renumber_junctions();
    }

    /// Replaces all detected junctions. Preserved junctions are snapshotted
    /// and restored; a detected junction within `preserve_radius` of a
    /// restored one is discarded. The per-spline index is rebuilt.
    pub fn replace_detected_junctions(&mut self, detected: Vec<Junction>, preserve_radius: f32) {
        let preserved = self.preserved_junctions();

        let mut merged = preserved.clone();
        let mut discarded = 0usize;
        for j in detected {
            let overlaps = preserved
                .iter()
                .any(|p| p.position.distance(j.position) <= preserve_radius);
            if overlaps {
                discarded += 1;
            } else {
                merged.push(j);
            }
        }

        if discarded > 0 {
            log::debug!(
                "Discarded {} detected junction(s) overlapping {} preserved junction(s)",
                discarded,
                preserved.len()
            );
        }

        self.junctions = merged;
        self.renumber_junctions();
        self.rebuild_index();
    }

    fn renumber_junctions(&mut self) {
        for (i, j) in self.junctions.iter_mut().enumerate() {
            j.id = JunctionId(i as u32);
        }
    }

    /// Records the harmonization baseline of every section that has none yet,
    /// then resets every section to it. Harmonization passes start here.
    pub fn restore_baselines(&mut self) {
        for cs in &mut self.cross_sections {
            if let Some(base) = cs.baseline_elevation() {
                if !cs.excluded {
                    cs.target_elevation = Some(base);
                }
            }
            cs.junction_influence = None;
        }
    }

    /// Rebuilds the cross-section-by-spline index from scratch.
    pub fn rebuild_index(&mut self) {
        let mut by_spline: Vec<Vec<CrossSectionId>> = vec![Vec::new(); self.splines.len()];
        for cs in &self.cross_sections {
            by_spline[cs.spline.index()].push(cs.id);
        }
        for ids in &mut by_spline {
            ids.sort_by_key(|id| self.cross_sections[id.index()].local_index);
        }
        self.by_spline = by_spline;
    }

    /// Arc-length distance between two sections of the same spline.
    #[inline]
    pub fn along_distance(&self, a: CrossSectionId, b: CrossSectionId) -> f32 {
        (self.cross_section(a).distance - self.cross_section(b).distance).abs()
    }

    /// Closest cross-section of `spline` to world point `p`.
    pub fn nearest_section(&self, spline: SplineId, p: Vec2) -> Option<CrossSectionId> {
        self.sections_of(spline).iter().copied().min_by(|&a, &b| {
            let da = self.cross_section(a).position.distance_squared(p);
            let db = self.cross_section(b).position.distance_squared(p);
            da.total_cmp(&db)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::InterpolationMode;

    fn straight(network: &mut RoadNetwork, from: Vec2, to: Vec2) -> SplineId {
        let spline = RoadSpline::new(&[from, to], InterpolationMode::Linear).unwrap();
        let samples = spline.resample(5.0);
        let id = network.add_spline(ParameterizedRoadSpline {
            id: SplineId(0),
            spline,
            parameters: RoadParameters::default(),
            material: "asphalt".into(),
            source_order: 0,
            priority: 0,
            is_roundabout: false,
            is_bridge: false,
            is_tunnel: false,
        });
        network.add_cross_sections(id, &samples);
        id
    }

    #[test]
    fn index_follows_local_order() {
        let mut net = RoadNetwork::new();
        let a = straight(&mut net, Vec2::ZERO, Vec2::new(50.0, 0.0));
        let b = straight(&mut net, Vec2::new(0.0, 10.0), Vec2::new(0.0, 60.0));

        assert_eq!(net.sections_of(a).len(), 11);
        assert_eq!(net.sections_of(b).len(), 11);
        for ids in [net.sections_of(a), net.sections_of(b)] {
            for w in ids.windows(2) {
                let (x, y) = (net.cross_section(w[0]), net.cross_section(w[1]));
                assert!(x.local_index < y.local_index && x.distance < y.distance);
            }
        }

        net.rebuild_index();
        assert_eq!(net.sections_of(a).len(), 11);
    }

    #[test]
    fn excluded_sections_keep_their_profile() {
        let mut net = RoadNetwork::new();
        let a = straight(&mut net, Vec2::ZERO, Vec2::new(10.0, 0.0));
        let id = net.first_section(a).unwrap();
        let cs = net.cross_section_mut(id);

        cs.set_profile_elevation(Some(12.0));
        cs.excluded = true;
        assert!(!cs.assign_target_elevation(3.0));
        assert_eq!(cs.target_elevation(), Some(12.0));
    }

    #[test]
    fn nan_profile_stays_uncalculated() {
        let mut net = RoadNetwork::new();
        let a = straight(&mut net, Vec2::ZERO, Vec2::new(10.0, 0.0));
        let cs = net.cross_section_mut(net.first_section(a).unwrap());
        cs.set_profile_elevation(Some(f32::NAN));
        assert_eq!(cs.target_elevation(), None);
        cs.update_edges();
        assert_eq!(cs.left_edge_elevation, None);
    }

    #[test]
    fn edges_follow_bank() {
        let mut net = RoadNetwork::new();
        let a = straight(&mut net, Vec2::ZERO, Vec2::new(10.0, 0.0));
        let cs = net.cross_section_mut(net.first_section(a).unwrap());
        cs.set_profile_elevation(Some(100.0));
        cs.bank_angle = 0.1;
        cs.update_edges();

        let rise = 4.0 * 0.1f32.sin();
        assert!((cs.left_edge_elevation.unwrap() - (100.0 + rise)).abs() < 1e-5);
        assert!((cs.right_edge_elevation.unwrap() - (100.0 - rise)).abs() < 1e-5);
        // Left normal of an eastbound road is +y.
        let left = cs.surface_elevation_at(cs.position + Vec2::new(0.0, 10.0)).unwrap();
        assert!((left - cs.left_edge_elevation.unwrap()).abs() < 1e-5);
    }

    #[test]
    fn nearest_junction_owns_a_section() {
        let mut net = RoadNetwork::new();
        let a = straight(&mut net, Vec2::ZERO, Vec2::new(10.0, 0.0));
        let cs = net.cross_section_mut(net.first_section(a).unwrap());
        cs.set_profile_elevation(Some(5.0));
        assert_eq!(cs.baseline_elevation(), Some(5.0));

        assert!(cs.apply_harmonized(8.0, 0.5));
        assert!(!cs.apply_harmonized(9.0, 0.7));
        assert!(cs.apply_harmonized(7.0, 0.2));
        assert_eq!(cs.target_elevation(), Some(7.0));

        net.restore_baselines();
        let cs = net.cross_section(net.first_section(a).unwrap());
        assert_eq!(cs.target_elevation(), Some(5.0));
        assert_eq!(cs.junction_influence, None);
    }

    #[test]
    fn redetection_keeps_preserved_junctions() {
        let mut net = RoadNetwork::new();
        straight(&mut net, Vec2::ZERO, Vec2::new(10.0, 0.0));

        net.add_preserved_junction(Junction::new(
            Vec2::new(100.0, 100.0),
            JunctionKind::Roundabout,
            JunctionOrigin::Preserved,
        ));

        let overlapping = Junction::new(Vec2::new(105.0, 100.0), JunctionKind::TJunction, JunctionOrigin::Geometric);
        let far = Junction::new(Vec2::new(300.0, 0.0), JunctionKind::TJunction, JunctionOrigin::Geometric);
        net.replace_detected_junctions(vec![overlapping, far], 15.0);

        assert_eq!(net.junctions().len(), 2);
        assert_eq!(net.junctions()[0].kind, JunctionKind::Roundabout);
        assert_eq!(net.junctions()[1].position, Vec2::new(300.0, 0.0));
        assert_eq!(net.junctions()[1].id, JunctionId(1));

        // A second detection pass replaces the geometric junction only.
        net.replace_detected_junctions(Vec::new(), 15.0);
        assert_eq!(net.junctions().len(), 1);
        assert_eq!(net.junctions()[0].origin, JunctionOrigin::Preserved);
    }

    #[test]
    fn banking_transition_prefers_stronger_state() {
        let primary = CrossSectionId(7);
        let s = JunctionBankingBehavior::Normal;

        assert_eq!(s.transition(5, 10, 50.0, 30.0, primary), JunctionBankingBehavior::Normal);
        assert_eq!(s.transition(10, 5, 5.0, 30.0, primary), JunctionBankingBehavior::MaintainBanking);
        assert_eq!(s.transition(5, 5, 5.0, 30.0, primary), JunctionBankingBehavior::SuppressBanking);

        let adapt = s.transition(5, 10, 5.0, 30.0, primary);
        assert_eq!(adapt, JunctionBankingBehavior::AdaptToHigherPriority { primary });
        // Once adapting, a weaker demand does not downgrade the state.
        assert_eq!(adapt.transition(5, 1, 5.0, 30.0, CrossSectionId(1)), adapt);
    }
}
