//! Per-source road parameters and network-wide pipeline knobs.
//!
//! Both are plain serde structs with defaults for every field so a parameter
//! file only has to name what it changes. Validation is explicit and fatal:
//! `validate` is called for every source before the first phase runs.

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// Explicit road-class hint, the first rule of the priority cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadClass {
    Path,
    Service,
    Residential,
    Tertiary,
    Secondary,
    Primary,
    Trunk,
    Motorway,
}

impl RoadClass {
    /// Rank used by the priority cascade. Rank 0 is reserved for "no hint".
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            RoadClass::Path => 1,
            RoadClass::Service => 2,
            RoadClass::Residential => 3,
            RoadClass::Tertiary => 4,
            RoadClass::Secondary => 5,
            RoadClass::Primary => 6,
            RoadClass::Trunk => 7,
            RoadClass::Motorway => 8,
        }
    }
}

/// Curve used in the terrain blend band. Returns the share of the ORIGINAL
/// terrain at normalised distance `t` from the road edge (0 at the edge, 1 at
/// the outer limit of the affected range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFalloff {
    Linear,
    #[default]
    Smoothstep,
    Cosine,
}

impl BlendFalloff {
    #[inline]
    pub fn weight(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            BlendFalloff::Linear => t,
            BlendFalloff::Smoothstep => t * t * (3.0 - 2.0 * t),
            BlendFalloff::Cosine => 0.5 - 0.5 * (std::f32::consts::PI * t).cos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankingParameters {
    pub enabled: bool,
    /// Hard cap on |bank angle|, degrees.
    pub max_bank_angle_deg: f32,
    /// Multiplier on the scaled curvature before saturation.
    pub strength: f32,
    /// Shaping exponent of the curvature→angle curve (> 0).
    pub falloff: f32,
    /// Curvature (1/m) to unit-less banking demand.
    pub curvature_to_bank_scale: f32,
    /// Distance over which banking fades in/out around junction zones, metres.
    pub transition_length_m: f32,
}

impl Default for BankingParameters {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bank_angle_deg: 8.0,
            strength: 1.0,
            falloff: 1.0,
            curvature_to_bank_scale: 50.0,
            transition_length_m: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JunctionParameters {
    pub enable_detection: bool,
    pub enable_harmonization: bool,
    pub detection_radius_m: f32,
    pub blend_distance_m: f32,
}

impl Default for JunctionParameters {
    fn default() -> Self {
        Self {
            enable_detection: true,
            enable_harmonization: true,
            detection_radius_m: 10.0,
            blend_distance_m: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadParameters {
    pub road_width_m: f32,
    /// Rise over run, e.g. 0.08 for 8 %.
    pub max_longitudinal_slope: f32,
    /// Rise over run across the road; also caps the bank angle.
    pub max_transverse_slope: f32,
    pub cross_section_interval_m: f32,
    /// Number of samples taken along each cross-section's normal (odd).
    pub elevation_sample_count: usize,
    /// Length of the longitudinal moving-average window, metres.
    pub smoothing_distance_m: f32,
    /// Blend band beyond the half-width, metres.
    pub terrain_affected_range_m: f32,
    pub road_class: Option<RoadClass>,
    pub is_bridge: bool,
    pub is_tunnel: bool,
    /// Bridges/tunnels with this set keep an elevation profile but never
    /// touch the heightmap.
    pub exclude_structures_from_terrain: bool,
    pub is_roundabout: bool,
    pub banking: BankingParameters,
    pub junction: JunctionParameters,
}

impl Default for RoadParameters {
    fn default() -> Self {
        Self {
            road_width_m: 8.0,
            max_longitudinal_slope: 0.08,
            max_transverse_slope: 0.1,
            cross_section_interval_m: 2.0,
            elevation_sample_count: 5,
            smoothing_distance_m: 20.0,
            terrain_affected_range_m: 6.0,
            road_class: None,
            is_bridge: false,
            is_tunnel: false,
            exclude_structures_from_terrain: true,
            is_roundabout: false,
            banking: BankingParameters::default(),
            junction: JunctionParameters::default(),
        }
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ParameterError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParameterError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ParameterError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ParameterError::Negative { field, value })
    }
}

fn in_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ParameterError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl RoadParameters {
    #[inline]
    pub fn half_width(&self) -> f32 {
        0.5 * self.road_width_m
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        positive("road_width_m", self.road_width_m)?;
        positive("max_longitudinal_slope", self.max_longitudinal_slope)?;
        positive("max_transverse_slope", self.max_transverse_slope)?;
        positive("cross_section_interval_m", self.cross_section_interval_m)?;
        non_negative("smoothing_distance_m", self.smoothing_distance_m)?;
        non_negative("terrain_affected_range_m", self.terrain_affected_range_m)?;

        if self.elevation_sample_count == 0 || self.elevation_sample_count % 2 == 0 {
            return Err(ParameterError::SampleCount(self.elevation_sample_count));
        }

        let b = &self.banking;
        in_range("banking.max_bank_angle_deg", b.max_bank_angle_deg, 0.0, 45.0)?;
        non_negative("banking.strength", b.strength)?;
        positive("banking.falloff", b.falloff)?;
        non_negative("banking.curvature_to_bank_scale", b.curvature_to_bank_scale)?;
        non_negative("banking.transition_length_m", b.transition_length_m)?;

        let j = &self.junction;
        positive("junction.detection_radius_m", j.detection_radius_m)?;
        positive("junction.blend_distance_m", j.blend_distance_m)?;

        Ok(())
    }
}

/// Network-wide knobs that are not tied to a single road source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// A spline whose ends are closer than this is a roundabout.
    pub roundabout_closure_tolerance_m: f32,
    /// Newly detected junctions within this distance of a preserved junction
    /// are discarded.
    pub preserved_junction_radius_m: f32,
    pub max_ramp_angle_deg: f32,
    /// Two arms whose directions differ by less than this from a straight
    /// line form a plain connection, not a junction.
    pub collinear_tolerance_deg: f32,
    /// Allowed deviation from 90° between neighbouring arms of a crossroads.
    pub orthogonal_tolerance_deg: f32,
    pub detect_interior_crossings: bool,
    pub enable_cross_material_harmonization: bool,
    pub terrain_falloff: BlendFalloff,
    /// ε in the inverse-distance weights 1/(d+ε).
    pub consensus_epsilon_m: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roundabout_closure_tolerance_m: 15.0,
            preserved_junction_radius_m: 15.0,
            max_ramp_angle_deg: 20.0,
            collinear_tolerance_deg: 20.0,
            orthogonal_tolerance_deg: 25.0,
            detect_interior_crossings: true,
            enable_cross_material_harmonization: true,
            terrain_falloff: BlendFalloff::Smoothstep,
            consensus_epsilon_m: 0.1,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ParameterError> {
        positive("roundabout_closure_tolerance_m", self.roundabout_closure_tolerance_m)?;
        non_negative("preserved_junction_radius_m", self.preserved_junction_radius_m)?;
        in_range("max_ramp_angle_deg", self.max_ramp_angle_deg, 0.0, 90.0)?;
        in_range("collinear_tolerance_deg", self.collinear_tolerance_deg, 0.0, 90.0)?;
        in_range("orthogonal_tolerance_deg", self.orthogonal_tolerance_deg, 0.0, 45.0)?;
        positive("consensus_epsilon_m", self.consensus_epsilon_m)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RoadParameters::default().validate().is_ok());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn even_sample_count_is_rejected() {
        let params = RoadParameters {
            elevation_sample_count: 4,
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(ParameterError::SampleCount(4)));
    }

    #[test]
    fn nan_width_is_rejected() {
        let params = RoadParameters {
            road_width_m: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::NotPositive { field: "road_width_m", .. })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: RoadParameters = serde_json::from_str(
            r#"{ "road_width_m": 12.0, "road_class": "primary", "banking": { "enabled": true } }"#,
        )
        .unwrap();

        assert_eq!(params.road_width_m, 12.0);
        assert_eq!(params.road_class, Some(RoadClass::Primary));
        assert!(params.banking.enabled);
        assert_eq!(params.banking.max_bank_angle_deg, 8.0);
        assert_eq!(params.junction.blend_distance_m, 30.0);
    }

    #[test]
    fn falloff_curves_hit_endpoints() {
        for f in [BlendFalloff::Linear, BlendFalloff::Smoothstep, BlendFalloff::Cosine] {
            assert!(f.weight(0.0).abs() < 1e-6);
            assert!((f.weight(1.0) - 1.0).abs() < 1e-6);
            assert!(f.weight(0.25) <= f.weight(0.75));
        }
    }
}
