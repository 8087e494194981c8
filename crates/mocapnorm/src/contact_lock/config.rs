use serde::{Deserialize, Serialize};

use crate::skeleton::{FootMarkers, Side};

/// Which feet are locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFoot {
    Left,
    Right,
    #[default]
    Both,
}

impl TargetFoot {
    pub fn includes(self, side: Side) -> bool {
        match self {
            Self::Left => side == Side::Left,
            Self::Right => side == Side::Right,
            Self::Both => true,
        }
    }
}

/// Which foot markers act as contact bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetBaseMarkers {
    FootIndex,
    Heel,
    #[default]
    Both,
}

impl TargetBaseMarkers {
    pub fn markers<'a>(self, foot: &'a FootMarkers) -> Vec<&'a str> {
        match self {
            Self::FootIndex => vec![foot.foot_index.as_str()],
            Self::Heel => vec![foot.heel.as_str()],
            Self::Both => vec![foot.heel.as_str(), foot.foot_index.as_str()],
        }
    }
}

/// Scalar minimiser for the ankle height re-solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightSolver {
    #[default]
    GaussNewton,
    /// Levenberg–Marquardt (`tiny-solver`).
    Lm,
    GoldenSection,
}

/// Contact-lock solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContactLockConfig {
    pub target_foot: TargetFoot,
    pub target_base_markers: TargetBaseMarkers,
    /// A base marker below this height is in contact.
    pub z_threshold: f64,
    pub ground_level: f64,
    /// Windows shorter than this only get the ground floor clamp.
    pub frame_window_min_size: usize,
    pub initial_attenuation_count: usize,
    pub final_attenuation_count: usize,
    /// Freeze x/y over the hard-locked frames.
    pub lock_xy_at_ground_level: bool,
    /// Share of the ankle height change applied to compensation markers.
    pub knee_hip_compensation_coefficient: f64,
    /// Re-centre the torso root between the hips on touched frames.
    pub compensate_upper_body: bool,
    /// Minimum clearance of the initial ankle guess above both bases.
    pub ankle_initial_margin: f64,
    pub solver: HeightSolver,
    /// Iteration budget of the ankle solver.
    pub max_iters: usize,
}

impl Default for ContactLockConfig {
    fn default() -> Self {
        Self {
            target_foot: TargetFoot::Both,
            target_base_markers: TargetBaseMarkers::Both,
            z_threshold: 0.01,
            ground_level: 0.0,
            frame_window_min_size: 10,
            initial_attenuation_count: 10,
            final_attenuation_count: 10,
            lock_xy_at_ground_level: false,
            knee_hip_compensation_coefficient: 1.0,
            compensate_upper_body: true,
            ankle_initial_margin: 0.01,
            solver: HeightSolver::GaussNewton,
            max_iters: 100,
        }
    }
}

impl ContactLockConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.z_threshold.is_finite() || !self.ground_level.is_finite() {
            return Err("z_threshold and ground_level must be finite".to_string());
        }
        if self.frame_window_min_size < 1 {
            return Err("frame_window_min_size must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.knee_hip_compensation_coefficient) {
            return Err(format!(
                "knee_hip_compensation_coefficient must lie in [0, 1], got {}",
                self.knee_hip_compensation_coefficient
            ));
        }
        if !self.ankle_initial_margin.is_finite() || self.ankle_initial_margin < 0.0 {
            return Err(format!(
                "ankle_initial_margin must be finite and >= 0, got {}",
                self.ankle_initial_margin
            ));
        }
        if self.max_iters == 0 {
            return Err("max_iters must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ContactLockConfig::default().validate().is_ok());
    }

    #[test]
    fn coefficient_outside_unit_range_is_rejected() {
        let cfg = ContactLockConfig {
            knee_hip_compensation_coefficient: 1.5,
            ..ContactLockConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ContactLockConfig =
            serde_json::from_str(r#"{"target_foot":"left","solver":"golden_section"}"#)
                .expect("parse");
        assert_eq!(cfg.target_foot, TargetFoot::Left);
        assert_eq!(cfg.solver, HeightSolver::GoldenSection);
        assert_eq!(cfg.frame_window_min_size, 10);
        assert!(serde_json::from_str::<ContactLockConfig>(r#"{"bogus":1}"#).is_err());
    }

    #[test]
    fn base_marker_selection() {
        let foot = FootMarkers {
            side: Side::Left,
            ankle: "a".to_string(),
            heel: "h".to_string(),
            foot_index: "t".to_string(),
            compensation: Vec::new(),
        };
        assert_eq!(TargetBaseMarkers::Both.markers(&foot), vec!["h", "t"]);
        assert_eq!(TargetBaseMarkers::FootIndex.markers(&foot), vec!["t"]);
        assert!(TargetFoot::Right.includes(Side::Right));
        assert!(!TargetFoot::Right.includes(Side::Left));
    }
}
