//! Static skeleton description: hierarchy, virtual bones, limb marker sets
//! and pole chains.
//!
//! Skeleton JSON follows a versioned schema (`mocapnorm.skeleton.v1`). The
//! [`Default`] skeleton is a humanoid marker set with hips-centred torso and
//! one hierarchy tree per leg.

use std::collections::HashSet;
use std::path::Path;

use crate::bones::BoneDef;
use crate::hierarchy::{Hierarchy, HierarchyError, HierarchyNode};
use crate::pole::PoleTargetSpec;

const SKELETON_SCHEMA_V1: &str = "mocapnorm.skeleton.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Markers of one foot used by contact locking.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FootMarkers {
    pub side: Side,
    pub ankle: String,
    pub heel: String,
    pub foot_index: String,
    /// Markers that follow the ankle height correction (typically knee, hip).
    #[serde(default)]
    pub compensation: Vec<String>,
}

/// Torso root re-centred between the hips after contact locking.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpperBodyMarkers {
    pub root: String,
    pub left_hip: String,
    pub right_hip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkeletonError {
    Hierarchy(HierarchyError),
    DuplicateBone(String),
    InvalidBone { bone: String, reason: String },
    DuplicateFoot(Side),
    InvalidPole { pole: String, reason: String },
}

impl std::fmt::Display for SkeletonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hierarchy(e) => write!(f, "hierarchy: {}", e),
            Self::DuplicateBone(b) => write!(f, "bone '{}' is defined twice", b),
            Self::InvalidBone { bone, reason } => write!(f, "bone '{}': {}", bone, reason),
            Self::DuplicateFoot(side) => write!(f, "{} foot is defined twice", side),
            Self::InvalidPole { pole, reason } => write!(f, "pole '{}': {}", pole, reason),
        }
    }
}

impl std::error::Error for SkeletonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Hierarchy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HierarchyError> for SkeletonError {
    fn from(e: HierarchyError) -> Self {
        Self::Hierarchy(e)
    }
}

/// Runtime skeleton used by the passes.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub name: String,
    pub hierarchy: Hierarchy,
    /// Processing order of the dispersion reducer.
    pub bones: Vec<BoneDef>,
    pub feet: Vec<FootMarkers>,
    pub upper_body: Option<UpperBodyMarkers>,
    pub poles: Vec<PoleTargetSpec>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkeletonSpec {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub hierarchy: Vec<HierarchyNode>,
    #[serde(default)]
    pub bones: Vec<BoneDef>,
    #[serde(default)]
    pub feet: Vec<FootMarkers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_body: Option<UpperBodyMarkers>,
    #[serde(default)]
    pub poles: Vec<PoleTargetSpec>,
}

impl Skeleton {
    /// Load a skeleton from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let spec: SkeletonSpec = serde_json::from_str(data)?;
        if spec.schema != SKELETON_SCHEMA_V1 {
            return Err(format!(
                "unsupported skeleton schema '{}' (expected '{}')",
                spec.schema, SKELETON_SCHEMA_V1
            )
            .into());
        }
        Ok(Self::from_spec(spec)?)
    }

    /// Validate a spec and build the hierarchy arena.
    pub fn from_spec(spec: SkeletonSpec) -> Result<Self, SkeletonError> {
        let hierarchy = Hierarchy::from_nodes(&spec.hierarchy)?;
        validate_bones(&spec.bones)?;
        validate_feet(&spec.feet)?;
        validate_poles(&spec.poles)?;
        Ok(Self {
            name: spec.name,
            hierarchy,
            bones: spec.bones,
            feet: spec.feet,
            upper_body: spec.upper_body,
            poles: spec.poles,
        })
    }

    pub fn bone(&self, name: &str) -> Option<&BoneDef> {
        self.bones.iter().find(|b| b.name == name)
    }

    pub fn foot(&self, side: Side) -> Option<&FootMarkers> {
        self.feet.iter().find(|f| f.side == side)
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::from_spec(SkeletonSpec::humanoid()).expect("humanoid skeleton spec must be valid")
    }
}

fn validate_bones(bones: &[BoneDef]) -> Result<(), SkeletonError> {
    let mut names = HashSet::new();
    for b in bones {
        if !names.insert(b.name.as_str()) {
            return Err(SkeletonError::DuplicateBone(b.name.clone()));
        }
        let invalid = |reason: &str| SkeletonError::InvalidBone {
            bone: b.name.clone(),
            reason: reason.to_string(),
        };
        if b.head.trim().is_empty() || b.tail.trim().is_empty() {
            return Err(invalid("head and tail must be non-empty"));
        }
        if b.head == b.tail {
            return Err(invalid("head and tail must differ"));
        }
        if let Some(r) = b.reference_length {
            if !r.is_finite() || r <= 0.0 {
                return Err(invalid("reference_length must be finite and > 0"));
            }
        }
    }
    Ok(())
}

fn validate_feet(feet: &[FootMarkers]) -> Result<(), SkeletonError> {
    let mut sides = HashSet::new();
    for f in feet {
        if !sides.insert(f.side) {
            return Err(SkeletonError::DuplicateFoot(f.side));
        }
    }
    Ok(())
}

fn validate_poles(poles: &[PoleTargetSpec]) -> Result<(), SkeletonError> {
    for p in poles {
        if !(p.threshold > 0.0 && p.threshold < 1.0) {
            return Err(SkeletonError::InvalidPole {
                pole: p.name.clone(),
                reason: format!("threshold {} must lie in (0, 1)", p.threshold),
            });
        }
    }
    Ok(())
}

// Reference lengths are fractions of standing height.
const HUMANOID_BONES: &[(&str, &str, &str, f64)] = &[
    ("pelvis.L", "hips_center", "left_hip", 0.095),
    ("pelvis.R", "hips_center", "right_hip", 0.095),
    ("spine", "hips_center", "trunk_center", 0.150),
    ("spine.001", "trunk_center", "neck_center", 0.150),
    ("neck", "neck_center", "head_center", 0.100),
    ("shoulder.L", "neck_center", "left_shoulder", 0.129),
    ("shoulder.R", "neck_center", "right_shoulder", 0.129),
    ("upper_arm.L", "left_shoulder", "left_elbow", 0.186),
    ("upper_arm.R", "right_shoulder", "right_elbow", 0.186),
    ("forearm.L", "left_elbow", "left_wrist", 0.146),
    ("forearm.R", "right_elbow", "right_wrist", 0.146),
    ("hand.L", "left_wrist", "left_index", 0.108),
    ("hand.R", "right_wrist", "right_index", 0.108),
    ("thigh.L", "left_hip", "left_knee", 0.245),
    ("thigh.R", "right_hip", "right_knee", 0.245),
    ("shin.L", "left_knee", "left_ankle", 0.246),
    ("shin.R", "right_knee", "right_ankle", 0.246),
    ("heel.L", "left_ankle", "left_heel", 0.039),
    ("heel.R", "right_ankle", "right_heel", 0.039),
    ("foot.L", "left_ankle", "left_foot_index", 0.120),
    ("foot.R", "right_ankle", "right_foot_index", 0.120),
];

impl SkeletonSpec {
    /// Humanoid marker set.
    pub fn humanoid() -> Self {
        let hierarchy = vec![
            HierarchyNode::new("hips_center", &["trunk_center"]),
            HierarchyNode::new("trunk_center", &["neck_center"]),
            HierarchyNode::new(
                "neck_center",
                &["head_center", "left_shoulder", "right_shoulder"],
            ),
            HierarchyNode::new("left_shoulder", &["left_elbow"]),
            HierarchyNode::new("left_elbow", &["left_wrist"]),
            HierarchyNode::new("left_wrist", &["left_index"]),
            HierarchyNode::new("right_shoulder", &["right_elbow"]),
            HierarchyNode::new("right_elbow", &["right_wrist"]),
            HierarchyNode::new("right_wrist", &["right_index"]),
            HierarchyNode::new("left_hip", &["left_knee"]),
            HierarchyNode::new("left_knee", &["left_ankle"]),
            HierarchyNode::new("left_ankle", &["left_heel", "left_foot_index"]),
            HierarchyNode::new("right_hip", &["right_knee"]),
            HierarchyNode::new("right_knee", &["right_ankle"]),
            HierarchyNode::new("right_ankle", &["right_heel", "right_foot_index"]),
        ];

        let bones = HUMANOID_BONES
            .iter()
            .map(|&(name, head, tail, r)| BoneDef::new(name, head, tail).with_reference_length(r))
            .collect();

        let foot = |side: Side| {
            let s = side.to_string();
            FootMarkers {
                side,
                ankle: format!("{}_ankle", s),
                heel: format!("{}_heel", s),
                foot_index: format!("{}_foot_index", s),
                compensation: vec![format!("{}_knee", s), format!("{}_hip", s)],
            }
        };

        let knee_pole = |side: Side| {
            let s = side.to_string();
            PoleTargetSpec {
                name: format!("{}_knee", s),
                base: format!("{}_hip", s),
                pole: format!("{}_knee", s),
                target: format!("{}_ankle", s),
                aux: [format!("{}_foot_index", s), format!("{}_heel", s)],
                threshold: 0.9,
                output: None,
            }
        };

        Self {
            schema: SKELETON_SCHEMA_V1.to_string(),
            name: "humanoid".to_string(),
            hierarchy,
            bones,
            feet: vec![foot(Side::Left), foot(Side::Right)],
            upper_body: Some(UpperBodyMarkers {
                root: "hips_center".to_string(),
                left_hip: "left_hip".to_string(),
                right_hip: "right_hip".to_string(),
            }),
            poles: vec![knee_pole(Side::Left), knee_pole(Side::Right)],
        }
    }
}
