//! Errors shared by the batch passes.
//!
//! Only conditions that make a whole bone, limb or chain unusable surface as
//! [`PassError`]. Per-frame problems (undefined samples, zero-length bones,
//! solver non-convergence) are counted in the pass reports and logged instead.

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum PassError {
    /// A configured marker has no trajectory in the store.
    MissingTrajectory(String),
    /// A configuration value is out of its documented range.
    InvalidConfig(String),
    /// Writing back to the store failed.
    Store(StoreError),
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTrajectory(name) => write!(f, "missing trajectory '{}'", name),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for PassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for PassError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
