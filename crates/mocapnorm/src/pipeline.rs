//! Full normalisation run: dispersion reduction, contact locking and pole
//! targets, in that order, over one store.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contact_lock::{lock_contacts, ContactLockConfig, ContactLockReport};
use crate::dispersion::{reduce_dispersion, DispersionConfig, DispersionReport};
use crate::error::PassError;
use crate::pole::{apply_pole_targets, PoleReport};
use crate::skeleton::Skeleton;
use crate::store::TrajectoryStore;

/// Which passes run and with what settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeConfig {
    pub reduce_dispersion: bool,
    pub dispersion: DispersionConfig,
    pub lock_contacts: bool,
    pub contact_lock: ContactLockConfig,
    pub add_pole_targets: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            reduce_dispersion: true,
            dispersion: DispersionConfig::default(),
            lock_contacts: true,
            contact_lock: ContactLockConfig::default(),
            add_pole_targets: true,
        }
    }
}

impl NormalizeConfig {
    /// Load from JSON; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.dispersion
            .validate()
            .map_err(|e| format!("dispersion: {}", e))?;
        self.contact_lock
            .validate()
            .map_err(|e| format!("contact_lock: {}", e))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispersion: Option<DispersionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_lock: Option<ContactLockReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poles: Option<PoleReport>,
}

/// Run the enabled passes in order.
///
/// Bone statistics are recomputed inside each pass, so later passes see the
/// corrections of earlier ones.
pub fn normalize(
    store: &mut dyn TrajectoryStore,
    skeleton: &Skeleton,
    config: &NormalizeConfig,
) -> Result<NormalizeReport, PassError> {
    config.validate().map_err(PassError::InvalidConfig)?;

    let mut report = NormalizeReport::default();
    if config.reduce_dispersion {
        report.dispersion = Some(reduce_dispersion(
            store,
            &skeleton.hierarchy,
            &skeleton.bones,
            &config.dispersion,
        )?);
    }
    if config.lock_contacts {
        report.contact_lock = Some(lock_contacts(store, skeleton, &config.contact_lock)?);
    }
    if config.add_pole_targets {
        report.poles = Some(apply_pole_targets(store, &skeleton.poles)?);
    }
    Ok(report)
}
