//! Registry record for an installed toolkit.

use crate::ToolkitManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a toolkit bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Shipped with the host; cannot be uninstalled or overwritten by upload.
    Builtin,
    /// Uploaded by an operator.
    Uploaded,
    /// Installed from the community catalog.
    Community,
}

impl Origin {
    pub fn is_builtin(self) -> bool {
        matches!(self, Self::Builtin)
    }
}

/// Whether the toolkit's backend and task contributions are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    Mounted,
    MountFailed { error: String },
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted)
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::MountFailed { error } => Some(error),
            _ => None,
        }
    }
}

/// Public view of an installed toolkit.
///
/// Carries no filesystem location; the registry derives bundle paths
/// internally from its own storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitRecord {
    #[serde(flatten)]
    pub manifest: ToolkitManifest,
    pub enabled: bool,
    pub origin: Origin,
    /// Monotonic version token, bumped on every install or replace.
    pub updated_at: u64,
    pub installed_at: DateTime<Utc>,
    pub mount_state: MountState,
}

impl ToolkitRecord {
    pub fn new(manifest: ToolkitManifest, origin: Origin, updated_at: u64) -> Self {
        Self {
            manifest,
            enabled: false,
            origin,
            updated_at,
            installed_at: Utc::now(),
            mount_state: MountState::Unmounted,
        }
    }

    pub fn slug(&self) -> &str {
        self.manifest.slug.as_str()
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Records a failed mount. A failed mount always leaves the toolkit disabled.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.enabled = false;
        self.mount_state = MountState::MountFailed {
            error: error.into(),
        };
    }

    pub fn mark_mounted(&mut self) {
        self.enabled = true;
        self.mount_state = MountState::Mounted;
    }

    pub fn mark_unmounted(&mut self) {
        self.enabled = false;
        self.mount_state = MountState::Unmounted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ToolkitManifest {
        ToolkitManifest::from_json(br#"{"slug":"demo","name":"Demo","version":"1.0.0"}"#, None)
            .unwrap()
    }

    #[test]
    fn new_record_is_disabled_and_unmounted() {
        let r = ToolkitRecord::new(manifest(), Origin::Uploaded, 7);
        assert!(!r.enabled);
        assert_eq!(r.mount_state, MountState::Unmounted);
        assert_eq!(r.updated_at, 7);
    }

    #[test]
    fn mount_failure_forces_disabled() {
        let mut r = ToolkitRecord::new(manifest(), Origin::Uploaded, 1);
        r.mark_mounted();
        assert!(r.enabled);
        r.mark_failed("boom");
        assert!(!r.enabled);
        assert_eq!(r.mount_state.last_error(), Some("boom"));
    }

    #[test]
    fn json_shape_is_flat() {
        let r = ToolkitRecord::new(manifest(), Origin::Community, 3);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["slug"], "demo");
        assert_eq!(v["origin"], "community");
        assert_eq!(v["mount_state"]["state"], "unmounted");
        assert!(v.get("storage_root").is_none());

        let back: ToolkitRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
