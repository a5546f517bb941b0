//! On-disk registry state: `<storage_root>/.registry.json`.

use crate::RegistryError;
use opsdeck_types::ToolkitRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) const STATE_FILE_NAME: &str = ".registry.json";
const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    toolkits: Vec<ToolkitRecord>,
}

pub(crate) fn state_path(storage_root: &Path) -> PathBuf {
    storage_root.join(STATE_FILE_NAME)
}

/// Loads persisted records. A missing file is an empty registry.
pub(crate) fn load(storage_root: &Path) -> Result<Vec<ToolkitRecord>, RegistryError> {
    let path = state_path(storage_root);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let state: PersistedState = serde_json::from_slice(&bytes)
        .map_err(|e| RegistryError::State(format!("{}: {e}", path.display())))?;
    if state.version != STATE_VERSION {
        return Err(RegistryError::State(format!(
            "unsupported state version {}",
            state.version
        )));
    }
    Ok(state.toolkits)
}

/// Replaces the state file in one rename.
pub(crate) fn save(storage_root: &Path, toolkits: Vec<ToolkitRecord>) -> Result<(), RegistryError> {
    let state = PersistedState {
        version: STATE_VERSION,
        toolkits,
    };
    let json = serde_json::to_vec_pretty(&state)
        .map_err(|e| RegistryError::State(e.to_string()))?;

    fs::create_dir_all(storage_root)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".registry-")
        .suffix(".tmp")
        .tempfile_in(storage_root)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(state_path(storage_root))
        .map_err(|e| RegistryError::Io(e.error))?;
    debug!(records = state.toolkits.len(), "Registry state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_types::{Origin, ToolkitManifest};
    use pretty_assertions::assert_eq;

    fn record(slug: &str, token: u64) -> ToolkitRecord {
        let json = format!(r#"{{"slug":"{slug}","name":"{slug}","version":"1.0.0"}}"#);
        let manifest = ToolkitManifest::from_json(json.as_bytes(), None).unwrap();
        ToolkitRecord::new(manifest, Origin::Uploaded, token)
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_records() {
        let tmp = tempfile::tempdir().unwrap();
        let mut failed = record("beta", 2);
        failed.mark_failed("boom");
        let records = vec![record("alpha", 1), failed];

        save(tmp.path(), records.clone()).unwrap();
        assert_eq!(load(tmp.path()).unwrap(), records);

        let leftovers = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1, "only the state file remains");
    }

    #[test]
    fn corrupt_file_is_a_state_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(state_path(tmp.path()), b"{not json").unwrap();
        assert!(matches!(load(tmp.path()), Err(RegistryError::State(_))));
    }
}
