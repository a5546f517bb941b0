use std::time::Duration;

/// Size, count and time limits applied to every staged bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLimits {
    /// Maximum compressed upload size, counted on the streamed bytes.
    pub max_upload_bytes: u64,
    /// Maximum sum of uncompressed entry sizes.
    pub max_bundle_bytes: u64,
    /// Maximum uncompressed size of any single entry.
    pub max_file_bytes: u64,
    /// Maximum number of entries in the central directory.
    pub max_entries: usize,
    /// Wall-clock budget for the whole validate-and-extract run.
    pub extraction_timeout: Duration,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 64 * 1024 * 1024,
            max_bundle_bytes: 256 * 1024 * 1024,
            max_file_bytes: 32 * 1024 * 1024,
            max_entries: 10_000,
            extraction_timeout: Duration::from_secs(30),
        }
    }
}

impl StageLimits {
    /// The manifest is read into memory, so it gets a tighter cap than other files.
    pub(crate) fn max_manifest_bytes(&self) -> u64 {
        self.max_file_bytes.min(1024 * 1024)
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        self.extraction_timeout.as_millis().min(u128::from(u64::MAX)) as u64
    }
}
