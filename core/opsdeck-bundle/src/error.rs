//! Error types for bundle staging.

use opsdeck_types::ManifestInvalid;
use thiserror::Error;

/// An archive tried to escape its root or exhaust the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("entry '{0}' has an absolute path")]
    AbsolutePath(String),

    #[error("entry '{0}' contains a '..' segment")]
    ParentTraversal(String),

    #[error("entry '{0}' resolves outside the bundle root")]
    EscapesRoot(String),

    #[error("entry name '{0}' is not a usable path")]
    InvalidPath(String),

    #[error("entry '{0}' is a symbolic link")]
    Symlink(String),

    #[error("entry '{path}' is {size} bytes, per-file limit is {limit}")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("bundle expands to {size} bytes, limit is {limit}")]
    BundleTooLarge { size: u64, limit: u64 },

    #[error("upload exceeds {limit} bytes")]
    UploadTooLarge { limit: u64 },

    #[error("archive has {count} entries, limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },
}

impl SecurityError {
    /// Machine-readable code distinguishing path, per-file and aggregate violations.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AbsolutePath(_) => "absolute_path",
            Self::ParentTraversal(_) => "parent_traversal",
            Self::EscapesRoot(_) => "escapes_root",
            Self::InvalidPath(_) => "invalid_path",
            Self::Symlink(_) => "symlink",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::BundleTooLarge { .. } => "bundle_too_large",
            Self::UploadTooLarge { .. } => "upload_too_large",
            Self::TooManyEntries { .. } => "too_many_entries",
        }
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error(transparent)]
    Validation(#[from] ManifestInvalid),

    #[error("archive has no toolkit.json at its root")]
    MissingManifest,

    #[error("security violation: {0}")]
    Security(#[from] SecurityError),

    #[error("archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("extraction exceeded {limit_ms}ms deadline")]
    Timeout { limit_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("staging worker failed: {0}")]
    Worker(String),
}

impl BundleError {
    /// Machine-readable error category reported by the install API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::MissingManifest => "validation",
            Self::Security(_) => "security",
            Self::ArchiveCorrupt(_) => "archive_corrupt",
            Self::Timeout { .. } => "timeout",
            Self::Io(_) | Self::Worker(_) => "io",
        }
    }
}

impl From<zip::result::ZipError> for BundleError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::ArchiveCorrupt(e.to_string())
    }
}
