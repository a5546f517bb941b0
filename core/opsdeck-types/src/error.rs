//! Validation errors for manifests and slugs.

use std::fmt;
use thiserror::Error;

/// A single problem found while validating a manifest or slug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid slug '{0}': must match ^[a-z0-9_-]{{1,64}}$")]
    InvalidSlug(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("malformed manifest: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Machine-readable kind reported by the install API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSlug(_) => "invalid_slug",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::InvalidVersion { .. } => "invalid_version",
            Self::Malformed(_) => "malformed_manifest",
        }
    }
}

/// Every problem found in one manifest. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInvalid {
    pub errors: Vec<ValidationError>,
}

impl ManifestInvalid {
    pub fn single(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<ValidationError> for ManifestInvalid {
    fn from(error: ValidationError) -> Self {
        Self::single(error)
    }
}

impl fmt::Display for ManifestInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manifest validation failed: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ManifestInvalid {}
