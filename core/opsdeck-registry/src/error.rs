//! Error types for the toolkit registry.

use opsdeck_bundle::BundleError;
use opsdeck_types::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("toolkit not found: {0}")]
    NotFound(String),

    #[error("toolkit '{0}' is builtin and cannot be replaced or removed")]
    BuiltinProtected(String),

    #[error("mount failed: {slug}: {message}")]
    Mount { slug: String, message: String },

    #[error("task registration failed: {slug}: {message}")]
    Registration { slug: String, message: String },

    #[error("state error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bundle(e) => e.kind(),
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::BuiltinProtected(_) => "conflict",
            Self::Mount { .. } => "mount",
            Self::Registration { .. } => "registration",
            Self::State(_) | Self::Io(_) => "io",
        }
    }
}

/// Failure to resolve a manifest declaration to host-provided module code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("symbol '{symbol}' not exported by module '{module}'")]
    SymbolNotFound { module: String, symbol: String },
}

/// Rejection reported by a task engine when a handle is offered to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskEngineError {
    #[error("task already registered: {0}")]
    Duplicate(String),

    #[error("task rejected: {0}")]
    Rejected(String),
}
