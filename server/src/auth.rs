//! Authorization gate for mutating toolkit calls.
//!
//! Reads a TOML policy mapping bearer tokens to roles and roles to actions.
//! Without a policy file every caller is allowed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// A mutating registry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Enable,
    Disable,
    Uninstall,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Uninstall => "uninstall",
        };
        f.write_str(name)
    }
}

/// Who is calling, as far as the HTTP layer can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub token: Option<String>,
}

impl Principal {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} on '{slug}' denied: {reason}")]
pub struct Denied {
    pub action: Action,
    pub slug: String,
    pub reason: String,
}

/// Decides whether a principal may perform an action on a toolkit.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, principal: &Principal, action: Action, slug: &str) -> Result<(), Denied>;
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse policy {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Every caller may do everything.
    #[default]
    Unrestricted,
    /// Callers need a known token whose role grants the action.
    Enforced,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Role name → granted actions.
    #[serde(default)]
    pub roles: HashMap<String, HashSet<Action>>,
    /// Bearer token → role name.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicyConfig,
}

/// [`Authorizer`] backed by a [`PolicyConfig`].
#[derive(Debug, Clone, Default)]
pub struct PolicyAuthorizer {
    config: PolicyConfig,
    policy_path: Option<PathBuf>,
}

impl PolicyAuthorizer {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        for role in config.tokens.values() {
            if !config.roles.contains_key(role) {
                warn!(role = %role, "Policy token refers to an undefined role");
            }
        }
        Self {
            config,
            policy_path: None,
        }
    }

    /// Loads `path`. A missing file means unrestricted; an unreadable or
    /// malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, PolicyError> {
        if !path.exists() {
            info!(path = ?path, "No authorization policy found, running unrestricted");
            return Ok(Self::unrestricted());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: PolicyFile = toml::from_str(&contents).map_err(|source| PolicyError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = ?path, mode = ?file.policy.mode, "Loaded authorization policy");
        let mut authorizer = Self::with_config(file.policy);
        authorizer.policy_path = Some(path.to_path_buf());
        Ok(authorizer)
    }

    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

impl Authorizer for PolicyAuthorizer {
    fn authorize(&self, principal: &Principal, action: Action, slug: &str) -> Result<(), Denied> {
        if self.config.mode == PolicyMode::Unrestricted {
            return Ok(());
        }
        let deny = |reason: &str| Denied {
            action,
            slug: slug.to_string(),
            reason: reason.to_string(),
        };

        let token = principal
            .token
            .as_deref()
            .ok_or_else(|| deny("no credentials"))?;
        let role = self
            .config
            .tokens
            .get(token)
            .ok_or_else(|| deny("unknown token"))?;
        let granted = self
            .config
            .roles
            .get(role)
            .is_some_and(|actions| actions.contains(&action));
        if granted {
            Ok(())
        } else {
            Err(deny(&format!("role '{role}' lacks '{action}'")))
        }
    }
}
