//! Server configuration: TOML file, then `OPSDECK_*` environment, then CLI flags.

use opsdeck_bundle::StageLimits;
use opsdeck_registry::RegistryConfig;
use opsdeck_resolver::ResolverConfig;
use reqwest::Url;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("invalid public base URL '{0}'")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub storage_root_path: PathBuf,
    pub builtin_bundles_path: Option<PathBuf>,
    pub auto_enable_builtin: bool,
    pub policy_path: Option<PathBuf>,
    pub dev_source_root: Option<PathBuf>,
    /// Defaults to `http://<listen>/`.
    pub public_base_url: Option<String>,
    pub max_upload_bytes: u64,
    pub max_bundle_bytes: u64,
    pub max_file_bytes: u64,
    pub max_entries: usize,
    pub extraction_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage_root_path: PathBuf::from("./toolkits"),
            builtin_bundles_path: None,
            auto_enable_builtin: true,
            policy_path: None,
            dev_source_root: None,
            public_base_url: None,
            max_upload_bytes: 64 * MIB,
            max_bundle_bytes: 256 * MIB,
            max_file_bytes: 32 * MIB,
            max_entries: 10_000,
            extraction_timeout_ms: 30_000,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Reads `path` if given, otherwise starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `OPSDECK_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(std::env::vars())
    }

    /// Applies `OPSDECK_*` overrides. Unrelated variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "OPSDECK_LISTEN" => self.listen = parse(&key, &value)?,
                "OPSDECK_STORAGE_ROOT" => self.storage_root_path = PathBuf::from(value),
                "OPSDECK_BUILTIN_BUNDLES" => self.builtin_bundles_path = Some(PathBuf::from(value)),
                "OPSDECK_AUTO_ENABLE_BUILTIN" => self.auto_enable_builtin = parse(&key, &value)?,
                "OPSDECK_POLICY" => self.policy_path = Some(PathBuf::from(value)),
                "OPSDECK_DEV_SOURCE_ROOT" => self.dev_source_root = Some(PathBuf::from(value)),
                "OPSDECK_PUBLIC_BASE_URL" => self.public_base_url = Some(value),
                "OPSDECK_MAX_UPLOAD_BYTES" => self.max_upload_bytes = parse(&key, &value)?,
                "OPSDECK_MAX_BUNDLE_BYTES" => self.max_bundle_bytes = parse(&key, &value)?,
                "OPSDECK_MAX_FILE_BYTES" => self.max_file_bytes = parse(&key, &value)?,
                "OPSDECK_MAX_ENTRIES" => self.max_entries = parse(&key, &value)?,
                "OPSDECK_EXTRACTION_TIMEOUT_MS" => self.extraction_timeout_ms = parse(&key, &value)?,
                "OPSDECK_FETCH_TIMEOUT_MS" => self.fetch_timeout_ms = parse(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn stage_limits(&self) -> StageLimits {
        StageLimits {
            max_upload_bytes: self.max_upload_bytes,
            max_bundle_bytes: self.max_bundle_bytes,
            max_file_bytes: self.max_file_bytes,
            max_entries: self.max_entries,
            extraction_timeout: Duration::from_millis(self.extraction_timeout_ms),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            storage_root: self.storage_root_path.clone(),
            limits: self.stage_limits(),
            builtin_bundles: self.builtin_bundles_path.clone(),
            auto_enable_builtin: self.auto_enable_builtin,
        }
    }

    pub fn resolver_config(&self) -> Result<ResolverConfig, ConfigError> {
        let raw = self
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/", self.listen));
        let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(raw.clone()))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(raw));
        }
        Ok(ResolverConfig {
            public_base_url: url,
            dev_source_root: self.dev_source_root.clone(),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
        })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
