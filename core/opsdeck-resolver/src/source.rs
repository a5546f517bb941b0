//! Candidate sources for a toolkit's UI entry point.

use bytes::Bytes;
use opsdeck_types::ToolkitRecord;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where a component can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file in the toolkit's development source tree.
    Local(PathBuf),
    /// The installed asset, served by the static asset gateway.
    Remote(Url),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "local:{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Identity of a cached resolution: `slug|entry|source_entry|updated_at`.
///
/// Any change to the entry points or a reinstall produces a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub slug: String,
    pub entry: Option<String>,
    pub source_entry: Option<String>,
    pub updated_at: u64,
}

impl CacheKey {
    pub fn for_record(record: &ToolkitRecord) -> Self {
        let frontend = record.manifest.frontend.as_ref();
        Self {
            slug: record.slug().to_string(),
            entry: frontend.and_then(|f| f.entry.clone()),
            source_entry: frontend.and_then(|f| f.source_entry.clone()),
            updated_at: record.updated_at,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.slug,
            self.entry.as_deref().unwrap_or(""),
            self.source_entry.as_deref().unwrap_or(""),
            self.updated_at
        )
    }
}

/// A loaded UI entry point.
#[derive(Debug, Clone)]
pub struct ComponentRef {
    pub key: CacheKey,
    pub source: Source,
    /// Entry path the bytes came from, for content-type detection.
    pub entry_path: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base URL the static asset gateway is reachable under.
    pub public_base_url: Url,
    /// Root of toolkit source trees. Setting it turns on the development context.
    pub dev_source_root: Option<PathBuf>,
    /// Per-candidate fetch timeout.
    pub fetch_timeout: Duration,
}

impl ResolverConfig {
    pub fn new(public_base_url: Url) -> Self {
        Self {
            public_base_url,
            dev_source_root: None,
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn is_dev(&self) -> bool {
        self.dev_source_root.is_some()
    }
}

/// A candidate together with the entry path it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: Source,
    pub entry_path: String,
}

/// Ordered candidates for `record`.
///
/// In the development context the local source entry comes first. The
/// installed asset is always last, and the only candidate otherwise.
pub fn candidates(record: &ToolkitRecord, config: &ResolverConfig) -> Vec<Candidate> {
    let Some(frontend) = record.manifest.frontend.as_ref() else {
        return Vec::new();
    };
    let slug = record.slug();
    let mut out = Vec::with_capacity(2);

    if let (Some(root), Some(source_entry)) = (&config.dev_source_root, &frontend.source_entry) {
        out.push(Candidate {
            source: Source::Local(root.join(slug).join(source_entry)),
            entry_path: source_entry.clone(),
        });
    }

    if let Some(entry) = &frontend.entry {
        if let Some(url) = asset_url(&config.public_base_url, slug, entry, record.updated_at) {
            out.push(Candidate {
                source: Source::Remote(url),
                entry_path: entry.clone(),
            });
        }
    }
    out
}

/// `<base>/toolkit-assets/<slug>/<entry>?v=<updated_at>`
fn asset_url(base: &Url, slug: &str, entry: &str, updated_at: u64) -> Option<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join(&format!("toolkit-assets/{slug}/{entry}")).ok()?;
    url.query_pairs_mut()
        .append_pair("v", &updated_at.to_string());
    Some(url)
}
