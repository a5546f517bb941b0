//! Toolkit manifest (`toolkit.json`) at the root of every bundle.
//!
//! Parsing is two-phase: the JSON is read into a loose `RawManifest` where
//! every field is optional, then `validate` checks each field and collects
//! every problem it finds. Unknown JSON fields are ignored.

use crate::{ManifestInvalid, Slug, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of the manifest entry at the archive root.
pub const MANIFEST_FILE_NAME: &str = "toolkit.json";

const MAX_NAME_LEN: usize = 128;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_TAG_LEN: usize = 32;
const MAX_TAGS: usize = 32;
const MAX_CARDS: usize = 32;

/// Validated description of a toolkit bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitManifest {
    pub slug: Slug,
    pub name: String,
    /// Semantic version string, already checked with `semver`.
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendDecl>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub dashboard_cards: Vec<DashboardCard>,
}

/// Backend contribution: a module and the symbol that yields its routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDecl {
    pub module: String,
    pub entry_symbol: String,
}

/// Background-task contribution: a module and its registration symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDecl {
    pub module: String,
    pub register_symbol: String,
}

/// UI panel entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendDecl {
    /// Installed asset path, relative to the bundle root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Development source path, relative to the toolkit's source tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entry: Option<String>,
}

/// Simple display record shown on the operations dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardCard {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    slug: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    backend: Option<RawBackend>,
    worker: Option<RawWorker>,
    frontend: Option<RawFrontend>,
    tags: Option<Vec<String>>,
    dashboard_cards: Option<Vec<RawCard>>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    module: Option<String>,
    entry_symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWorker {
    module: Option<String>,
    register_symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFrontend {
    entry: Option<String>,
    source_entry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    title: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    link: Option<String>,
}

impl ToolkitManifest {
    /// Parses and validates `toolkit.json` bytes.
    ///
    /// `slug_override` replaces the manifest's own slug when present; the
    /// manifest slug may then be omitted entirely.
    pub fn from_json(bytes: &[u8], slug_override: Option<&str>) -> Result<Self, ManifestInvalid> {
        let raw: RawManifest = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        raw.validate(slug_override)
    }
}

impl RawManifest {
    fn validate(self, slug_override: Option<&str>) -> Result<ToolkitManifest, ManifestInvalid> {
        let mut errors = Vec::new();

        let slug = match slug_override.or(self.slug.as_deref()) {
            None => {
                errors.push(ValidationError::MissingField("slug"));
                None
            }
            Some(raw) => match Slug::parse(raw) {
                Ok(slug) => Some(slug),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
        };

        let name = required_text(&mut errors, "name", self.name, MAX_NAME_LEN);

        let version = match self.version.map(|v| v.trim().to_string()) {
            None => {
                errors.push(ValidationError::MissingField("version"));
                None
            }
            Some(v) if v.is_empty() => {
                errors.push(ValidationError::MissingField("version"));
                None
            }
            Some(v) => match semver::Version::parse(&v) {
                Ok(_) => Some(v),
                Err(e) => {
                    errors.push(ValidationError::InvalidVersion {
                        version: v,
                        reason: e.to_string(),
                    });
                    None
                }
            },
        };

        let description = self.description.unwrap_or_default();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(ValidationError::InvalidField {
                field: "description",
                reason: format!("longer than {MAX_DESCRIPTION_LEN} characters"),
            });
        }

        let backend = self.backend.and_then(|b| {
            let module = required_symbol(&mut errors, "backend.module", b.module, true);
            let entry_symbol =
                required_symbol(&mut errors, "backend.entry_symbol", b.entry_symbol, false);
            Some(BackendDecl {
                module: module?,
                entry_symbol: entry_symbol?,
            })
        });

        let worker = self.worker.and_then(|w| {
            let module = required_symbol(&mut errors, "worker.module", w.module, true);
            let register_symbol =
                required_symbol(&mut errors, "worker.register_symbol", w.register_symbol, false);
            Some(WorkerDecl {
                module: module?,
                register_symbol: register_symbol?,
            })
        });

        let frontend = self.frontend.and_then(|f| {
            let entry = relative_path(&mut errors, "frontend.entry", f.entry);
            let source_entry = relative_path(&mut errors, "frontend.source_entry", f.source_entry);
            if entry.is_none() && source_entry.is_none() {
                None
            } else {
                Some(FrontendDecl {
                    entry,
                    source_entry,
                })
            }
        });

        let raw_tags = self.tags.unwrap_or_default();
        if raw_tags.len() > MAX_TAGS {
            errors.push(ValidationError::InvalidField {
                field: "tags",
                reason: format!("more than {MAX_TAGS} tags"),
            });
        }
        let mut tags = BTreeSet::new();
        for tag in raw_tags {
            let tag = tag.trim().to_string();
            if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
                errors.push(ValidationError::InvalidField {
                    field: "tags",
                    reason: format!("tag must be 1-{MAX_TAG_LEN} characters"),
                });
                continue;
            }
            tags.insert(tag);
        }

        let raw_cards = self.dashboard_cards.unwrap_or_default();
        if raw_cards.len() > MAX_CARDS {
            errors.push(ValidationError::InvalidField {
                field: "dashboard_cards",
                reason: format!("more than {MAX_CARDS} cards"),
            });
        }
        let mut dashboard_cards = Vec::with_capacity(raw_cards.len());
        for card in raw_cards {
            match card.title.map(|t| t.trim().to_string()) {
                Some(title) if !title.is_empty() => dashboard_cards.push(DashboardCard {
                    title,
                    description: card.description,
                    icon: card.icon,
                    link: card.link,
                }),
                _ => errors.push(ValidationError::MissingField("dashboard_cards[].title")),
            }
        }

        match (slug, name, version) {
            (Some(slug), Some(name), Some(version)) if errors.is_empty() => Ok(ToolkitManifest {
                slug,
                name,
                version,
                description,
                backend,
                worker,
                frontend,
                tags,
                dashboard_cards,
            }),
            _ => Err(ManifestInvalid { errors }),
        }
    }
}

fn required_text(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: Option<String>,
    max_len: usize,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.push(ValidationError::MissingField(field));
        return None;
    }
    if value.chars().count() > max_len {
        errors.push(ValidationError::InvalidField {
            field,
            reason: format!("longer than {max_len} characters"),
        });
        return None;
    }
    Some(value)
}

/// Module references allow `.`, `/` and `-`; symbols are plain identifiers.
fn required_symbol(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: Option<String>,
    is_module: bool,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.push(ValidationError::MissingField(field));
        return None;
    }
    let allowed = |c: char| {
        c.is_ascii_alphanumeric() || c == '_' || (is_module && matches!(c, '.' | '/' | '-' | ':'))
    };
    if value.len() > 256 || !value.chars().all(allowed) {
        errors.push(ValidationError::InvalidField {
            field,
            reason: format!("'{value}' contains unsupported characters"),
        });
        return None;
    }
    Some(value)
}

fn relative_path(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: Option<String>,
) -> Option<String> {
    let value = value?.trim().to_string();
    if value.is_empty() {
        return None;
    }
    let escapes = value.starts_with('/')
        || value.starts_with('\\')
        || value.contains('\0')
        || value.split(['/', '\\']).any(|seg| seg == "..")
        || value.as_bytes().get(1) == Some(&b':');
    if escapes {
        errors.push(ValidationError::InvalidField {
            field,
            reason: format!("'{value}' must be a relative path inside the bundle"),
        });
        return None;
    }
    Some(value)
}
