//! Toolkit bundle validation and staging.
//!
//! A toolkit bundle is a zip archive containing:
//! - `toolkit.json`: the manifest, at the archive root (required)
//! - backend, worker and UI artifacts under any relative path (optional)
//!
//! Uploads are untrusted. `BundleStager` checks the whole central directory
//! (paths, symlinks, declared sizes, entry count) before a single byte is
//! written, extracts into a fresh `.staging-*` directory under the storage
//! root while re-checking the bytes actually written, and only then hands out
//! a `StagedBundle`. Committing a staged bundle swaps it into
//! `storage_root/<slug>/` with renames so readers never see a half-written
//! bundle. Any failure drops the staging directory and leaves the live bundle
//! untouched.

mod builder;
mod error;
mod index;
mod limits;
mod path;
mod stage;
mod upload;

pub use builder::BundleBuilder;
pub use error::{BundleError, SecurityError};
pub use index::{EntryIndex, EntryKind, IndexedEntry};
pub use limits::StageLimits;
pub use path::{resolve_within, sanitize_relative_path};
pub use stage::{remove_live_bundle, sweep_stale_dirs, BundleStager, StagedBundle};
pub use upload::{read_limited, UploadBuffer};
