//! Core type definitions for opsdeck toolkits.
//!
//! This crate defines the types shared by every stage of the toolkit
//! lifecycle:
//! - `ToolkitManifest`: the typed form of a bundle's `toolkit.json`
//! - `Slug`: the validated toolkit identity
//! - `ToolkitRecord`: the registry's public view of an installed toolkit
//!
//! Storage paths are deliberately absent from every type here; they are
//! owned by the registry and never leave it.

mod error;
mod manifest;
mod record;
mod slug;

pub use error::{ManifestInvalid, ValidationError};
pub use manifest::{
    BackendDecl, DashboardCard, FrontendDecl, ToolkitManifest, WorkerDecl, MANIFEST_FILE_NAME,
};
pub use record::{MountState, Origin, ToolkitRecord};
pub use slug::{Slug, MAX_SLUG_LEN};
