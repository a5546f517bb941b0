//! Validate, extract into staging, then swap into the live storage root.

use crate::index::{EntryIndex, EntryKind};
use crate::{read_limited, BundleError, SecurityError, StageLimits};
use opsdeck_types::{Slug, ToolkitManifest, MANIFEST_FILE_NAME};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";
const COPY_CHUNK: usize = 64 * 1024;
/// Extra time the async wrapper waits for the blocking worker to notice its own deadline.
const WORKER_GRACE: Duration = Duration::from_secs(1);

/// Validates uploads and extracts them into staging directories under one storage root.
#[derive(Debug, Clone)]
pub struct BundleStager {
    storage_root: PathBuf,
    limits: StageLimits,
}

impl BundleStager {
    pub fn new(storage_root: impl Into<PathBuf>, limits: StageLimits) -> Self {
        Self {
            storage_root: storage_root.into(),
            limits,
        }
    }

    pub fn limits(&self) -> &StageLimits {
        &self.limits
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Reads an upload stream under the upload cap, then validates and stages it.
    pub fn stage<R: Read>(
        &self,
        upload: R,
        slug_override: Option<&str>,
    ) -> Result<StagedBundle, BundleError> {
        let started = Instant::now();
        let bytes = read_limited(upload, self.limits.max_upload_bytes)?;
        self.stage_from(bytes, slug_override, started)
    }

    /// Validates and stages an upload that was already buffered by the caller.
    pub fn stage_bytes(
        &self,
        upload: Vec<u8>,
        slug_override: Option<&str>,
    ) -> Result<StagedBundle, BundleError> {
        if upload.len() as u64 > self.limits.max_upload_bytes {
            return Err(SecurityError::UploadTooLarge {
                limit: self.limits.max_upload_bytes,
            }
            .into());
        }
        self.stage_from(upload, slug_override, Instant::now())
    }

    /// Runs `stage_bytes` on the blocking pool, bounded by the extraction timeout.
    pub async fn stage_async(
        &self,
        upload: Vec<u8>,
        slug_override: Option<String>,
    ) -> Result<StagedBundle, BundleError> {
        let stager = self.clone();
        let limit_ms = self.limits.timeout_ms();
        let budget = self.limits.extraction_timeout + WORKER_GRACE;
        let worker = tokio::task::spawn_blocking(move || {
            stager.stage_bytes(upload, slug_override.as_deref())
        });

        match tokio::time::timeout(budget, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(BundleError::Worker(join_err.to_string())),
            Err(_) => {
                warn!(limit_ms, "Staging worker missed its deadline");
                Err(BundleError::Timeout { limit_ms })
            }
        }
    }

    fn stage_from(
        &self,
        bytes: Vec<u8>,
        slug_override: Option<&str>,
        started: Instant,
    ) -> Result<StagedBundle, BundleError> {
        let deadline = started + self.limits.extraction_timeout;
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let index = EntryIndex::read(&mut archive, &self.limits, deadline)?;
        let manifest = self.read_manifest(&mut archive, &index, slug_override)?;

        fs::create_dir_all(&self.storage_root)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.storage_root)?;

        // On error `staging` is dropped here, removing everything written so far.
        let total_bytes = self.extract(&mut archive, &index, staging.path(), deadline)?;
        let file_count = index.files().count();

        info!(
            slug = %manifest.slug,
            files = file_count,
            bytes = total_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bundle staged"
        );

        Ok(StagedBundle {
            manifest,
            dir: staging,
            storage_root: self.storage_root.clone(),
            file_count,
            total_bytes,
        })
    }

    fn read_manifest<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        index: &EntryIndex,
        slug_override: Option<&str>,
    ) -> Result<ToolkitManifest, BundleError> {
        let entry = index
            .root_file(MANIFEST_FILE_NAME)
            .ok_or(BundleError::MissingManifest)?;

        let limit = self.limits.max_manifest_bytes();
        let too_large = |size| SecurityError::FileTooLarge {
            path: entry.name.clone(),
            size,
            limit,
        };
        if entry.declared_size > limit {
            return Err(too_large(entry.declared_size).into());
        }

        let file = archive.by_index(entry.index)?;
        let mut buf = Vec::new();
        file.take(limit + 1)
            .read_to_end(&mut buf)
            .map_err(|e| BundleError::ArchiveCorrupt(format!("{}: {e}", entry.name)))?;
        if buf.len() as u64 > limit {
            return Err(too_large(buf.len() as u64).into());
        }

        Ok(ToolkitManifest::from_json(&buf, slug_override)?)
    }

    /// Extracts every entry under `root`, counting the bytes actually written
    /// against the per-file and aggregate limits.
    fn extract<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        index: &EntryIndex,
        root: &Path,
        deadline: Instant,
    ) -> Result<u64, BundleError> {
        let timeout = || BundleError::Timeout {
            limit_ms: self.limits.timeout_ms(),
        };
        let mut total: u64 = 0;
        let mut chunk = vec![0u8; COPY_CHUNK];

        for entry in &index.entries {
            if Instant::now() >= deadline {
                return Err(timeout());
            }

            let target = root.join(&entry.path);
            if entry.kind == EntryKind::Directory {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut src = archive.by_index(entry.index)?;
            let mut out = File::create_new(&target)?;
            let mut written: u64 = 0;

            loop {
                if Instant::now() >= deadline {
                    return Err(timeout());
                }
                let n = match src.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(BundleError::ArchiveCorrupt(format!("{}: {e}", entry.name)));
                    }
                };

                written += n as u64;
                if written > self.limits.max_file_bytes {
                    return Err(SecurityError::FileTooLarge {
                        path: entry.name.clone(),
                        size: written,
                        limit: self.limits.max_file_bytes,
                    }
                    .into());
                }
                total += n as u64;
                if total > self.limits.max_bundle_bytes {
                    return Err(SecurityError::BundleTooLarge {
                        size: total,
                        limit: self.limits.max_bundle_bytes,
                    }
                    .into());
                }
                out.write_all(&chunk[..n])?;
            }

            out.flush()?;
            debug!(entry = %entry.name, bytes = written, "Extracted entry");
        }

        Ok(total)
    }
}

/// A fully validated bundle sitting in its staging directory.
///
/// Dropping it without calling `commit` removes the staging directory.
#[derive(Debug)]
pub struct StagedBundle {
    manifest: ToolkitManifest,
    dir: TempDir,
    storage_root: PathBuf,
    file_count: usize,
    total_bytes: u64,
}

impl StagedBundle {
    pub fn manifest(&self) -> &ToolkitManifest {
        &self.manifest
    }

    pub fn slug(&self) -> &Slug {
        &self.manifest.slug
    }

    /// Location of the staged files. Not the live location.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Moves the staged tree to `storage_root/<slug>/`, replacing any previous
    /// bundle for that slug.
    ///
    /// On Linux a replace is one `RENAME_EXCHANGE`, so the live path never
    /// goes missing. Elsewhere, or on filesystems without exchange support,
    /// the previous tree is renamed aside first and restored if the second
    /// rename fails.
    pub fn commit(self) -> Result<(ToolkitManifest, PathBuf), BundleError> {
        let StagedBundle {
            manifest,
            dir,
            storage_root,
            ..
        } = self;
        let live = storage_root.join(manifest.slug.as_str());

        if fs::symlink_metadata(&live).is_err() {
            fs::rename(dir.path(), &live)?;
            let _ = dir.keep();
        } else if exchange(dir.path(), &live)? {
            // The staging directory now holds the replaced tree.
            if let Err(e) = dir.close() {
                warn!(slug = %manifest.slug, error = %e, "Failed to remove replaced bundle");
            }
        } else {
            debug!(slug = %manifest.slug, "Exchange rename unsupported, replacing in two steps");
            replace_in_two_steps(dir, &live, &storage_root, &manifest.slug)?;
        }

        info!(slug = %manifest.slug, "Bundle committed");
        Ok((manifest, live))
    }
}

fn replace_in_two_steps(
    dir: TempDir,
    live: &Path,
    storage_root: &Path,
    slug: &Slug,
) -> io::Result<()> {
    let trash = trash_path(storage_root, slug);
    fs::rename(live, &trash)?;
    if let Err(e) = fs::rename(dir.path(), live) {
        if let Err(restore) = fs::rename(&trash, live) {
            warn!(slug = %slug, error = %restore, "Failed to restore previous bundle");
        }
        return Err(e);
    }
    let _ = dir.keep();
    if let Err(e) = fs::remove_dir_all(&trash) {
        warn!(slug = %slug, error = %e, "Failed to remove replaced bundle");
    }
    Ok(())
}

/// Swaps two existing paths in one step. `Ok(false)` when the kernel or the
/// filesystem cannot.
#[cfg(target_os = "linux")]
fn exchange(a: &Path, b: &Path) -> io::Result<bool> {
    use rustix::fs::{renameat_with, RenameFlags, CWD};
    use rustix::io::Errno;

    match renameat_with(CWD, a, CWD, b, RenameFlags::EXCHANGE) {
        Ok(()) => Ok(true),
        Err(e) if e == Errno::INVAL || e == Errno::NOSYS => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(target_os = "linux"))]
fn exchange(_: &Path, _: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Removes `storage_root/<slug>/`. The tree is renamed aside first so readers
/// see either the whole bundle or nothing. Returns whether a bundle existed.
pub fn remove_live_bundle(storage_root: &Path, slug: &Slug) -> io::Result<bool> {
    let live = storage_root.join(slug.as_str());
    if fs::symlink_metadata(&live).is_err() {
        return Ok(false);
    }
    let trash = trash_path(storage_root, slug);
    fs::rename(&live, &trash)?;
    fs::remove_dir_all(&trash)?;
    info!(slug = %slug, "Bundle removed");
    Ok(true)
}

/// Deletes staging and trash directories left behind by an interrupted process.
pub fn sweep_stale_dirs(storage_root: &Path) -> io::Result<usize> {
    if !storage_root.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(storage_root)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX) {
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to sweep stale directory"),
            }
        }
    }
    if removed > 0 {
        info!(removed, "Swept stale staging directories");
    }
    Ok(removed)
}

fn trash_path(storage_root: &Path, slug: &Slug) -> PathBuf {
    storage_root.join(format!(
        "{TRASH_PREFIX}{slug}-{}",
        uuid::Uuid::new_v4().simple()
    ))
}
