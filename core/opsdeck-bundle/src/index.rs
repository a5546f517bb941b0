//! Central-directory inspection. Nothing here decompresses payload bytes.

use crate::path::sanitize_relative_path;
use crate::{BundleError, SecurityError, StageLimits};
use std::collections::HashSet;
use std::io::{Read, Seek};
use std::path::PathBuf;
use std::time::Instant;
use zip::ZipArchive;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One checked entry of the archive's central directory.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    /// Position in the archive, used for extraction.
    pub index: usize,
    /// Name as stored in the archive.
    pub name: String,
    /// Normalized relative path.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Uncompressed size claimed by the header.
    pub declared_size: u64,
}

/// Checked view of every entry in an archive.
#[derive(Debug, Clone)]
pub struct EntryIndex {
    pub entries: Vec<IndexedEntry>,
    /// Sum of declared uncompressed sizes.
    pub declared_total: u64,
}

impl EntryIndex {
    /// Reads the central directory and applies every path, type and
    /// declared-size rule. Returns on the first violation.
    pub fn read<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        limits: &StageLimits,
        deadline: Instant,
    ) -> Result<Self, BundleError> {
        let count = archive.len();
        if count > limits.max_entries {
            return Err(SecurityError::TooManyEntries {
                count,
                limit: limits.max_entries,
            }
            .into());
        }

        let mut entries = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        let mut declared_total: u64 = 0;

        for index in 0..count {
            if Instant::now() >= deadline {
                return Err(BundleError::Timeout {
                    limit_ms: limits.timeout_ms(),
                });
            }

            let raw = archive.by_index_raw(index)?;
            let name = raw.name().to_string();
            let path = sanitize_relative_path(&name)?;

            if raw.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
                return Err(SecurityError::Symlink(name).into());
            }

            let kind = if raw.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            let declared_size = raw.size();
            if kind == EntryKind::File {
                if declared_size > limits.max_file_bytes {
                    return Err(SecurityError::FileTooLarge {
                        path: name,
                        size: declared_size,
                        limit: limits.max_file_bytes,
                    }
                    .into());
                }
                declared_total = declared_total.saturating_add(declared_size);
                if declared_total > limits.max_bundle_bytes {
                    return Err(SecurityError::BundleTooLarge {
                        size: declared_total,
                        limit: limits.max_bundle_bytes,
                    }
                    .into());
                }
            }

            if !seen.insert(path.clone()) && kind == EntryKind::File {
                return Err(BundleError::ArchiveCorrupt(format!(
                    "duplicate entry '{name}'"
                )));
            }

            entries.push(IndexedEntry {
                index,
                name,
                path,
                kind,
                declared_size,
            });
        }

        Ok(Self {
            entries,
            declared_total,
        })
    }

    /// The entry whose normalized path is exactly `file_name` at the root.
    pub fn root_file(&self, file_name: &str) -> Option<&IndexedEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == EntryKind::File && e.path.as_os_str() == file_name)
    }

    pub fn files(&self) -> impl Iterator<Item = &IndexedEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }
}
