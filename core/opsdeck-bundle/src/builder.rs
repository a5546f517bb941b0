//! Fluent builder for well-formed toolkit bundles.

use crate::BundleError;
use opsdeck_types::{ToolkitManifest, MANIFEST_FILE_NAME};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Packs a manifest and files into a bundle archive. Used to produce
/// builtin bundles and test fixtures.
#[derive(Debug, Default)]
pub struct BundleBuilder {
    manifest: Option<ManifestSource>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
enum ManifestSource {
    Typed(ToolkitManifest),
    Raw(Vec<u8>),
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifest(mut self, manifest: &ToolkitManifest) -> Self {
        self.manifest = Some(ManifestSource::Typed(manifest.clone()));
        self
    }

    /// Uses the given bytes verbatim as `toolkit.json`, valid or not.
    pub fn raw_manifest(mut self, json: impl Into<Vec<u8>>) -> Self {
        self.manifest = Some(ManifestSource::Raw(json.into()));
        self
    }

    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }

    /// Builds the zip archive and returns the raw bytes.
    pub fn build(self) -> Result<Vec<u8>, BundleError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        if let Some(manifest) = self.manifest {
            let bytes = match manifest {
                ManifestSource::Typed(m) => {
                    serde_json::to_vec_pretty(&m).map_err(std::io::Error::from)?
                }
                ManifestSource::Raw(bytes) => bytes,
            };
            zip.start_file(MANIFEST_FILE_NAME, options)?;
            zip.write_all(&bytes)?;
        }

        for (path, data) in &self.files {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(data)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn manifest_lands_at_root() {
        let manifest = ToolkitManifest::from_json(
            br#"{"slug":"demo","name":"Demo","version":"0.1.0"}"#,
            None,
        )
        .unwrap();
        let bytes = BundleBuilder::new()
            .manifest(&manifest)
            .file("a/b.txt", b"hi".to_vec())
            .build()
            .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut json = String::new();
        archive
            .by_name(MANIFEST_FILE_NAME)
            .unwrap()
            .read_to_string(&mut json)
            .unwrap();
        let parsed = ToolkitManifest::from_json(json.as_bytes(), None).unwrap();
        assert_eq!(parsed, manifest);
        assert!(archive.by_name("a/b.txt").is_ok());
    }

    #[test]
    fn builder_without_manifest_omits_it() {
        let bytes = BundleBuilder::new()
            .file("x.txt", b"x".to_vec())
            .build()
            .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(archive.by_name(MANIFEST_FILE_NAME).is_err());
    }
}
