//! Integration tests for bundle validation and staging, including hostile archives.

use opsdeck_bundle::*;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const DEMO_MANIFEST: &str = r#"{
    "slug": "demo",
    "name": "Demo Toolkit",
    "version": "1.0.0",
    "frontend": { "entry": "dist/panel.js" }
}"#;

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
}

/// Writes entries verbatim, bypassing any name handling a builder might do.
fn raw_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, options()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Overwrites the uncompressed size recorded for `name` in both its local
/// and central directory headers.
fn understate_size(zip: &mut [u8], name: &str, size: u32) {
    const LOCAL: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
    const CENTRAL: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
    let le16 = |b: &[u8], at: usize| u16::from_le_bytes([b[at], b[at + 1]]) as usize;
    let name = name.as_bytes();
    let mut patched = 0;
    for i in 0..zip.len().saturating_sub(46) {
        let (name_at, len_at, size_at) = if zip[i..i + 4] == LOCAL {
            (i + 30, i + 26, i + 22)
        } else if zip[i..i + 4] == CENTRAL {
            (i + 46, i + 28, i + 24)
        } else {
            continue;
        };
        let len = le16(zip, len_at);
        if zip.get(name_at..name_at + len) == Some(name) {
            zip[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
            patched += 1;
        }
    }
    assert_eq!(patched, 2, "expected one local and one central header");
}

fn five_file_bundle() -> Vec<u8> {
    BundleBuilder::new()
        .raw_manifest(DEMO_MANIFEST)
        .file("dist/panel.js", b"export default function Panel() {}".to_vec())
        .file("dist/panel.css", b".panel { color: red }".to_vec())
        .file("README.md", b"# Demo".to_vec())
        .file("data/seed.json", b"[]".to_vec())
        .build()
        .unwrap()
}

fn store(tmp: &tempfile::TempDir) -> std::path::PathBuf {
    tmp.path().join("store")
}

/// True when nothing at all exists under the storage root.
fn nothing_written(root: &Path) -> bool {
    !root.exists() || fs::read_dir(root).unwrap().next().is_none()
}

fn expect_security(result: Result<StagedBundle, BundleError>) -> SecurityError {
    match result {
        Err(BundleError::Security(e)) => e,
        other => panic!("expected security error, got {other:?}"),
    }
}

// ================================================================
// Happy path
// ================================================================

#[test]
fn valid_five_file_bundle_stages_and_commits() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());

    let staged = stager.stage_bytes(five_file_bundle(), None).unwrap();
    assert_eq!(staged.slug().as_str(), "demo");
    assert_eq!(staged.file_count(), 5);

    let (manifest, live) = staged.commit().unwrap();
    assert_eq!(manifest.name, "Demo Toolkit");
    assert_eq!(live, store(&tmp).join("demo"));
    for file in [
        "toolkit.json",
        "dist/panel.js",
        "dist/panel.css",
        "README.md",
        "data/seed.json",
    ] {
        assert!(live.join(file).is_file(), "{file} missing");
    }
}

#[test]
fn stage_from_reader_counts_streamed_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let bytes = five_file_bundle();
    let limits = StageLimits {
        max_upload_bytes: bytes.len() as u64 - 1,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);

    let err = expect_security(stager.stage(&bytes[..], None));
    assert_eq!(err.code(), "upload_too_large");
    assert!(nothing_written(&store(&tmp)));
}

#[tokio::test]
async fn async_staging_runs_off_thread() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let staged = stager
        .stage_async(five_file_bundle(), Some("renamed".to_string()))
        .await
        .unwrap();
    assert_eq!(staged.slug().as_str(), "renamed");
    let (_, live) = staged.commit().unwrap();
    assert!(live.ends_with("renamed"));
}

// ================================================================
// Path and type rules
// ================================================================

#[test]
fn parent_traversal_entry_is_rejected_before_any_write() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("../../etc/passwd", b"root:x:0:0".as_slice()),
    ]);

    let err = expect_security(stager.stage_bytes(bytes, None));
    assert_eq!(err, SecurityError::ParentTraversal("../../etc/passwd".into()));
    assert!(nothing_written(&store(&tmp)));
    assert!(!tmp.path().join("etc").exists());
}

#[test]
fn nested_parent_segment_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("dist/../../escape.js", b"x".as_slice()),
    ]);
    assert_eq!(expect_security(stager.stage_bytes(bytes, None)).code(), "parent_traversal");
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn absolute_entry_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("/etc/cron.d/evil", b"* * * * * root sh".as_slice()),
    ]);
    assert_eq!(expect_security(stager.stage_bytes(bytes, None)).code(), "absolute_path");
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn symlink_entry_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("toolkit.json", options()).unwrap();
    zip.write_all(DEMO_MANIFEST.as_bytes()).unwrap();
    zip.add_symlink("dist/link", "/etc/shadow", options()).unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    let err = expect_security(stager.stage_bytes(bytes, None));
    assert_eq!(err, SecurityError::Symlink("dist/link".into()));
    assert!(nothing_written(&store(&tmp)));
}

// ================================================================
// Size and count rules
// ================================================================

#[test]
fn declared_aggregate_over_limit_is_rejected_before_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let limits = StageLimits {
        max_bundle_bytes: 1024 * 1024,
        max_file_bytes: 4 * 1024 * 1024,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);

    // Zeros compress to almost nothing, so the upload itself is tiny.
    let zeros = vec![0u8; 600 * 1024];
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("a.bin", zeros.as_slice()),
        ("b.bin", zeros.as_slice()),
    ]);
    assert!(bytes.len() < 64 * 1024);

    let err = expect_security(stager.stage_bytes(bytes, None));
    assert_eq!(err.code(), "bundle_too_large");
    assert!(!store(&tmp).exists(), "storage root must not even be created");
}

#[test]
fn single_entry_over_file_limit_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let limits = StageLimits {
        max_file_bytes: 1000,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("big.bin", [1u8; 1001].as_slice()),
    ]);

    match expect_security(stager.stage_bytes(bytes, None)) {
        SecurityError::FileTooLarge { path, size, limit } => {
            assert_eq!(path, "big.bin");
            assert_eq!(size, 1001);
            assert_eq!(limit, 1000);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn understated_entry_size_is_caught_while_extracting() {
    let tmp = tempfile::tempdir().unwrap();
    let payload = vec![b'a'; 5000];
    let mut bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("data/blob.bin", payload.as_slice()),
    ]);
    understate_size(&mut bytes, "data/blob.bin", 10);

    let index = EntryIndex::read(
        &mut zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap(),
        &StageLimits::default(),
        std::time::Instant::now() + Duration::from_secs(60),
    )
    .unwrap();
    let declared = index.files().find(|e| e.name == "data/blob.bin").unwrap();
    assert_eq!(declared.declared_size, 10);

    let limits = StageLimits {
        max_file_bytes: 1000,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);
    match expect_security(stager.stage_bytes(bytes, None)) {
        SecurityError::FileTooLarge { path, size, limit } => {
            assert_eq!(path, "data/blob.bin");
            assert_eq!(limit, 1000);
            assert!(size > 1000 && size <= 5000, "counted {size} bytes");
        }
        other => panic!("expected file_too_large, got {other:?}"),
    }
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn too_many_entries_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let limits = StageLimits {
        max_entries: 3,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);
    let err = expect_security(stager.stage_bytes(five_file_bundle(), None));
    assert_eq!(
        err,
        SecurityError::TooManyEntries { count: 5, limit: 3 }
    );
}

// ================================================================
// Manifest rules
// ================================================================

#[test]
fn invalid_manifest_slug_creates_no_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let bytes = BundleBuilder::new()
        .raw_manifest(r#"{"slug":"Demo!","name":"Bad","version":"1.0.0"}"#)
        .file("dist/panel.js", b"x".to_vec())
        .build()
        .unwrap();

    match stager.stage_bytes(bytes, None) {
        Err(err @ BundleError::Validation(_)) => {
            assert_eq!(err.kind(), "validation");
            let BundleError::Validation(invalid) = err else { unreachable!() };
            assert_eq!(invalid.errors[0].kind(), "invalid_slug");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn manifest_must_be_at_archive_root() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let bytes = raw_zip(&[("pkg/toolkit.json", DEMO_MANIFEST.as_bytes())]);
    assert!(matches!(
        stager.stage_bytes(bytes, None),
        Err(BundleError::MissingManifest)
    ));
}

#[test]
fn garbage_upload_is_archive_corrupt() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let err = stager
        .stage_bytes(b"definitely not a zip archive".to_vec(), None)
        .unwrap_err();
    assert_eq!(err.kind(), "archive_corrupt");
}

// ================================================================
// Deadline and failure isolation
// ================================================================

#[test]
fn exhausted_deadline_aborts_and_cleans_staging() {
    let tmp = tempfile::tempdir().unwrap();
    let limits = StageLimits {
        extraction_timeout: Duration::ZERO,
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);
    let err = stager.stage_bytes(five_file_bundle(), None).unwrap_err();
    assert!(matches!(err, BundleError::Timeout { limit_ms: 0 }));
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn deadline_expiring_during_extraction_aborts_and_cleans_staging() {
    let tmp = tempfile::tempdir().unwrap();
    // Tiny central directory, tens of megabytes to inflate and write.
    let big = vec![0u8; 64 * 1024 * 1024];
    let bytes = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("data/big.bin", big.as_slice()),
    ]);
    drop(big);

    let limits = StageLimits {
        max_file_bytes: 128 * 1024 * 1024,
        max_bundle_bytes: 256 * 1024 * 1024,
        extraction_timeout: Duration::from_millis(5),
        ..StageLimits::default()
    };
    let stager = BundleStager::new(store(&tmp), limits);
    let err = stager.stage_bytes(bytes, None).unwrap_err();
    assert!(matches!(err, BundleError::Timeout { limit_ms: 5 }), "{err:?}");
    assert!(nothing_written(&store(&tmp)));
}

#[test]
fn failed_replacement_leaves_live_bundle_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let stager = BundleStager::new(store(&tmp), StageLimits::default());
    let (_, live) = stager
        .stage_bytes(five_file_bundle(), None)
        .unwrap()
        .commit()
        .unwrap();
    let before = fs::read(live.join("dist/panel.js")).unwrap();

    let hostile = raw_zip(&[
        ("toolkit.json", DEMO_MANIFEST.as_bytes()),
        ("dist/panel.js", b"pwned".as_slice()),
        ("../outside.txt", b"x".as_slice()),
    ]);
    assert!(stager.stage_bytes(hostile, None).is_err());

    assert_eq!(fs::read(live.join("dist/panel.js")).unwrap(), before);
    let names: Vec<_> = fs::read_dir(store(&tmp))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["demo".to_string()]);
}
