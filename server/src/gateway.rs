//! Static asset gateway: read-only access to files inside installed bundles.

use crate::{AppState, ServerError};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use opsdeck_bundle::sanitize_relative_path;
use std::io::ErrorKind;
use tracing::debug;

/// `GET /toolkit-assets/{slug}/{*path}`
///
/// Paths that leave the bundle are rejected. Symlinks and directories are
/// reported as missing.
pub async fn serve_asset(
    State(state): State<AppState>,
    Path((slug, path)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let file = state.registry.asset_path(&slug, &path)?;
    let depth = sanitize_relative_path(&path)?.components().count();
    let not_found = || ServerError::NotFound(format!("{slug}/{path}"));

    // The file itself plus each directory between it and the bundle root.
    for (i, step) in file.ancestors().take(depth).enumerate() {
        let meta = match tokio::fs::symlink_metadata(step).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if meta.file_type().is_symlink() || (i == 0 && !meta.is_file()) {
            return Err(not_found());
        }
    }

    let bytes = tokio::fs::read(&file).await?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();
    debug!(slug = %slug, path = %path, bytes = bytes.len(), "Asset served");
    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        bytes,
    )
        .into_response())
}
