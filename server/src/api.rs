//! `/api/v1/toolkits` handlers.

use crate::auth::{Action, Principal};
use crate::{AppState, ServerError};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use opsdeck_bundle::UploadBuffer;
use opsdeck_types::{Origin, ToolkitRecord};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// Response header naming the source a component was loaded from.
pub const COMPONENT_SOURCE_HEADER: &str = "x-opsdeck-component-source";

#[derive(Debug, Default, Deserialize)]
pub struct InstallParams {
    /// Replaces the slug declared in the bundle's manifest.
    pub slug: Option<String>,
    /// `uploaded` (default) or `community`.
    pub origin: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

fn principal(headers: &HeaderMap) -> Principal {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Principal::bearer(token.trim()))
        .unwrap_or_default()
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    action: Action,
    slug: &str,
) -> Result<(), ServerError> {
    state
        .authorizer
        .authorize(&principal(headers), action, slug)
        .map_err(|denied| {
            warn!(slug, action = %action, reason = %denied.reason, "Request denied by policy");
            ServerError::Forbidden(denied.to_string())
        })
}

/// Buffers the request body, failing as soon as it passes `limit` bytes.
async fn read_upload(body: Body, limit: u64) -> Result<Vec<u8>, ServerError> {
    let mut buffer = UploadBuffer::new(limit);
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ServerError::BadRequest(format!("upload interrupted: {e}")))?;
        buffer.push(&chunk)?;
    }
    Ok(buffer.into_inner())
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<ToolkitRecord>> {
    Json(state.registry.list())
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ToolkitRecord>, ServerError> {
    state
        .registry
        .get(&slug)
        .map(Json)
        .ok_or(ServerError::NotFound(slug))
}

pub async fn install(
    State(state): State<AppState>,
    Query(params): Query<InstallParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<ToolkitRecord>), ServerError> {
    let origin = match params.origin.as_deref() {
        None | Some("uploaded") => Origin::Uploaded,
        Some("community") => Origin::Community,
        Some(other) => {
            return Err(ServerError::BadRequest(format!(
                "origin '{other}' cannot be installed over HTTP"
            )));
        }
    };
    authorize(&state, &headers, Action::Install, params.slug.as_deref().unwrap_or("*"))?;

    let upload = read_upload(body, state.registry.limits().max_upload_bytes).await?;
    let record = state
        .registry
        .install(upload, params.slug.as_deref(), origin)
        .await?;
    state.resolver.invalidate(record.slug());
    info!(slug = %record.slug(), origin = ?origin, "Toolkit installed via API");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn set_enabled(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EnabledBody>,
) -> Result<Json<ToolkitRecord>, ServerError> {
    let action = if body.enabled {
        Action::Enable
    } else {
        Action::Disable
    };
    authorize(&state, &headers, action, &slug)?;
    let record = state.registry.set_enabled(&slug, body.enabled).await?;
    Ok(Json(record))
}

pub async fn uninstall(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ServerError> {
    authorize(&state, &headers, Action::Uninstall, &slug)?;
    state.registry.unregister(&slug).await?;
    state.resolver.invalidate(&slug);
    Ok(StatusCode::NO_CONTENT)
}

/// Resolves the toolkit's UI entry. A resolution failure is answered with a
/// degraded placeholder, not an error status.
pub async fn component(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ServerError> {
    let record = state
        .registry
        .get(&slug)
        .ok_or_else(|| ServerError::NotFound(slug.clone()))?;

    match state.resolver.resolve(&record).await {
        Ok(component) => {
            let mime = mime_guess::from_path(&component.entry_path).first_or_octet_stream();
            let mut response = component.bytes.clone().into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&component.source.to_string()) {
                headers.insert(COMPONENT_SOURCE_HEADER, value);
            }
            Ok(response)
        }
        Err(failure) => Ok(Json(json!({
            "status": "degraded",
            "kind": failure.kind(),
            "slug": failure.slug,
            "attempts": failure.attempts,
        }))
        .into_response()),
    }
}
