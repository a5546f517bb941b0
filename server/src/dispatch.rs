//! Forwards `/toolkits/<slug>/...` to the routes the toolkit mounted.

use crate::{AppState, ServerError};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};

pub async fn toolkit_root(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    req: Request<Body>,
) -> Response {
    forward(&state, &slug, req).await
}

pub async fn toolkit_nested(
    State(state): State<AppState>,
    Path((slug, _rest)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    forward(&state, &slug, req).await
}

async fn forward(state: &AppState, slug: &str, req: Request<Body>) -> Response {
    match state.registry.mounts().dispatch(slug, req).await {
        Some(response) => response,
        None => ServerError::NotFound(format!("no routes mounted for '{slug}'")).into_response(),
    }
}
