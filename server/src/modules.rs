//! Toolkit modules compiled into this host.
//!
//! A manifest reaches these through its `backend.module`/`entry_symbol` and
//! `worker.module`/`register_symbol` declarations.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use opsdeck_registry::{ModuleCatalog, MountContext, TaskRegistrar};
use serde_json::{json, Value};
use std::path::Path;

pub const INSPECTOR_MODULE: &str = "opsdeck.inspector";
pub const INSPECTOR_ROUTES: &str = "routes";
pub const INSPECTOR_TASKS: &str = "register";

/// The catalog the binary serves with.
pub fn host_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with_backend(INSPECTOR_MODULE, INSPECTOR_ROUTES, inspector_routes)
        .with_worker(INSPECTOR_MODULE, INSPECTOR_TASKS, inspector_tasks)
}

/// `/status` and `/files` for any toolkit that mounts the inspector.
fn inspector_routes(ctx: &MountContext) -> Result<Router, String> {
    Ok(Router::new()
        .route("/status", get(status))
        .route("/files", get(files))
        .with_state(ctx.clone()))
}

fn inspector_tasks(ctx: &MountContext, tasks: &mut TaskRegistrar) -> Result<(), String> {
    let slug = ctx.slug.to_string();
    tasks.add("echo", move |payload: Value| -> Result<Value, String> {
        Ok(json!({ "toolkit": slug, "payload": payload }))
    });
    Ok(())
}

async fn status(State(ctx): State<MountContext>) -> Json<Value> {
    Json(json!({ "slug": ctx.slug, "prefix": ctx.route_prefix, "status": "ok" }))
}

async fn files(State(ctx): State<MountContext>) -> Json<Vec<String>> {
    let root = ctx.bundle_root.clone();
    let listing = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        walk(&root, &root, &mut out);
        out.sort();
        out
    })
    .await
    .unwrap_or_default();
    Json(listing)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => walk(root, &path, out),
            Ok(t) if t.is_file() => {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_registry::ModuleLoader;
    use opsdeck_types::{BackendDecl, WorkerDecl};

    #[test]
    fn catalog_publishes_inspector() {
        let catalog = host_catalog();
        assert!(catalog
            .load_backend(&BackendDecl {
                module: INSPECTOR_MODULE.into(),
                entry_symbol: INSPECTOR_ROUTES.into(),
            })
            .is_ok());
        assert!(catalog
            .load_worker(&WorkerDecl {
                module: INSPECTOR_MODULE.into(),
                register_symbol: INSPECTOR_TASKS.into(),
            })
            .is_ok());
    }

    #[test]
    fn walk_lists_nested_files_relative_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("dist/css")).unwrap();
        std::fs::write(tmp.path().join("toolkit.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("dist/css/a.css"), "").unwrap();

        let mut out = Vec::new();
        walk(tmp.path(), tmp.path(), &mut out);
        out.sort();
        assert_eq!(out, vec!["dist/css/a.css".to_string(), "toolkit.json".to_string()]);
    }
}
