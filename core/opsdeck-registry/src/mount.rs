//! Routes contributed by enabled toolkits, keyed by slug.

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::Response;
use axum::Router;
use opsdeck_types::Slug;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tower::ServiceExt;

/// Public prefix every toolkit's routes live under.
pub fn route_prefix(slug: &Slug) -> String {
    format!("/toolkits/{slug}")
}

/// Live slug → router table. Cloning shares the table.
#[derive(Clone, Default)]
pub struct MountTable {
    routes: Arc<RwLock<HashMap<Slug, Router>>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, slug: Slug, router: Router) {
        self.write().insert(slug, router);
    }

    pub(crate) fn remove(&self, slug: &str) -> bool {
        self.write().remove(slug).is_some()
    }

    pub fn is_mounted(&self, slug: &str) -> bool {
        self.read().contains_key(slug)
    }

    /// Mounted slugs, sorted.
    pub fn slugs(&self) -> Vec<Slug> {
        let mut slugs: Vec<_> = self.read().keys().cloned().collect();
        slugs.sort();
        slugs
    }

    /// Sends `req` to the toolkit's router with `/toolkits/<slug>` stripped
    /// from the path. Returns `None` when nothing is mounted for `slug`.
    pub async fn dispatch(&self, slug: &str, mut req: Request<Body>) -> Option<Response> {
        let router = self.read().get(slug).cloned()?;

        let prefix = format!("/toolkits/{slug}");
        let path = req.uri().path();
        let rest = path.strip_prefix(prefix.as_str()).unwrap_or(path);
        let rest = if rest.is_empty() { "/" } else { rest };
        let rewritten = match req.uri().query() {
            Some(q) => format!("{rest}?{q}"),
            None => rest.to_string(),
        };
        if let Ok(uri) = rewritten.parse::<Uri>() {
            *req.uri_mut() = uri;
        }

        match router.oneshot(req).await {
            Ok(response) => Some(response),
            Err(never) => match never {},
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Slug, Router>> {
        self.routes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Slug, Router>> {
        self.routes.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::extract::Query;
    use axum::routing::get;
    use std::collections::HashMap as Params;

    fn slug(s: &str) -> Slug {
        Slug::parse(s).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn dispatch_strips_prefix_and_keeps_query() {
        let table = MountTable::new();
        let router = Router::new()
            .route("/", get(|| async { "root" }))
            .route(
                "/echo",
                get(|Query(q): Query<Params<String, String>>| async move {
                    q.get("v").cloned().unwrap_or_default()
                }),
            );
        table.insert(slug("demo"), router);

        let root = table.dispatch("demo", request("/toolkits/demo")).await.unwrap();
        assert_eq!(body_text(root).await, "root");

        let echo = table
            .dispatch("demo", request("/toolkits/demo/echo?v=42"))
            .await
            .unwrap();
        assert_eq!(body_text(echo).await, "42");
    }

    #[tokio::test]
    async fn unmounted_slug_dispatches_nothing() {
        let table = MountTable::new();
        table.insert(slug("demo"), Router::new());
        assert!(table.remove("demo"));
        assert!(!table.remove("demo"));
        assert!(table.dispatch("demo", request("/toolkits/demo")).await.is_none());
        assert!(table.slugs().is_empty());
    }
}
