//! opsdeck HTTP host.
//!
//! Serves the toolkit management API, the static asset gateway for installed
//! bundles, and whatever routes enabled toolkits have mounted under
//! `/toolkits/<slug>`.

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod modules;

use auth::{Authorizer, PolicyAuthorizer};
use axum::routing::{any, get, put};
use axum::Router;
use config::ServerConfig;
use opsdeck_registry::{ModuleLoader, TaskEngine, ToolkitRegistry};
use opsdeck_resolver::{ComponentResolver, DefaultFetcher};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::{ServerError, StartupError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolkitRegistry>,
    pub resolver: Arc<ComponentResolver>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// Builds every service from `config`: initializes the registry (which
    /// reloads state and installs builtins), the resolver and the policy.
    pub async fn from_config(
        config: &ServerConfig,
        loader: Arc<dyn ModuleLoader>,
        tasks: Arc<dyn TaskEngine>,
    ) -> Result<Self, StartupError> {
        let authorizer = match &config.policy_path {
            Some(path) => PolicyAuthorizer::load_from(path)?,
            None => PolicyAuthorizer::unrestricted(),
        };
        let resolver_config = config.resolver_config()?;
        let fetcher = Arc::new(DefaultFetcher::new(resolver_config.fetch_timeout));
        let registry = ToolkitRegistry::init(config.registry_config(), loader, tasks).await?;

        Ok(Self {
            registry,
            resolver: Arc::new(ComponentResolver::new(resolver_config, fetcher)),
            authorizer: Arc::new(authorizer),
        })
    }
}

/// Build the HTTP router over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/toolkits", get(api::list).post(api::install))
        .route("/api/v1/toolkits/{slug}", get(api::get_one).delete(api::uninstall))
        .route("/api/v1/toolkits/{slug}/enabled", put(api::set_enabled))
        .route("/api/v1/toolkits/{slug}/component", get(api::component))
        .route("/toolkit-assets/{slug}/{*path}", get(gateway::serve_asset))
        .route("/toolkits/{slug}", any(dispatch::toolkit_root))
        .route("/toolkits/{slug}/{*rest}", any(dispatch::toolkit_nested))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
