//! Typed interface between the registry and toolkit-provided code.
//!
//! Toolkit backends and workers are compiled into the host and published in a
//! [`ModuleCatalog`] under the `(module, symbol)` pair a manifest declares.
//! Enabling a toolkit looks its declarations up through a [`ModuleLoader`];
//! nothing is loaded from the bundle itself.

use crate::error::LoadError;
use crate::tasks::TaskRegistrar;
use axum::Router;
use opsdeck_types::{BackendDecl, Slug, WorkerDecl};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// What a module learns about the toolkit it is being mounted for.
#[derive(Debug, Clone)]
pub struct MountContext {
    pub slug: Slug,
    /// Live bundle directory, for modules that read their own data files.
    pub bundle_root: PathBuf,
    /// Public path prefix the routes are reachable under (`/toolkits/<slug>`).
    pub route_prefix: String,
}

/// A backend entry symbol: produces the routes mounted under the toolkit's prefix.
///
/// Routes are written relative to the prefix; `/status` becomes
/// `/toolkits/<slug>/status`.
pub trait BackendModule: Send + Sync {
    fn routes(&self, ctx: &MountContext) -> Result<Router, String>;
}

/// A worker registration symbol: adds the toolkit's background tasks.
pub trait WorkerModule: Send + Sync {
    fn register(&self, ctx: &MountContext, tasks: &mut TaskRegistrar) -> Result<(), String>;
}

impl<F> BackendModule for F
where
    F: Fn(&MountContext) -> Result<Router, String> + Send + Sync,
{
    fn routes(&self, ctx: &MountContext) -> Result<Router, String> {
        self(ctx)
    }
}

impl<F> WorkerModule for F
where
    F: Fn(&MountContext, &mut TaskRegistrar) -> Result<(), String> + Send + Sync,
{
    fn register(&self, ctx: &MountContext, tasks: &mut TaskRegistrar) -> Result<(), String> {
        self(ctx, tasks)
    }
}

/// Resolves manifest declarations to module code.
pub trait ModuleLoader: Send + Sync {
    fn load_backend(&self, decl: &BackendDecl) -> Result<Arc<dyn BackendModule>, LoadError>;
    fn load_worker(&self, decl: &WorkerDecl) -> Result<Arc<dyn WorkerModule>, LoadError>;
}

type SymbolTable<T> = HashMap<String, HashMap<String, Arc<T>>>;

/// In-process table of the toolkit modules this host was built with.
#[derive(Default)]
pub struct ModuleCatalog {
    backends: RwLock<SymbolTable<dyn BackendModule>>,
    workers: RwLock<SymbolTable<dyn WorkerModule>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_backend(
        &self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        backend: impl BackendModule + 'static,
    ) {
        let mut table = self.backends.write().unwrap_or_else(|e| e.into_inner());
        table
            .entry(module.into())
            .or_default()
            .insert(symbol.into(), Arc::new(backend));
    }

    pub fn add_worker(
        &self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        worker: impl WorkerModule + 'static,
    ) {
        let mut table = self.workers.write().unwrap_or_else(|e| e.into_inner());
        table
            .entry(module.into())
            .or_default()
            .insert(symbol.into(), Arc::new(worker));
    }

    pub fn with_backend(
        self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        backend: impl BackendModule + 'static,
    ) -> Self {
        self.add_backend(module, symbol, backend);
        self
    }

    pub fn with_worker(
        self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        worker: impl WorkerModule + 'static,
    ) -> Self {
        self.add_worker(module, symbol, worker);
        self
    }
}

fn lookup<T: ?Sized>(
    table: &RwLock<SymbolTable<T>>,
    module: &str,
    symbol: &str,
) -> Result<Arc<T>, LoadError> {
    let table = table.read().unwrap_or_else(|e| e.into_inner());
    let symbols = table
        .get(module)
        .ok_or_else(|| LoadError::ModuleNotFound(module.to_string()))?;
    symbols
        .get(symbol)
        .cloned()
        .ok_or_else(|| LoadError::SymbolNotFound {
            module: module.to_string(),
            symbol: symbol.to_string(),
        })
}

impl ModuleLoader for ModuleCatalog {
    fn load_backend(&self, decl: &BackendDecl) -> Result<Arc<dyn BackendModule>, LoadError> {
        lookup(&self.backends, &decl.module, &decl.entry_symbol)
    }

    fn load_worker(&self, decl: &WorkerDecl) -> Result<Arc<dyn WorkerModule>, LoadError> {
        lookup(&self.workers, &decl.module, &decl.register_symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_decl(module: &str, symbol: &str) -> BackendDecl {
        BackendDecl {
            module: module.into(),
            entry_symbol: symbol.into(),
        }
    }

    fn ok_routes(_: &MountContext) -> Result<Router, String> {
        Ok(Router::new())
    }

    #[test]
    fn unknown_module_and_symbol_are_distinguished() {
        let catalog = ModuleCatalog::new().with_backend("demo", "routes", ok_routes);

        assert!(catalog.load_backend(&backend_decl("demo", "routes")).is_ok());
        assert_eq!(
            catalog.load_backend(&backend_decl("nope", "routes")).err(),
            Some(LoadError::ModuleNotFound("nope".into()))
        );
        assert_eq!(
            catalog.load_backend(&backend_decl("demo", "missing")).err(),
            Some(LoadError::SymbolNotFound {
                module: "demo".into(),
                symbol: "missing".into()
            })
        );
    }

    #[test]
    fn backends_and_workers_are_separate_namespaces() {
        let catalog = ModuleCatalog::new().with_backend("demo", "entry", ok_routes);
        let decl = WorkerDecl {
            module: "demo".into(),
            register_symbol: "entry".into(),
        };
        assert!(matches!(
            catalog.load_worker(&decl),
            Err(LoadError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn symbols_added_later_become_loadable() {
        let catalog = ModuleCatalog::new();
        let decl = backend_decl("late", "routes");
        assert!(catalog.load_backend(&decl).is_err());
        catalog.add_backend("late", "routes", ok_routes);
        assert!(catalog.load_backend(&decl).is_ok());
    }
}
