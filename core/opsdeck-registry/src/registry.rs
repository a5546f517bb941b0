//! The toolkit registry: one owning service for every installed toolkit.
//!
//! Mutations for one slug (`register`, `set_enabled`, `unregister`) run under
//! that slug's async lock, so interleaved enable/disable calls cannot leave the
//! mount table and the record disagreeing. Different slugs proceed in
//! parallel. The record map itself is only locked long enough to copy or
//! replace a record; bundle I/O and module calls happen outside it.
//!
//! `register` and `unregister` run in their own task: a caller that stops
//! waiting does not leave the bundle directory and the record disagreeing.
//! State file writes go through the blocking pool.

use crate::error::RegistryError;
use crate::module::{ModuleLoader, MountContext};
use crate::mount::{route_prefix, MountTable};
use crate::state;
use crate::tasks::{TaskEngine, TaskRegistrar};
use opsdeck_bundle::{
    remove_live_bundle, resolve_within, sweep_stale_dirs, BundleError, BundleStager, StageLimits,
    StagedBundle,
};
use opsdeck_types::{Origin, Slug, ToolkitManifest, ToolkitRecord, WorkerDecl};
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding one subdirectory per installed toolkit plus the state file.
    pub storage_root: PathBuf,
    pub limits: StageLimits,
    /// Directory of `*.zip` bundles installed with origin `builtin` at startup.
    pub builtin_bundles: Option<PathBuf>,
    /// Whether builtin toolkits are enabled as soon as they are registered.
    pub auto_enable_builtin: bool,
}

impl RegistryConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            limits: StageLimits::default(),
            builtin_bundles: None,
            auto_enable_builtin: true,
        }
    }
}

pub struct ToolkitRegistry {
    stager: BundleStager,
    auto_enable_builtin: bool,
    loader: Arc<dyn ModuleLoader>,
    tasks: Arc<dyn TaskEngine>,
    mounts: MountTable,
    records: RwLock<HashMap<Slug, ToolkitRecord>>,
    slug_locks: Mutex<HashMap<Slug, Arc<AsyncMutex<()>>>>,
    /// Orders state file writes; never held together with `records` for writing.
    persist_lock: Mutex<()>,
    last_token: AtomicU64,
}

impl ToolkitRegistry {
    // ================================================================
    // Lifecycle
    // ================================================================

    /// Opens the storage root, reloads persisted records, installs builtin
    /// bundles and re-mounts every toolkit that was enabled at shutdown.
    pub async fn init(
        config: RegistryConfig,
        loader: Arc<dyn ModuleLoader>,
        tasks: Arc<dyn TaskEngine>,
    ) -> Result<Arc<Self>, RegistryError> {
        let root = config.storage_root.clone();
        fs::create_dir_all(&root)?;
        sweep_stale_dirs(&root)?;

        let mut records = HashMap::new();
        let mut resume = Vec::new();
        let mut last_token = 0;
        for mut record in state::load(&root)? {
            let slug = record.manifest.slug.clone();
            if !root.join(slug.as_str()).is_dir() {
                warn!(slug = %slug, "Dropping record whose bundle directory is missing");
                continue;
            }
            last_token = last_token.max(record.updated_at);
            if record.enabled {
                record.mark_unmounted();
                resume.push(slug.clone());
            }
            records.insert(slug, record);
        }

        let registry = Arc::new(Self {
            stager: BundleStager::new(root, config.limits),
            auto_enable_builtin: config.auto_enable_builtin,
            loader,
            tasks,
            mounts: MountTable::new(),
            records: RwLock::new(records),
            slug_locks: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            last_token: AtomicU64::new(last_token),
        });

        if let Some(dir) = &config.builtin_bundles {
            registry.install_builtins(dir).await?;
        }

        for slug in resume {
            if let Err(e) = registry.set_enabled(slug.as_str(), true).await {
                warn!(slug = %slug, error = %e, "Could not re-mount toolkit");
            }
        }

        registry.save_state().await;
        info!(
            toolkits = registry.read_records().len(),
            mounted = registry.mounts.slugs().len(),
            "Toolkit registry initialized"
        );
        Ok(registry)
    }

    /// Unmounts every toolkit and writes the state file. Enabled flags are
    /// kept so the next `init` mounts the same set again.
    pub async fn shutdown(self: &Arc<Self>) -> Result<(), RegistryError> {
        let slugs: Vec<Slug> = self.read_records().keys().cloned().collect();
        for slug in &slugs {
            let lock = self.slug_lock(slug);
            let _guard = lock.lock().await;
            self.unmount(slug);
        }
        self.persist().await?;
        info!(toolkits = slugs.len(), "Toolkit registry shut down");
        Ok(())
    }

    async fn install_builtins(self: &Arc<Self>, dir: &Path) -> Result<usize, RegistryError> {
        let mut bundles: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "zip"))
            .collect();
        bundles.sort();

        let mut installed = 0;
        for path in bundles {
            let bytes = fs::read(&path)?;
            match self.install(bytes, None, Origin::Builtin).await {
                Ok(record) => {
                    debug!(slug = %record.slug(), path = ?path, "Builtin bundle installed");
                    installed += 1;
                }
                Err(e) => warn!(path = ?path, error = %e, "Skipping invalid builtin bundle"),
            }
        }
        Ok(installed)
    }

    // ================================================================
    // Install / replace / uninstall
    // ================================================================

    /// Validates and stages `upload` off the request path, then registers it.
    pub async fn install(
        self: &Arc<Self>,
        upload: Vec<u8>,
        slug_override: Option<&str>,
        origin: Origin,
    ) -> Result<ToolkitRecord, RegistryError> {
        let staged = self
            .stager
            .stage_async(upload, slug_override.map(str::to_string))
            .await?;
        self.register(staged, origin).await
    }

    /// Moves a staged bundle live and inserts or fully replaces its record.
    ///
    /// A builtin record is only replaceable by another builtin. The previous
    /// bundle keeps serving until the exchange, and its contributions are
    /// detached afterwards. Replaced records start disabled unless they are
    /// builtin and auto-enable is on.
    pub async fn register(
        self: &Arc<Self>,
        staged: StagedBundle,
        origin: Origin,
    ) -> Result<ToolkitRecord, RegistryError> {
        let this = Arc::clone(self);
        detached(async move { this.register_locked(staged, origin).await }).await
    }

    async fn register_locked(
        self: Arc<Self>,
        staged: StagedBundle,
        origin: Origin,
    ) -> Result<ToolkitRecord, RegistryError> {
        let slug = staged.slug().clone();
        let guard = self.slug_lock(&slug).lock_owned().await;

        let previous = self.get(slug.as_str());
        if previous.as_ref().is_some_and(|p| p.origin.is_builtin()) && !origin.is_builtin() {
            warn!(slug = %slug, origin = ?origin, "Refusing to overwrite builtin toolkit");
            return Err(RegistryError::BuiltinProtected(slug.to_string()));
        }

        let (manifest, _) = tokio::task::spawn_blocking(move || staged.commit())
            .await
            .map_err(|e| BundleError::Worker(e.to_string()))??;

        if previous.is_some() {
            self.unmount(&slug);
        }

        let record = ToolkitRecord::new(manifest, origin, self.next_token());
        self.write_records().insert(slug.clone(), record.clone());
        info!(
            slug = %slug,
            origin = ?origin,
            version = %record.manifest.version,
            updated_at = record.updated_at,
            replaced = previous.is_some(),
            "Toolkit registered"
        );

        let record = if origin.is_builtin() && self.auto_enable_builtin {
            match self.apply_enabled(&slug, true) {
                Ok(enabled) => enabled,
                Err(_) => self.get(slug.as_str()).unwrap_or(record),
            }
        } else {
            record
        };

        drop(guard);
        self.save_state().await;
        Ok(record)
    }

    /// Removes a non-builtin toolkit: contributions, bundle directory and record.
    ///
    /// If the bundle directory cannot be removed the record is kept and its
    /// contributions are mounted again.
    pub async fn unregister(self: &Arc<Self>, slug: &str) -> Result<(), RegistryError> {
        let slug = Slug::parse(slug)?;
        let this = Arc::clone(self);
        detached(async move { this.unregister_locked(slug).await }).await
    }

    async fn unregister_locked(self: Arc<Self>, slug: Slug) -> Result<(), RegistryError> {
        let lock = self.slug_lock(&slug);
        let guard = Arc::clone(&lock).lock_owned().await;

        let Some(record) = self.get(slug.as_str()) else {
            drop(guard);
            self.release_slug_lock(&slug, &lock);
            return Err(RegistryError::NotFound(slug.to_string()));
        };
        if record.origin.is_builtin() {
            return Err(RegistryError::BuiltinProtected(slug.to_string()));
        }

        self.unmount(&slug);
        let root = self.stager.storage_root().to_path_buf();
        let target = slug.clone();
        let removal = tokio::task::spawn_blocking(move || remove_live_bundle(&root, &target)).await;
        let removed = match removal {
            Ok(result) => result.map_err(RegistryError::from),
            Err(e) => Err(BundleError::Worker(e.to_string()).into()),
        };
        if let Err(e) = removed {
            warn!(slug = %slug, error = %e, "Bundle removal failed, keeping toolkit");
            self.remount(&record);
            drop(guard);
            self.save_state().await;
            return Err(e);
        }

        self.write_records().remove(&slug);
        drop(guard);
        self.release_slug_lock(&slug, &lock);
        self.save_state().await;
        info!(slug = %slug, "Toolkit uninstalled");
        Ok(())
    }

    /// Re-attaches the contributions of a record that was mounted before an
    /// unmount that did not go through. Caller holds the slug lock.
    fn remount(&self, record: &ToolkitRecord) {
        if !record.mount_state.is_mounted() {
            return;
        }
        let slug = &record.manifest.slug;
        if let Err(e) = self.mount(&record.manifest) {
            warn!(slug = %slug, kind = e.kind(), error = %e, "Toolkit remount failed");
            let message = e.to_string();
            if let Err(e) = self.update(slug, |r| r.mark_failed(message)) {
                debug!(slug = %slug, error = %e, "Record vanished during remount");
            }
        }
    }

    // ================================================================
    // Enable / disable
    // ================================================================

    /// Mounts or unmounts the toolkit's contributions.
    ///
    /// Enabling loads the declared backend and mounts its routes, then loads
    /// the declared worker and registers its tasks. The record becomes
    /// `mounted` only when every declared step succeeded; otherwise everything
    /// attached so far is rolled back and the record is `mount_failed` and
    /// disabled. Enabling an already mounted toolkit is a no-op.
    pub async fn set_enabled(
        self: &Arc<Self>,
        slug: &str,
        enabled: bool,
    ) -> Result<ToolkitRecord, RegistryError> {
        let slug = Slug::parse(slug)?;
        let lock = self.slug_lock(&slug);
        let guard = Arc::clone(&lock).lock_owned().await;

        let result = self.apply_enabled(&slug, enabled);
        drop(guard);
        if matches!(result, Err(RegistryError::NotFound(_))) {
            self.release_slug_lock(&slug, &lock);
        } else {
            self.save_state().await;
        }
        result
    }

    /// Caller holds the slug lock.
    fn apply_enabled(&self, slug: &Slug, enabled: bool) -> Result<ToolkitRecord, RegistryError> {
        let current = self
            .get(slug.as_str())
            .ok_or_else(|| RegistryError::NotFound(slug.to_string()))?;

        if !enabled {
            self.unmount(slug);
            let record = self.update(slug, ToolkitRecord::mark_unmounted)?;
            info!(slug = %slug, "Toolkit disabled");
            return Ok(record);
        }

        if current.enabled && current.mount_state.is_mounted() {
            debug!(slug = %slug, "Toolkit already enabled");
            return Ok(current);
        }

        match self.mount(&current.manifest) {
            Ok(()) => {
                let record = self.update(slug, ToolkitRecord::mark_mounted)?;
                info!(slug = %slug, "Toolkit enabled");
                Ok(record)
            }
            Err(e) => {
                warn!(slug = %slug, kind = e.kind(), error = %e, "Toolkit mount failed");
                let message = e.to_string();
                self.update(slug, |r| r.mark_failed(message))?;
                Err(e)
            }
        }
    }

    fn mount(&self, manifest: &ToolkitManifest) -> Result<(), RegistryError> {
        let slug = &manifest.slug;
        let ctx = MountContext {
            slug: slug.clone(),
            bundle_root: self.bundle_dir(slug),
            route_prefix: route_prefix(slug),
        };
        let mount_err = |message: String| RegistryError::Mount {
            slug: slug.to_string(),
            message,
        };

        let mut routes_mounted = false;
        if let Some(decl) = &manifest.backend {
            let module = self
                .loader
                .load_backend(decl)
                .map_err(|e| mount_err(e.to_string()))?;
            let router = guarded(|| module.routes(&ctx)).map_err(mount_err)?;
            self.mounts.insert(slug.clone(), router);
            routes_mounted = true;
            debug!(slug = %slug, module = %decl.module, prefix = %ctx.route_prefix, "Backend routes mounted");
        }

        if let Some(decl) = &manifest.worker {
            if let Err(e) = self.register_worker(&ctx, decl) {
                if routes_mounted {
                    self.mounts.remove(slug.as_str());
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs the worker's registration symbol, then offers each task to the
    /// engine. A single rejected handle rolls back all of this slug's tasks.
    fn register_worker(&self, ctx: &MountContext, decl: &WorkerDecl) -> Result<(), RegistryError> {
        let slug = &ctx.slug;
        let reg_err = |message: String| RegistryError::Registration {
            slug: slug.to_string(),
            message,
        };

        let module = self
            .loader
            .load_worker(decl)
            .map_err(|e| reg_err(e.to_string()))?;
        let mut registrar = TaskRegistrar::new(slug.clone());
        guarded(|| module.register(ctx, &mut registrar)).map_err(reg_err)?;

        let handles = registrar.into_handles();
        let count = handles.len();
        for handle in handles {
            let name = handle.qualified_name();
            if let Err(e) = self.tasks.register(handle) {
                self.tasks.deregister_owner(slug);
                return Err(reg_err(format!("{name}: {e}")));
            }
        }
        debug!(slug = %slug, tasks = count, "Worker tasks registered");
        Ok(())
    }

    fn unmount(&self, slug: &Slug) {
        let routes = self.mounts.remove(slug.as_str());
        let tasks = self.tasks.deregister_owner(slug);
        if routes || tasks > 0 {
            info!(slug = %slug, routes, tasks, "Toolkit unmounted");
        }
    }

    // ================================================================
    // Queries
    // ================================================================

    /// Snapshot of every record, sorted by display name then slug.
    pub fn list(&self) -> Vec<ToolkitRecord> {
        let mut records: Vec<ToolkitRecord> = self.read_records().values().cloned().collect();
        records.sort_by(|a, b| {
            a.manifest
                .name
                .cmp(&b.manifest.name)
                .then_with(|| a.manifest.slug.cmp(&b.manifest.slug))
        });
        records
    }

    pub fn get(&self, slug: &str) -> Option<ToolkitRecord> {
        self.read_records().get(slug).cloned()
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn limits(&self) -> &StageLimits {
        self.stager.limits()
    }

    /// Maps a request path inside an installed bundle to a file location,
    /// rejecting any path that would leave the bundle directory.
    pub fn asset_path(&self, slug: &str, relative: &str) -> Result<PathBuf, RegistryError> {
        let record = self
            .get(slug)
            .ok_or_else(|| RegistryError::NotFound(slug.to_string()))?;
        let root = self.bundle_dir(&record.manifest.slug);
        resolve_within(&root, relative).map_err(|e| BundleError::Security(e).into())
    }

    // ================================================================
    // Internals
    // ================================================================

    fn bundle_dir(&self, slug: &Slug) -> PathBuf {
        self.stager.storage_root().join(slug.as_str())
    }

    fn slug_lock(&self, slug: &Slug) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.lock_table().entry(slug.clone()).or_default())
    }

    /// Drops the table entry for `slug` once `lock` is its only user outside
    /// the table. Clones are only handed out under the table lock, so nobody
    /// can be holding or waiting on it at that point.
    fn release_slug_lock(&self, slug: &Slug, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.lock_table();
        let idle = locks
            .get(slug)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(slug);
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<Slug, Arc<AsyncMutex<()>>>> {
        self.slug_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_token(&self) -> u64 {
        self.last_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn update(
        &self,
        slug: &Slug,
        f: impl FnOnce(&mut ToolkitRecord),
    ) -> Result<ToolkitRecord, RegistryError> {
        let mut records = self.write_records();
        let record = records
            .get_mut(slug)
            .ok_or_else(|| RegistryError::NotFound(slug.to_string()))?;
        f(record);
        Ok(record.clone())
    }

    /// Writes the state file on the blocking pool. The snapshot is taken under
    /// `persist_lock`, so a later write never carries older records.
    async fn persist(self: &Arc<Self>) -> Result<(), RegistryError> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.persist_blocking())
            .await
            .map_err(|e| BundleError::Worker(e.to_string()))?
    }

    fn persist_blocking(&self) -> Result<(), RegistryError> {
        let _order = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<ToolkitRecord> = self.read_records().values().cloned().collect();
        snapshot.sort_by(|a, b| a.manifest.slug.cmp(&b.manifest.slug));
        state::save(self.stager.storage_root(), snapshot)
    }

    /// In-memory state stays authoritative; the next successful save catches up.
    async fn save_state(self: &Arc<Self>) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist registry state");
        }
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Slug, ToolkitRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Slug, ToolkitRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs `task` to completion even if the caller stops polling the returned future.
async fn detached<T: Send + 'static>(
    task: impl Future<Output = Result<T, RegistryError>> + Send + 'static,
) -> Result<T, RegistryError> {
    tokio::spawn(task)
        .await
        .map_err(|e| BundleError::Worker(e.to_string()))?
}

/// Runs toolkit-provided code, turning a panic into an error message.
fn guarded<T>(f: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_converts_panics() {
        let err = guarded::<()>(|| panic!("worker exploded")).unwrap_err();
        assert_eq!(err, "panicked: worker exploded");

        let err = guarded::<()>(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(err, "panicked: formatted 1");

        assert_eq!(guarded(|| Ok::<_, String>(3)), Ok(3));
    }

    fn lock_count(registry: &ToolkitRegistry) -> usize {
        registry.lock_table().len()
    }

    #[tokio::test]
    async fn slug_locks_do_not_outlive_their_toolkits() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolkitRegistry::init(
            RegistryConfig::new(tmp.path()),
            Arc::new(crate::module::ModuleCatalog::new()),
            Arc::new(crate::tasks::InMemoryTaskEngine::new()),
        )
        .await
        .unwrap();

        for i in 0..64 {
            let slug = format!("ghost-{i}");
            let err = registry.set_enabled(&slug, true).await.unwrap_err();
            assert_eq!(err.kind(), "not_found");
            let err = registry.unregister(&slug).await.unwrap_err();
            assert_eq!(err.kind(), "not_found");
        }
        assert_eq!(lock_count(&registry), 0);

        let bytes = opsdeck_bundle::BundleBuilder::new()
            .raw_manifest(r#"{"slug":"demo","name":"Demo","version":"1.0.0"}"#)
            .build()
            .unwrap();
        registry.install(bytes, None, Origin::Uploaded).await.unwrap();
        registry.set_enabled("demo", true).await.unwrap();
        assert_eq!(lock_count(&registry), 1);

        registry.unregister("demo").await.unwrap();
        assert_eq!(lock_count(&registry), 0);
    }

    #[tokio::test]
    async fn held_slug_lock_is_not_released() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolkitRegistry::init(
            RegistryConfig::new(tmp.path()),
            Arc::new(crate::module::ModuleCatalog::new()),
            Arc::new(crate::tasks::InMemoryTaskEngine::new()),
        )
        .await
        .unwrap();
        let slug = Slug::parse("busy").unwrap();
        let mine = registry.slug_lock(&slug);
        let waiter = registry.slug_lock(&slug);

        registry.release_slug_lock(&slug, &mine);
        assert!(Arc::ptr_eq(&registry.slug_lock(&slug), &waiter));

        drop(waiter);
        registry.release_slug_lock(&slug, &mine);
        assert_eq!(lock_count(&registry), 0);
    }

    #[test]
    fn config_defaults_enable_builtins() {
        let config = RegistryConfig::new("/tmp/toolkits");
        assert!(config.auto_enable_builtin);
        assert!(config.builtin_bundles.is_none());
    }
}
