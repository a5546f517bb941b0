//! Contract with the background task engine.

use crate::error::TaskEngineError;
use opsdeck_types::Slug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Executes one kind of background task.
pub trait TaskHandler: Send + Sync {
    fn run(&self, payload: Value) -> Result<Value, String>;
}

impl<F> TaskHandler for F
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    fn run(&self, payload: Value) -> Result<Value, String> {
        self(payload)
    }
}

/// A task offered to the engine, owned by exactly one toolkit.
#[derive(Clone)]
pub struct TaskHandle {
    pub owner: Slug,
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
}

impl TaskHandle {
    /// Engine-wide name: `<slug>.<name>`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The shared task execution engine. Retry and scheduling belong to it.
pub trait TaskEngine: Send + Sync {
    /// Accepts a handle. The registry treats only `Ok` as confirmation.
    fn register(&self, handle: TaskHandle) -> Result<(), TaskEngineError>;

    /// Drops every handle owned by `owner`, returning how many were removed.
    fn deregister_owner(&self, owner: &Slug) -> usize;
}

/// Collects a worker's tasks, scoped to the toolkit being enabled.
///
/// Nothing reaches the engine until the worker's registration call returns.
#[derive(Debug)]
pub struct TaskRegistrar {
    owner: Slug,
    handles: Vec<TaskHandle>,
}

impl TaskRegistrar {
    pub(crate) fn new(owner: Slug) -> Self {
        Self {
            owner,
            handles: Vec::new(),
        }
    }

    pub fn owner(&self) -> &Slug {
        &self.owner
    }

    pub fn add(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> &mut Self {
        self.handles.push(TaskHandle {
            owner: self.owner.clone(),
            name: name.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn into_handles(self) -> Vec<TaskHandle> {
        self.handles
    }
}

/// Task engine that keeps handles in memory and runs them inline on request.
#[derive(Debug, Default)]
pub struct InMemoryTaskEngine {
    tasks: RwLock<BTreeMap<String, TaskHandle>>,
}

impl InMemoryTaskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Qualified names of every registered task, sorted.
    pub fn task_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.read().contains_key(qualified_name)
    }

    pub fn run(&self, qualified_name: &str, payload: Value) -> Result<Value, String> {
        let handler = self
            .read()
            .get(qualified_name)
            .map(|h| Arc::clone(&h.handler))
            .ok_or_else(|| format!("no such task: {qualified_name}"))?;
        handler.run(payload)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, TaskHandle>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskEngine for InMemoryTaskEngine {
    fn register(&self, handle: TaskHandle) -> Result<(), TaskEngineError> {
        let name = handle.qualified_name();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if tasks.contains_key(&name) {
            return Err(TaskEngineError::Duplicate(name));
        }
        debug!(task = %name, "Task registered");
        tasks.insert(name, handle);
        Ok(())
    }

    fn deregister_owner(&self, owner: &Slug) -> usize {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|_, h| &h.owner != owner);
        let removed = before - tasks.len();
        if removed > 0 {
            info!(slug = %owner, removed, "Tasks deregistered");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slug(s: &str) -> Slug {
        Slug::parse(s).unwrap()
    }

    fn echo(payload: Value) -> Result<Value, String> {
        Ok(payload)
    }

    #[test]
    fn registrar_scopes_handles_to_owner() {
        let mut registrar = TaskRegistrar::new(slug("demo"));
        registrar.add("sync", echo).add("prune", echo);
        let names: Vec<_> = registrar
            .into_handles()
            .iter()
            .map(TaskHandle::qualified_name)
            .collect();
        assert_eq!(names, vec!["demo.sync", "demo.prune"]);
    }

    #[test]
    fn engine_rejects_duplicates_and_runs_tasks() {
        let engine = InMemoryTaskEngine::new();
        let mut registrar = TaskRegistrar::new(slug("demo"));
        registrar.add("sync", echo);
        let handle = registrar.into_handles().remove(0);

        engine.register(handle.clone()).unwrap();
        assert_eq!(
            engine.register(handle),
            Err(TaskEngineError::Duplicate("demo.sync".into()))
        );
        assert_eq!(engine.run("demo.sync", json!({"n": 1})).unwrap(), json!({"n": 1}));
        assert!(engine.run("demo.missing", Value::Null).is_err());
    }

    #[test]
    fn deregister_owner_leaves_other_toolkits() {
        let engine = InMemoryTaskEngine::new();
        for owner in ["alpha", "beta"] {
            let mut registrar = TaskRegistrar::new(slug(owner));
            registrar.add("a", echo).add("b", echo);
            for handle in registrar.into_handles() {
                engine.register(handle).unwrap();
            }
        }
        assert_eq!(engine.deregister_owner(&slug("alpha")), 2);
        assert_eq!(engine.task_names(), vec!["beta.a", "beta.b"]);
    }
}
