//! Toolkit registry for opsdeck.
//!
//! [`ToolkitRegistry`] is the single owner of installed toolkit state. It
//! installs validated bundles, mounts and unmounts their backend routes and
//! background tasks, persists records across restarts, and protects builtin
//! toolkits from being overwritten or removed.
//!
//! Toolkit code never comes from the bundle. Backends and workers are host
//! modules published in a [`ModuleCatalog`]; a manifest only names them.

mod error;
mod module;
mod mount;
mod registry;
mod state;
mod tasks;

pub use error::{LoadError, RegistryError, TaskEngineError};
pub use module::{BackendModule, ModuleCatalog, ModuleLoader, MountContext, WorkerModule};
pub use mount::{route_prefix, MountTable};
pub use registry::{RegistryConfig, ToolkitRegistry};
pub use tasks::{InMemoryTaskEngine, TaskEngine, TaskHandle, TaskHandler, TaskRegistrar};
