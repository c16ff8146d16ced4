//! Plugin runtime: service and client plugins behind one host.

pub mod builtin;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod host;
pub mod logger;
pub mod mount;
pub mod storage;
pub mod types;

pub use context::{BridgeEvent, ClientContext, MountSession, PluginContext, ServiceContext, ServiceRef};
pub use definition::{
    ClientPlugin, Endpoint, Lifecycle, Plugin, PluginDefinition, PluginRequest, PluginResponse, ScheduledTask,
    ServicePlugin,
};
pub use error::PluginError;
pub use host::{PluginHost, PluginSummary, RouteDescriptor, SkipReason, TaskDescriptor, TaskFailure, TaskOutcome};
pub use logger::{PluginLogger, TracingLogger};
pub use mount::MountTarget;
pub use storage::{MemoryStorage, PluginStorage, ScopedStorage, StorageError};
pub use types::{LifecycleState, PluginId, PluginMeta, RuntimeKind};
