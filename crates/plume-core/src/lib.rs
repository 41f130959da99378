pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;

// Re-export key public types for easier use by the binary and hosts
pub use event::{EventDispatcher, PluginEvent};
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    DefaultPluginManager, PluginId, PluginManager, PluginRegistry, PluginState, PluginView, RescanRequest,
    StaticLoaderFactory, StaticModule,
};
pub use storage::{HostConfig, StateStore};
