//! # Plume Core Plugin System
//!
//! Discovery, activation and code loading of plugins described by
//! declarative descriptor files.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`manifest`]**: Plugin ids, the raw descriptor tree, the readers for
//!   JSON/TOML/YAML descriptor files and validation into a
//!   [`FullDescriptor`](manifest::FullDescriptor).
//! - **[`cache`]**: The persisted descriptor cache that lets unchanged
//!   plugins be registered as stubs.
//! - **[`plugin`]**: The registry's per-plugin record ([`PluginDescriptor`])
//!   with its lifecycle state and use count.
//! - **[`dependency`]**: Dependencies between plugins.
//! - **[`service`]**: Typed services plugins contribute and the
//!   [`ServiceRegistry`] of service kinds.
//! - **[`host`]**: Host tables services register into: resources, file
//!   formats and loader types.
//! - **[`loader`]**: The [`Loader`] abstraction and loader type resolution;
//!   [`static_loader`] and [`native_loader`] provide the bootstrap loaders.
//! - **[`engine`]**: The [`LifecycleEngine`] implementing activation,
//!   loading and deactivation with cycle detection and rollback.
//! - **[`registry`]**: The [`PluginRegistry`] tying it all together.
//! - **[`manager`]**: The async [`PluginManager`] facade that also persists state.
//! - **[`error`]**: [`PluginSystemError`](error::PluginSystemError) and
//!   [`ErrorList`](error::ErrorList).
pub mod cache;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod host;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod native_loader;
pub mod plugin;
pub mod registry;
pub mod service;
pub mod static_loader;

pub use cache::{CacheOutcome, DescriptorCache};
pub use dependency::PluginDependency;
pub use engine::LifecycleEngine;
pub use error::{ErrorList, PluginSystemError};
pub use host::ServiceHost;
pub use loader::{Loader, LoaderFactory, PluginContext, ServiceRequest};
pub use manager::{DefaultPluginManager, PluginManager};
pub use manifest::{DescriptorParser, FullDescriptor, PluginId};
pub use native_loader::NativeLoaderFactory;
pub use plugin::{PluginDescriptor, PluginState, PluginView};
pub use registry::{PluginRegistry, RescanRequest, ShutdownReport};
pub use service::{Service, ServiceBinding, ServiceRegistry};
pub use static_loader::{StaticLoaderFactory, StaticModule};

// Test module declaration
#[cfg(test)]
mod tests;
