//! Loader abstraction: how a plugin's code gets into the process.
//!
//! Every plugin names a loader type in its descriptor. A type is either a
//! bootstrap tag registered by the host (`static`, `native`) or
//! `plugin_id:service_id`, a loader contributed by another plugin's
//! `plugin_loader` service. Each loaded plugin owns one [`Loader`] created
//! by the type's [`LoaderFactory`].
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::plugin_system::manifest::PluginId;
use crate::plugin_system::service::ServiceBinding;

/// Facts about the plugin a loader works for
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub plugin_id: &'a PluginId,
    pub directory: &'a Path,
    pub attributes: &'a BTreeMap<String, String>,
}

impl PluginContext<'_> {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// The service whose code is requested
#[derive(Debug, Clone, Copy)]
pub struct ServiceRequest<'a> {
    pub service_id: &'a str,
    pub kind: &'a str,
    pub fields: &'a BTreeMap<String, Value>,
}

/// Brings one plugin's code in and out of the process.
pub trait Loader: Send {
    /// Load the plugin's base code. Called once before any service is loaded.
    fn load_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String>;

    /// Produce the code for one service.
    fn load_service(&mut self, plugin: &PluginContext<'_>, service: &ServiceRequest<'_>) -> Result<ServiceBinding, String>;

    fn unload_service(&mut self, plugin: &PluginContext<'_>, service_id: &str) -> Result<(), String> {
        let _ = (plugin, service_id);
        Ok(())
    }

    /// Release the base code. Every service has been unloaded by then.
    fn unload_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String> {
        let _ = plugin;
        Ok(())
    }
}

/// Creates a [`Loader`] for a plugin.
pub trait LoaderFactory: Send + Sync {
    fn create(&self, plugin: &PluginContext<'_>) -> Result<Box<dyn Loader>, String>;
}

impl<F> LoaderFactory for F
where
    F: Fn(&PluginContext<'_>) -> Result<Box<dyn Loader>, String> + Send + Sync,
{
    fn create(&self, plugin: &PluginContext<'_>) -> Result<Box<dyn Loader>, String> {
        self(plugin)
    }
}

/// A loader instance attached to a loaded plugin.
pub struct LoaderHandle {
    loader_id: String,
    loader: Box<dyn Loader>,
}

impl fmt::Debug for LoaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderHandle")
            .field("loader_id", &self.loader_id)
            .finish_non_exhaustive()
    }
}

impl LoaderHandle {
    pub fn new(loader_id: impl Into<String>, loader: Box<dyn Loader>) -> Self {
        Self {
            loader_id: loader_id.into(),
            loader,
        }
    }

    /// The loader type this handle was created from
    pub fn loader_id(&self) -> &str {
        &self.loader_id
    }

    pub fn loader_mut(&mut self) -> &mut dyn Loader {
        self.loader.as_mut()
    }
}

/// A parsed loader type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderRef<'a> {
    /// Registered by the host under a tag
    Bootstrap(&'a str),
    /// Contributed by a `plugin_loader` service of another plugin
    Provided { plugin_id: &'a str, service_id: &'a str },
}

impl<'a> LoaderRef<'a> {
    /// Parse `tag` or `plugin_id:service_id`; `None` if neither shape fits.
    pub fn parse(loader_type: &'a str) -> Option<Self> {
        match loader_type.split_once(':') {
            Some((plugin_id, service_id)) => {
                let valid = PluginId::is_valid(plugin_id) && PluginId::is_valid(service_id);
                valid.then_some(LoaderRef::Provided { plugin_id, service_id })
            }
            None => PluginId::is_valid(loader_type).then_some(LoaderRef::Bootstrap(loader_type)),
        }
    }
}

impl fmt::Display for LoaderRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderRef::Bootstrap(tag) => f.write_str(tag),
            LoaderRef::Provided { plugin_id, service_id } => write!(f, "{}:{}", plugin_id, service_id),
        }
    }
}
