//! The `static` bootstrap loader: plugin code compiled into the host.
//!
//! The host fills a table of [`StaticModule`]s; a plugin using this loader
//! names its module with the `module` loader attribute, or gets the module
//! registered under its own id.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::plugin_system::loader::{Loader, LoaderFactory, PluginContext, ServiceRequest};
use crate::plugin_system::service::{FileFn, HookFn, ProbeFn, ServiceBinding};

/// In-process code for one plugin: base load hooks plus per-service bindings.
#[derive(Clone, Default)]
pub struct StaticModule {
    on_load: Option<HookFn>,
    on_unload: Option<HookFn>,
    services: HashMap<String, ServiceBinding>,
}

impl fmt::Debug for StaticModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<&String> = self.services.keys().collect();
        services.sort();
        f.debug_struct("StaticModule")
            .field("services", &services)
            .finish_non_exhaustive()
    }
}

impl StaticModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` when the plugin's base code is loaded
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(hook));
        self
    }

    /// Run `hook` when the plugin's base code is unloaded
    pub fn on_unload<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_unload = Some(Arc::new(hook));
        self
    }

    pub fn service(mut self, service_id: &str, binding: ServiceBinding) -> Self {
        self.services.insert(service_id.to_string(), binding);
        self
    }

    /// A general service with no hooks
    pub fn general(self, service_id: &str) -> Self {
        self.service(
            service_id,
            ServiceBinding::General {
                init: None,
                cleanup: None,
            },
        )
    }

    pub fn general_with<I, C>(self, service_id: &str, init: I, cleanup: C) -> Self
    where
        I: Fn() -> Result<(), String> + Send + Sync + 'static,
        C: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.service(
            service_id,
            ServiceBinding::General {
                init: Some(Arc::new(init) as HookFn),
                cleanup: Some(Arc::new(cleanup) as HookFn),
            },
        )
    }

    pub fn file_opener(self, service_id: &str, probe: Option<ProbeFn>, open: FileFn) -> Self {
        self.service(service_id, ServiceBinding::FileOpener { probe, open })
    }

    pub fn file_saver(self, service_id: &str, save: FileFn) -> Self {
        self.service(service_id, ServiceBinding::FileSaver { save })
    }

    pub fn loader_provider(self, service_id: &str, factory: Arc<dyn LoaderFactory>) -> Self {
        self.service(service_id, ServiceBinding::LoaderProvider { factory })
    }
}

/// Factory for the `static` loader.
#[derive(Debug, Clone, Default)]
pub struct StaticLoaderFactory {
    modules: HashMap<String, StaticModule>,
}

impl StaticLoaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: &str, module: StaticModule) -> Self {
        self.add_module(name, module);
        self
    }

    pub fn add_module(&mut self, name: &str, module: StaticModule) {
        self.modules.insert(name.to_string(), module);
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

impl LoaderFactory for StaticLoaderFactory {
    fn create(&self, plugin: &PluginContext<'_>) -> Result<Box<dyn Loader>, String> {
        let name = plugin.attribute("module").unwrap_or(plugin.plugin_id.as_str());
        let module = self
            .modules
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no static module named '{}'", name))?;
        Ok(Box::new(StaticLoader { module }))
    }
}

/// Loader over one [`StaticModule`]
#[derive(Debug)]
pub struct StaticLoader {
    module: StaticModule,
}

impl Loader for StaticLoader {
    fn load_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String> {
        debug!("Loading static module for plugin '{}'", plugin.plugin_id);
        match &self.module.on_load {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn load_service(&mut self, _plugin: &PluginContext<'_>, service: &ServiceRequest<'_>) -> Result<ServiceBinding, String> {
        self.module
            .services
            .get(service.service_id)
            .cloned()
            .ok_or_else(|| format!("module has no code for service '{}'", service.service_id))
    }

    fn unload_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String> {
        debug!("Unloading static module for plugin '{}'", plugin.plugin_id);
        match &self.module.on_unload {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}
