use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::kernel::error::{Error, Result};
use crate::plugin_system::registry::{PluginRegistry, RescanRequest};
use crate::plugin_system::plugin::PluginView;
use crate::storage::config::HostConfig;
use crate::storage::state::StateStore;

/// Host-facing plugin operations
#[async_trait]
pub trait PluginManager: Send + Sync {
    /// Rescan the plugin directories and reactivate the plugins that were
    /// active last time. Returns the number of known plugins.
    async fn rescan(&self) -> Result<usize>;

    /// Activate plugins by id
    async fn activate(&self, ids: &[String]) -> Result<()>;

    /// Deactivate plugins by id
    async fn deactivate(&self, ids: &[String]) -> Result<()>;

    async fn get_plugin(&self, id: &str) -> Result<Option<PluginView>>;

    /// Full information on a plugin, reading its descriptor if needed
    async fn describe_plugin(&self, id: &str) -> Result<PluginView>;

    async fn list_plugins(&self) -> Result<Vec<PluginView>>;

    async fn list_active(&self) -> Result<Vec<PluginView>>;

    async fn is_plugin_active(&self, id: &str) -> Result<bool>;

    /// Persist the plugin state and deactivate everything
    async fn shutdown(&self) -> Result<()>;
}

/// Default implementation of plugin manager, persisting state through a
/// [`StateStore`]
#[derive(Clone)]
pub struct DefaultPluginManager {
    registry: Arc<Mutex<PluginRegistry>>,
    store: StateStore,
    search_dirs: Vec<PathBuf>,
    default_loader: Option<String>,
    activate_new: bool,
}

impl DefaultPluginManager {
    /// Create a manager with a fresh registry configured from `config`
    pub fn new(config: &HostConfig) -> Self {
        let mut registry = PluginRegistry::new();
        registry.set_locale(config.locale.clone());
        Self::with_registry(registry, config)
    }

    /// Create a manager around a prepared registry (with host-specific
    /// service kinds or loaders)
    pub fn with_registry(registry: PluginRegistry, config: &HostConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            store: StateStore::new(config.state_dir.clone()),
            search_dirs: config.plugin_dirs.clone(),
            default_loader: config.default_loader.clone(),
            activate_new: config.activate_new,
        }
    }

    /// Get reference to the plugin registry Arc<Mutex>
    pub fn registry(&self) -> &Arc<Mutex<PluginRegistry>> {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Persist the current cache and active plugin list without
    /// deactivating anything.
    pub async fn save_state(&self) -> Result<()> {
        let registry = self.registry.lock().await;
        let active: Vec<String> = registry.list_active().into_iter().map(|p| p.id.to_string()).collect();
        self.store.save(&registry.cache_lines(), &active)?;
        Ok(())
    }

    /// Open a file with the best matching opener. Returns the format id.
    pub async fn open_file(&self, path: &Path) -> Result<String> {
        let mut registry = self.registry.lock().await;
        Ok(registry.open_file(path)?)
    }

    pub async fn save_file(&self, path: &Path, format_id: Option<&str>) -> Result<String> {
        let mut registry = self.registry.lock().await;
        Ok(registry.save_file(path, format_id)?)
    }
}

impl Debug for DefaultPluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid locking in Debug
        f.debug_struct("DefaultPluginManager")
            .field("store", &self.store)
            .field("search_dirs", &self.search_dirs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PluginManager for DefaultPluginManager {
    async fn rescan(&self) -> Result<usize> {
        let request = RescanRequest {
            cache_lines: self.store.load_cache_lines()?,
            previously_active: self.store.load_active_ids()?,
            search_dirs: self.search_dirs.clone(),
            activate_new: self.activate_new,
            default_loader: self.default_loader.clone(),
        };
        let mut registry = self.registry.lock().await;
        let errors = registry.rescan(request);
        let count = registry.list_available().len();
        if !errors.is_empty() {
            warn!("Rescan finished with {} error(s)", errors.len());
            return Err(Error::Plugins(errors));
        }
        info!("Rescan found {} plugin(s)", count);
        Ok(count)
    }

    async fn activate(&self, ids: &[String]) -> Result<()> {
        let mut registry = self.registry.lock().await;
        registry.activate(ids).into_result()?;
        Ok(())
    }

    async fn deactivate(&self, ids: &[String]) -> Result<()> {
        let mut registry = self.registry.lock().await;
        registry.deactivate(ids).into_result()?;
        Ok(())
    }

    async fn get_plugin(&self, id: &str) -> Result<Option<PluginView>> {
        let registry = self.registry.lock().await;
        Ok(registry.lookup(id))
    }

    async fn describe_plugin(&self, id: &str) -> Result<PluginView> {
        let mut registry = self.registry.lock().await;
        Ok(registry.describe(id)?)
    }

    async fn list_plugins(&self) -> Result<Vec<PluginView>> {
        let registry = self.registry.lock().await;
        Ok(registry.list_available())
    }

    async fn list_active(&self) -> Result<Vec<PluginView>> {
        let registry = self.registry.lock().await;
        Ok(registry.list_active())
    }

    async fn is_plugin_active(&self, id: &str) -> Result<bool> {
        let registry = self.registry.lock().await;
        Ok(registry.plugin(id).is_some_and(|p| p.is_active()))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let report = registry.shutdown();
        self.store.save(&report.cache_lines, &report.active_ids)?;
        report.errors.into_result()?;
        Ok(())
    }
}
