//! Host-side tables that active services register into.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::debug;

use crate::plugin_system::loader::LoaderFactory;
use crate::plugin_system::manifest::PluginId;

/// Everything services contribute to the host.
#[derive(Debug, Default)]
pub struct ServiceHost {
    pub resources: ResourceIndex,
    pub formats: FormatDispatcher,
    pub loaders: LoaderDirectory,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct ResourceEntry {
    owner: PluginId,
    data: Arc<[u8]>,
}

/// Named blobs published by resource services.
#[derive(Debug, Default)]
pub struct ResourceIndex {
    entries: BTreeMap<String, ResourceEntry>,
}

impl ResourceIndex {
    pub fn register(&mut self, name: &str, owner: PluginId, data: Arc<[u8]>) -> Result<(), String> {
        if let Some(existing) = self.entries.get(name) {
            return Err(format!(
                "resource '{}' is already provided by plugin '{}'",
                name, existing.owner
            ));
        }
        debug!("Plugin '{}' registered resource '{}'", owner, name);
        self.entries.insert(name.to_string(), ResourceEntry { owner, data });
        Ok(())
    }

    /// Remove `name` if `owner` registered it
    pub fn unregister(&mut self, name: &str, owner: &PluginId) -> bool {
        match self.entries.get(name) {
            Some(entry) if &entry.owner == owner => {
                self.entries.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<[u8]>> {
        self.entries.get(name).map(|e| Arc::clone(&e.data))
    }

    pub fn owner(&self, name: &str) -> Option<&PluginId> {
        self.entries.get(name).map(|e| &e.owner)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// A registered file opener
#[derive(Debug, Clone, PartialEq)]
pub struct OpenerEntry {
    pub plugin_id: PluginId,
    pub service_id: String,
    pub format_id: String,
    pub description: String,
    pub priority: i32,
    pub has_probe: bool,
    pub suffixes: Vec<String>,
    pub mime_types: Vec<String>,
}

impl OpenerEntry {
    /// Whether the file suffix (without dot, any case) is one of ours
    pub fn matches_suffix(&self, suffix: &str) -> bool {
        self.suffixes.iter().any(|s| s.eq_ignore_ascii_case(suffix))
    }
}

/// A registered file saver
#[derive(Debug, Clone, PartialEq)]
pub struct SaverEntry {
    pub plugin_id: PluginId,
    pub service_id: String,
    pub format_id: String,
    pub description: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub default_priority: Option<i32>,
}

/// File opener and saver tables.
///
/// Also tracks which plugins are in the middle of a save; a plugin whose
/// saver is in use refuses deactivation.
#[derive(Debug, Default)]
pub struct FormatDispatcher {
    openers: Vec<OpenerEntry>,
    savers: Vec<SaverEntry>,
    in_use: HashMap<PluginId, u32>,
}

impl FormatDispatcher {
    pub fn register_opener(&mut self, entry: OpenerEntry) -> Result<(), String> {
        if self.openers.iter().any(|o| o.format_id == entry.format_id) {
            return Err(format!("file opener '{}' is already registered", entry.format_id));
        }
        debug!("Registered file opener '{}' (priority {})", entry.format_id, entry.priority);
        self.openers.push(entry);
        Ok(())
    }

    pub fn unregister_opener(&mut self, plugin_id: &PluginId, service_id: &str) -> bool {
        let before = self.openers.len();
        self.openers
            .retain(|o| !(&o.plugin_id == plugin_id && o.service_id == service_id));
        self.openers.len() < before
    }

    /// Openers by descending priority, ties in registration order
    pub fn openers(&self) -> Vec<&OpenerEntry> {
        let mut openers: Vec<&OpenerEntry> = self.openers.iter().collect();
        openers.sort_by(|a, b| b.priority.cmp(&a.priority));
        openers
    }

    pub fn opener_for_format(&self, format_id: &str) -> Option<&OpenerEntry> {
        self.openers.iter().find(|o| o.format_id == format_id)
    }

    pub fn register_saver(&mut self, entry: SaverEntry) -> Result<(), String> {
        if self.savers.iter().any(|s| s.format_id == entry.format_id) {
            return Err(format!("file saver '{}' is already registered", entry.format_id));
        }
        debug!("Registered file saver '{}'", entry.format_id);
        self.savers.push(entry);
        Ok(())
    }

    pub fn unregister_saver(&mut self, plugin_id: &PluginId, service_id: &str) -> bool {
        let before = self.savers.len();
        self.savers
            .retain(|s| !(&s.plugin_id == plugin_id && s.service_id == service_id));
        self.savers.len() < before
    }

    pub fn savers(&self) -> &[SaverEntry] {
        &self.savers
    }

    pub fn saver_for_format(&self, format_id: &str) -> Option<&SaverEntry> {
        self.savers.iter().find(|s| s.format_id == format_id)
    }

    /// The saver with the highest default priority, if any declares one
    pub fn default_saver(&self) -> Option<&SaverEntry> {
        self.savers
            .iter()
            .filter(|s| s.default_priority.is_some())
            .fold(None, |best: Option<&SaverEntry>, s| match best {
                Some(b) if b.default_priority >= s.default_priority => Some(b),
                _ => Some(s),
            })
    }

    pub fn mark_in_use(&mut self, plugin_id: &PluginId) {
        *self.in_use.entry(plugin_id.clone()).or_insert(0) += 1;
    }

    pub fn release(&mut self, plugin_id: &PluginId) {
        if let Some(count) = self.in_use.get_mut(plugin_id) {
            *count -= 1;
            if *count == 0 {
                self.in_use.remove(plugin_id);
            }
        }
    }

    pub fn is_in_use(&self, plugin_id: &PluginId) -> bool {
        self.in_use.contains_key(plugin_id)
    }
}

/// Who provides a `plugin:service` loader type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedLoader {
    pub plugin_id: PluginId,
    pub service_id: String,
}

/// Loader types known to the host: bootstrap factories compiled into the
/// host and types currently provided by active plugins.
#[derive(Default)]
pub struct LoaderDirectory {
    bootstrap: BTreeMap<String, Arc<dyn LoaderFactory>>,
    provided: BTreeMap<String, ProvidedLoader>,
}

impl std::fmt::Debug for LoaderDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderDirectory")
            .field("bootstrap", &self.bootstrap.keys().collect::<Vec<_>>())
            .field("provided", &self.provided)
            .finish()
    }
}

impl LoaderDirectory {
    /// Add a bootstrap loader under `tag`.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is already registered.
    pub fn register_bootstrap(&mut self, tag: &str, factory: Arc<dyn LoaderFactory>) {
        assert!(
            !self.bootstrap.contains_key(tag),
            "loader type '{}' is already registered",
            tag
        );
        self.bootstrap.insert(tag.to_string(), factory);
    }

    pub fn bootstrap(&self, tag: &str) -> Option<Arc<dyn LoaderFactory>> {
        self.bootstrap.get(tag).cloned()
    }

    pub fn register_provided(&mut self, loader_type: &str, plugin_id: PluginId, service_id: String) -> Result<(), String> {
        if let Some(existing) = self.provided.get(loader_type) {
            return Err(format!(
                "loader type '{}' is already provided by plugin '{}'",
                loader_type, existing.plugin_id
            ));
        }
        debug!("Plugin '{}' provides loader type '{}'", plugin_id, loader_type);
        self.provided
            .insert(loader_type.to_string(), ProvidedLoader { plugin_id, service_id });
        Ok(())
    }

    pub fn unregister_provided(&mut self, loader_type: &str) -> bool {
        self.provided.remove(loader_type).is_some()
    }

    pub fn provided(&self, loader_type: &str) -> Option<&ProvidedLoader> {
        self.provided.get(loader_type)
    }

    /// All loader types currently usable, bootstrap tags first
    pub fn loader_types(&self) -> Vec<&str> {
        self.bootstrap
            .keys()
            .chain(self.provided.keys())
            .map(String::as_str)
            .collect()
    }
}
