use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::event::{EventDispatcher, PluginEvent};
use crate::kernel::constants::NATIVE_LOADER_TAG;
use crate::plugin_system::cache::{CacheOutcome, DescriptorCache};
use crate::plugin_system::engine::{LifecycleEngine, PluginTable};
use crate::plugin_system::error::{ErrorList, PluginSystemError};
use crate::plugin_system::host::{OpenerEntry, ServiceHost};
use crate::plugin_system::loader::LoaderFactory;
use crate::plugin_system::manifest::{DescriptorParser, PluginId};
use crate::plugin_system::native_loader::NativeLoaderFactory;
use crate::plugin_system::plugin::{PluginDescriptor, PluginView};
use crate::plugin_system::service::{Service, ServiceBody, ServiceFields};

/// Inputs of [`PluginRegistry::rescan`]
#[derive(Debug, Clone, Default)]
pub struct RescanRequest {
    /// Cache lines persisted by the previous run
    pub cache_lines: Vec<String>,
    /// Ids of plugins active at the end of the previous run
    pub previously_active: Vec<String>,
    /// Directories searched for plugin directories, recursively
    pub search_dirs: Vec<PathBuf>,
    /// Activate plugins discovered for the first time
    pub activate_new: bool,
    /// Loader tag for descriptors that don't declare a loader
    pub default_loader: Option<String>,
}

/// State to persist, collected by [`PluginRegistry::shutdown`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub cache_lines: Vec<String>,
    pub active_ids: Vec<String>,
    pub errors: ErrorList,
}

#[derive(Debug, Default)]
struct ScanState {
    visited: HashSet<PathBuf>,
    added: Vec<PluginId>,
    removed: Vec<PluginId>,
    new_ids: Vec<PluginId>,
    /// Descriptors whose id was taken when their directory was scanned
    clashes: Vec<(PathBuf, PluginDescriptor, CacheOutcome)>,
}

/// Registry for plugins: discovery, activation state and the services
/// active plugins contribute.
pub struct PluginRegistry {
    plugins: PluginTable,
    directories: HashMap<PathBuf, PluginId>,
    host: ServiceHost,
    parser: DescriptorParser,
    cache: DescriptorCache,
    events: EventDispatcher,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("host", &self.host)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create a registry reading descriptor files, with the `native` loader
    pub fn new() -> Self {
        Self::with_parser(DescriptorParser::default())
    }

    pub fn with_parser(parser: DescriptorParser) -> Self {
        let mut host = ServiceHost::new();
        host.loaders
            .register_bootstrap(NATIVE_LOADER_TAG, Arc::new(NativeLoaderFactory));
        Self {
            plugins: PluginTable::new(),
            directories: HashMap::new(),
            host,
            parser,
            cache: DescriptorCache::new(),
            events: EventDispatcher::new(),
        }
    }

    fn engine(&mut self) -> LifecycleEngine<'_> {
        LifecycleEngine::new(&mut self.plugins, &mut self.host, &self.parser, &self.events)
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventDispatcher {
        &mut self.events
    }

    pub fn host(&self) -> &ServiceHost {
        &self.host
    }

    pub(crate) fn host_mut(&mut self) -> &mut ServiceHost {
        &mut self.host
    }

    pub fn parser(&self) -> &DescriptorParser {
        &self.parser
    }

    pub fn set_locale(&mut self, locale: Option<String>) {
        self.parser.set_locale(locale);
    }

    /// Add a service kind descriptors can use.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is already defined.
    pub fn define_service_kind<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(&ServiceFields<'_>) -> Result<ServiceBody, String> + Send + Sync + 'static,
    {
        self.parser.kinds_mut().define(tag, constructor);
    }

    /// Add a bootstrap loader type.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is already registered.
    pub fn register_loader_kind(&mut self, tag: &str, factory: Arc<dyn LoaderFactory>) {
        self.host.loaders.register_bootstrap(tag, factory);
    }

    // --- discovery ---

    /// Discover plugins in the search directories and reconcile them with
    /// the plugins already known.
    ///
    /// Unchanged plugins found in the cache are registered as stubs. Plugins
    /// whose directory disappeared are forgotten unless active. Afterwards the
    /// previously active plugins are activated again, along with newly
    /// discovered ones when `activate_new` is set. Every failure is
    /// collected; one bad plugin never stops the scan.
    pub fn rescan(&mut self, request: RescanRequest) -> ErrorList {
        let mut errors = ErrorList::new();
        if !request.cache_lines.is_empty() {
            let restored = self.cache.restore(&request.cache_lines);
            debug!("Restored {} plugin cache entr(ies)", restored);
        }
        if request.default_loader.is_some() {
            self.parser.set_default_loader(request.default_loader.clone());
        }
        self.cache.reset_ages();

        let mut scan = ScanState::default();
        for dir in &request.search_dirs {
            self.scan_directory(dir, &mut scan, &mut errors);
        }

        let vanished: Vec<PluginId> = self
            .plugins
            .values()
            .filter(|p| !scan.visited.contains(p.directory()))
            .map(|p| p.id().clone())
            .collect();
        for id in vanished {
            let active = self.plugins.get(&id).is_some_and(|p| p.is_active());
            if active {
                warn!("Directory of active plugin '{}' disappeared; keeping it until deactivated", id);
                continue;
            }
            self.remove_plugin(&id);
            scan.removed.push(id);
        }

        // A clash with a plugin whose directory vanished is a move
        for (dir, descriptor, outcome) in std::mem::take(&mut scan.clashes) {
            let id = descriptor.id().clone();
            match self.plugins.get(&id) {
                Some(other) => {
                    errors.push(PluginSystemError::DuplicatePlugin {
                        plugin_id: id.to_string(),
                        directory: dir.clone(),
                        existing: other.directory().to_path_buf(),
                    });
                    self.cache.forget(&dir);
                }
                None => {
                    debug!("Plugin '{}' moved to {}", id, dir.display());
                    self.register_scanned(dir, descriptor, outcome, &mut scan);
                }
            }
        }

        let mut to_activate: Vec<PluginId> = Vec::new();
        for id in &request.previously_active {
            match self.plugins.get_key_value(id.as_str()) {
                Some((key, _)) if !to_activate.contains(key) => to_activate.push(key.clone()),
                Some(_) => {}
                None => debug!("Previously active plugin '{}' is no longer available", id),
            }
        }
        if request.activate_new {
            for id in &scan.new_ids {
                let explicit = self
                    .plugins
                    .get(id)
                    .and_then(PluginDescriptor::descriptor)
                    .is_some_and(|d| d.requires_explicit_enabling);
                if !explicit && !to_activate.contains(id) {
                    to_activate.push(id.clone());
                }
            }
        }
        errors.append(self.activate(&to_activate));

        info!(
            "Rescan found {} plugin(s): {} added, {} removed, {} error(s)",
            self.plugins.len(),
            scan.added.len(),
            scan.removed.len(),
            errors.len()
        );
        if !scan.added.is_empty() || !scan.removed.is_empty() {
            self.events.dispatch(&PluginEvent::ListChanged {
                added: scan.added,
                removed: scan.removed,
            });
        }
        errors
    }

    fn scan_directory(&mut self, dir: &Path, scan: &mut ScanState, errors: &mut ErrorList) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Plugin directory {} does not exist", dir.display());
                return;
            }
            Err(e) => {
                errors.push(PluginSystemError::io(e, "read_dir", dir.to_path_buf()));
                return;
            }
        };
        let mut subdirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();
        for subdir in subdirs {
            self.scan_plugin_dir(&subdir, scan, errors);
        }
    }

    fn scan_plugin_dir(&mut self, dir: &Path, scan: &mut ScanState, errors: &mut ErrorList) {
        // Directories without a descriptor group plugins
        if self.parser.descriptor_path(dir).is_none() {
            self.scan_directory(dir, scan, errors);
            return;
        }
        if !scan.visited.insert(dir.to_path_buf()) {
            return;
        }

        if let Some(existing) = self.directories.get(dir).cloned() {
            if self.cache.is_fresh(dir, &self.parser) {
                self.cache.touch(dir);
                return;
            }
            let in_use = self.plugins.get(&existing).is_some_and(|p| p.is_active() || p.is_loaded());
            if in_use {
                warn!(
                    "Descriptor of active plugin '{}' changed; the change applies once it is deactivated",
                    existing
                );
                self.cache.touch(dir);
                return;
            }
            self.remove_plugin(&existing);
            scan.removed.push(existing);
        }

        match self.cache.lookup_or_parse(dir, &self.parser) {
            Ok(None) => {}
            Ok(Some((descriptor, outcome))) => {
                if self.plugins.contains_key(descriptor.id()) {
                    // Decided once vanished plugins are gone
                    scan.clashes.push((dir.to_path_buf(), descriptor, outcome));
                    return;
                }
                self.register_scanned(dir.to_path_buf(), descriptor, outcome, scan);
            }
            Err(e) => {
                warn!("Skipping plugin in {}: {}", dir.display(), e);
                errors.push(e);
            }
        }
    }

    fn register_scanned(&mut self, dir: PathBuf, descriptor: PluginDescriptor, outcome: CacheOutcome, scan: &mut ScanState) {
        let id = descriptor.id().clone();
        match &outcome {
            CacheOutcome::Added => scan.new_ids.push(id.clone()),
            CacheOutcome::Replaced { previous_id } => {
                debug!("Plugin '{}' in {} replaced '{}'", id, dir.display(), previous_id);
                scan.new_ids.push(id.clone());
            }
            CacheOutcome::Reused | CacheOutcome::Modified => {}
        }
        debug!("Registered plugin '{}' from {} ({:?})", id, dir.display(), outcome);
        self.directories.insert(dir, id.clone());
        self.plugins.insert(id.clone(), descriptor);
        scan.added.push(id);
    }

    fn remove_plugin(&mut self, id: &PluginId) {
        if let Some(plugin) = self.plugins.remove(id) {
            self.directories.remove(plugin.directory());
            debug!("Forgot plugin '{}'", id);
        }
    }

    // --- lifecycle ---

    /// Activate each plugin in turn. Failures of one don't affect the others.
    pub fn activate<I, S>(&mut self, plugin_ids: I) -> ErrorList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut errors = ErrorList::new();
        let mut engine = self.engine();
        for plugin_id in plugin_ids {
            let plugin_id = plugin_id.as_ref();
            if let Err(e) = engine.activate(plugin_id) {
                errors.push(PluginSystemError::nested(
                    format!("Couldn't activate plugin '{}'", plugin_id),
                    e,
                ));
            }
        }
        self.forget_stale_entries(&errors);
        errors
    }

    /// Deactivate the plugins in whatever order their dependencies allow.
    pub fn deactivate<I, S>(&mut self, plugin_ids: I) -> ErrorList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.engine().deactivate_all(plugin_ids)
    }

    /// Load a plugin's base code. The plugin must be active.
    pub fn load_base(&mut self, plugin_id: &str) -> Result<(), ErrorList> {
        let outcome = self.engine().load_base(plugin_id);
        if let Err(errors) = &outcome {
            self.forget_stale_entries(errors);
        }
        outcome
    }

    pub fn load_service(&mut self, plugin_id: &str, service_id: &str) -> Result<(), ErrorList> {
        let outcome = self.engine().load_service(plugin_id, service_id);
        if let Err(errors) = &outcome {
            self.forget_stale_entries(errors);
        }
        outcome
    }

    /// Drop cache entries that recorded the wrong id for their directory,
    /// so the next rescan parses those descriptors again.
    fn forget_stale_entries(&mut self, errors: &ErrorList) {
        for error in errors.leaves() {
            if let PluginSystemError::CacheCorruption { directory, expected, found } = error {
                warn!(
                    "Cache entry for {} said '{}' but the descriptor declares '{}'; forgetting it",
                    directory.display(),
                    expected,
                    found
                );
                self.cache.forget(directory);
            }
        }
    }

    pub fn unload_service(&mut self, plugin_id: &str, service_id: &str) -> Result<(), ErrorList> {
        self.engine().unload_service(plugin_id, service_id)
    }

    /// Collect the state to persist, then deactivate every active plugin.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let active: Vec<PluginId> = self
            .plugins
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id().clone())
            .collect();
        let cache_lines = self.cache.serialize();
        let errors = self.engine().deactivate_all(&active);
        info!("Shut down {} active plugin(s)", active.len());
        ShutdownReport {
            cache_lines,
            active_ids: active.iter().map(ToString::to_string).collect(),
            errors,
        }
    }

    /// Current cache lines, as [`shutdown`](Self::shutdown) would report them
    pub fn cache_lines(&self) -> Vec<String> {
        self.cache.serialize()
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    // --- queries ---

    pub fn plugin(&self, plugin_id: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(plugin_id)
    }

    pub fn lookup(&self, plugin_id: &str) -> Option<PluginView> {
        self.plugins.get(plugin_id).map(PluginDescriptor::view)
    }

    /// Like [`lookup`](Self::lookup), reading the full descriptor of a stub first.
    pub fn describe(&mut self, plugin_id: &str) -> Result<PluginView, PluginSystemError> {
        let parser = &self.parser;
        let plugin = self
            .plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginSystemError::UnknownPlugin {
                plugin_id: plugin_id.to_string(),
                referenced_by: None,
            })?;
        if let Err(e) = plugin.ensure_full(parser) {
            if let PluginSystemError::CacheCorruption { directory, .. } = &e {
                warn!("Forgetting stale cache entry for {}", directory.display());
                self.cache.forget(directory);
            }
            return Err(e);
        }
        Ok(plugin.view())
    }

    pub fn list_available(&self) -> Vec<PluginView> {
        self.plugins.values().map(PluginDescriptor::view).collect()
    }

    pub fn list_active(&self) -> Vec<PluginView> {
        self.plugins
            .values()
            .filter(|p| p.is_active())
            .map(PluginDescriptor::view)
            .collect()
    }

    pub fn service(&self, plugin_id: &str, service_id: &str) -> Option<&Service> {
        self.plugins.get(plugin_id)?.descriptor()?.service(service_id)
    }

    /// Data of a resource published by an active plugin
    pub fn resource(&self, name: &str) -> Option<Arc<[u8]>> {
        self.host.resources.get(name)
    }

    // --- file formats ---

    /// Find the opener for a file.
    ///
    /// Openers are tried by descending priority. Those with a probe
    /// function get their code loaded and are asked; the others match on
    /// the file suffix.
    pub fn probe_file(&mut self, path: &Path) -> Result<Option<OpenerEntry>, ErrorList> {
        let suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        let candidates: Vec<OpenerEntry> = self.host.formats.openers().into_iter().cloned().collect();
        let mut errors = ErrorList::new();
        for opener in candidates {
            let suffix_match = suffix.as_deref().is_some_and(|s| opener.matches_suffix(s));
            if !opener.has_probe {
                if suffix_match {
                    return Ok(Some(opener));
                }
                continue;
            }
            if let Err(e) = self.load_service(opener.plugin_id.as_str(), &opener.service_id) {
                warn!("Skipping file opener '{}': {}", opener.format_id, e);
                errors.append(e);
                continue;
            }
            let probe = self
                .service(opener.plugin_id.as_str(), &opener.service_id)
                .and_then(Service::opener_functions)
                .and_then(|(probe, _)| probe);
            match probe {
                Some(probe) if probe(path) => return Ok(Some(opener)),
                Some(_) => {}
                None if suffix_match => return Ok(Some(opener)),
                None => {}
            }
        }
        if errors.is_empty() { Ok(None) } else { Err(errors) }
    }

    /// Open a file with the best matching opener. Returns its format id.
    pub fn open_file(&mut self, path: &Path) -> Result<String, ErrorList> {
        let opener = self.probe_file(path)?.ok_or_else(|| PluginSystemError::NoFormatHandler {
            path: path.to_path_buf(),
            operation: "open".to_string(),
        })?;
        self.load_service(opener.plugin_id.as_str(), &opener.service_id)?;
        let open = self
            .service(opener.plugin_id.as_str(), &opener.service_id)
            .and_then(Service::opener_functions)
            .map(|(_, open)| open)
            .ok_or_else(|| PluginSystemError::ServiceLoadFailed {
                plugin_id: opener.plugin_id.to_string(),
                service_id: opener.service_id.clone(),
                reason: "no open function bound".to_string(),
            })?;
        open(path).map_err(|reason| PluginSystemError::FileOperationFailed {
            plugin_id: opener.plugin_id.to_string(),
            service_id: opener.service_id.clone(),
            operation: "open".to_string(),
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(opener.format_id)
    }

    /// Save a file with the saver for `format_id`, or else the saver whose
    /// extension matches the file, or else the default saver. Returns the
    /// format id used.
    pub fn save_file(&mut self, path: &Path, format_id: Option<&str>) -> Result<String, ErrorList> {
        let suffix = path.extension().and_then(|ext| ext.to_str());
        let formats = &self.host.formats;
        let saver = match format_id {
            Some(format_id) => formats.saver_for_format(format_id),
            None => formats
                .savers()
                .iter()
                .find(|s| {
                    s.extension
                        .as_deref()
                        .zip(suffix)
                        .is_some_and(|(ext, suffix)| ext.eq_ignore_ascii_case(suffix))
                })
                .or_else(|| formats.default_saver()),
        }
        .cloned()
        .ok_or_else(|| PluginSystemError::NoFormatHandler {
            path: path.to_path_buf(),
            operation: "save".to_string(),
        })?;

        self.load_service(saver.plugin_id.as_str(), &saver.service_id)?;
        let save = self
            .service(saver.plugin_id.as_str(), &saver.service_id)
            .and_then(Service::saver_function)
            .ok_or_else(|| PluginSystemError::ServiceLoadFailed {
                plugin_id: saver.plugin_id.to_string(),
                service_id: saver.service_id.clone(),
                reason: "no save function bound".to_string(),
            })?;

        self.host.formats.mark_in_use(&saver.plugin_id);
        let outcome = save(path);
        self.host.formats.release(&saver.plugin_id);
        outcome.map_err(|reason| PluginSystemError::FileOperationFailed {
            plugin_id: saver.plugin_id.to_string(),
            service_id: saver.service_id.clone(),
            operation: "save".to_string(),
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(saver.format_id)
    }
}
