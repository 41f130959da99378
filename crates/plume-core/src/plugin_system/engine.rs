//! The lifecycle engine: activation, code loading and deactivation of
//! plugins, including dependency propagation and use counting.
//!
//! An engine borrows the registry's plugin table and service host for the
//! duration of one host-level operation. Cycle detection uses two stacks
//! owned by the engine (one for activation, one for base loading), and a
//! journal of plugins activated during the operation lets a failed
//! activation roll back the dependencies it pulled in.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::event::{EventDispatcher, PluginEvent};
use crate::plugin_system::error::{ErrorList, PluginSystemError};
use crate::plugin_system::host::ServiceHost;
use crate::plugin_system::loader::{LoaderFactory, LoaderHandle, LoaderRef, PluginContext, ServiceRequest};
use crate::plugin_system::manifest::{DescriptorParser, FullDescriptor, PluginId};
use crate::plugin_system::plugin::{PluginDescriptor, PluginState};

/// All plugins known to a registry, by id
pub type PluginTable = BTreeMap<PluginId, PluginDescriptor>;

/// Why an activation attempt failed, and whether the plugin itself had
/// already become active (autoload failures happen after that point).
struct Failure {
    errors: ErrorList,
    activated: bool,
}

impl From<ErrorList> for Failure {
    fn from(errors: ErrorList) -> Self {
        Failure { errors, activated: false }
    }
}

impl From<PluginSystemError> for Failure {
    fn from(error: PluginSystemError) -> Self {
        Failure {
            errors: error.into(),
            activated: false,
        }
    }
}

pub struct LifecycleEngine<'a> {
    plugins: &'a mut PluginTable,
    host: &'a mut ServiceHost,
    parser: &'a DescriptorParser,
    events: &'a EventDispatcher,
    activation_stack: Vec<PluginId>,
    load_stack: Vec<PluginId>,
    journal: Vec<PluginId>,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(
        plugins: &'a mut PluginTable,
        host: &'a mut ServiceHost,
        parser: &'a DescriptorParser,
        events: &'a EventDispatcher,
    ) -> Self {
        Self {
            plugins,
            host,
            parser,
            events,
            activation_stack: Vec::new(),
            load_stack: Vec::new(),
            journal: Vec::new(),
        }
    }

    // --- helpers ---

    fn known(&self, plugin_id: &str) -> Result<PluginId, PluginSystemError> {
        self.plugins
            .get_key_value(plugin_id)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| PluginSystemError::UnknownPlugin {
                plugin_id: plugin_id.to_string(),
                referenced_by: None,
            })
    }

    fn plugin(&self, plugin_id: &str) -> Result<&PluginDescriptor, PluginSystemError> {
        self.plugins
            .get(plugin_id)
            .ok_or_else(|| PluginSystemError::UnknownPlugin {
                plugin_id: plugin_id.to_string(),
                referenced_by: None,
            })
    }

    fn plugin_mut(&mut self, plugin_id: &str) -> Result<&mut PluginDescriptor, PluginSystemError> {
        self.plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginSystemError::UnknownPlugin {
                plugin_id: plugin_id.to_string(),
                referenced_by: None,
            })
    }

    fn descriptor_of(&self, plugin_id: &str) -> Result<&FullDescriptor, PluginSystemError> {
        self.plugin(plugin_id)?
            .descriptor()
            .ok_or_else(|| PluginSystemError::LoadingError {
                plugin_id: plugin_id.to_string(),
                reason: "descriptor has not been read".to_string(),
            })
    }

    fn ensure_full(&mut self, plugin_id: &PluginId) -> Result<(), PluginSystemError> {
        let parser = self.parser;
        self.plugin_mut(plugin_id.as_str())?.ensure_full(parser)
    }

    fn notify(&self, plugin_id: &PluginId) {
        if let Some(plugin) = self.plugins.get(plugin_id) {
            self.events.dispatch(&PluginEvent::StateChanged {
                plugin_id: plugin_id.clone(),
                state: plugin.state(),
                loaded: plugin.is_loaded(),
            });
        }
    }

    fn set_state(&mut self, plugin_id: &PluginId, state: PluginState) {
        if let Some(plugin) = self.plugins.get_mut(plugin_id) {
            if plugin.state() == state {
                return;
            }
            plugin.set_state(state);
        }
        self.notify(plugin_id);
    }

    fn cycle(stack: &[PluginId], plugin_id: &PluginId) -> Option<PluginSystemError> {
        let start = stack.iter().position(|p| p == plugin_id)?;
        let mut chain: Vec<String> = stack[start..].iter().map(ToString::to_string).collect();
        chain.push(plugin_id.to_string());
        Some(PluginSystemError::CyclicDependency { chain })
    }

    // --- activation ---

    /// Activate a plugin and, first, everything it depends on.
    ///
    /// Activating an active plugin succeeds without doing anything. On
    /// failure, dependencies that were activated by this call are
    /// deactivated again.
    pub fn activate(&mut self, plugin_id: &str) -> Result<(), ErrorList> {
        let id = self.known(plugin_id)?;
        let state = self.plugin(plugin_id)?.state();
        if state == PluginState::Active {
            return Ok(());
        }
        if let Some(cycle) = Self::cycle(&self.activation_stack, &id) {
            return Err(cycle.into());
        }
        if state != PluginState::Available {
            return Err(PluginSystemError::Busy {
                plugin_id: id.to_string(),
                state: state.to_string(),
            }
            .into());
        }

        self.activation_stack.push(id.clone());
        let mark = self.journal.len();
        let outcome = self.activate_pushed(&id);
        self.activation_stack.pop();

        match outcome {
            Ok(()) => {
                self.journal.push(id);
                Ok(())
            }
            Err(Failure { mut errors, activated }) => {
                if activated {
                    self.journal.push(id.clone());
                }
                let rollback: Vec<PluginId> = self.journal.drain(mark..).rev().collect();
                if !rollback.is_empty() {
                    debug!("Rolling back {} plugin(s) activated for '{}'", rollback.len(), id);
                    errors.append(self.deactivate_all(&rollback));
                }
                Err(errors)
            }
        }
    }

    fn activate_pushed(&mut self, id: &PluginId) -> Result<(), Failure> {
        self.ensure_full(id)?;
        self.set_state(id, PluginState::Activating);

        let dependencies = self.plugin(id.as_str())?.dependencies().to_vec();
        let mut errors = ErrorList::new();
        for dep in &dependencies {
            if !self.plugins.contains_key(dep.plugin_id.as_str()) {
                errors.push(PluginSystemError::UnknownPlugin {
                    plugin_id: dep.plugin_id.to_string(),
                    referenced_by: Some(id.to_string()),
                });
                continue;
            }
            if let Err(e) = self.activate(dep.plugin_id.as_str()) {
                errors.push(PluginSystemError::nested(
                    format!("Couldn't activate dependency '{}' of '{}'", dep.plugin_id, id),
                    e,
                ));
                continue;
            }
            let found = self.descriptor_of(dep.plugin_id.as_str())?.version.clone();
            if !dep.accepts(found.as_ref()) {
                errors.push(PluginSystemError::DependencyVersionMismatch {
                    plugin_id: id.to_string(),
                    dependency: dep.plugin_id.to_string(),
                    required: dep.version.as_ref().map(ToString::to_string).unwrap_or_default(),
                    found: found.map(|v| v.to_string()),
                });
            }
        }
        if !errors.is_empty() {
            errors.append(self.release_code(id));
            self.set_state(id, PluginState::Available);
            return Err(errors.into());
        }

        // Services activated before a failing one stay active.
        let service_count = self.descriptor_of(id.as_str())?.services.len();
        for index in 0..service_count {
            if let Err(e) = self.activate_service(id, index) {
                errors.push(e);
            }
        }
        if !errors.is_empty() {
            // Services may have loaded the plugin's code on the way
            errors.append(self.release_code(id));
            self.set_state(id, PluginState::Available);
            return Err(errors.into());
        }

        for dep in &dependencies {
            if let Some(plugin) = self.plugins.get_mut(dep.plugin_id.as_str()) {
                plugin.acquire();
            }
        }
        self.set_state(id, PluginState::Active);
        info!("Activated plugin '{}'", id);

        if self.descriptor_of(id.as_str())?.autoload {
            if let Err(errors) = self.load_base(id.as_str()) {
                return Err(Failure { errors, activated: true });
            }
        }
        Ok(())
    }

    fn activate_service(&mut self, id: &PluginId, index: usize) -> Result<(), PluginSystemError> {
        let (service_id, needs_code, loaded, active) = {
            let service = self
                .descriptor_of(id.as_str())?
                .services
                .get(index)
                .ok_or_else(|| PluginSystemError::UnknownService {
                    plugin_id: id.to_string(),
                    service_id: format!("#{}", index),
                })?;
            (
                service.id().to_string(),
                service.needs_code_to_activate(),
                service.is_loaded(),
                service.is_active(),
            )
        };
        if active {
            return Ok(());
        }
        if needs_code && !loaded {
            self.load_service_at(id, index).map_err(|e| {
                PluginSystemError::nested(
                    format!("Couldn't load code for service '{}' of '{}'", service_id, id),
                    e,
                )
            })?;
        }

        let plugin = self
            .plugins
            .get_mut(id.as_str())
            .ok_or_else(|| PluginSystemError::UnknownPlugin {
                plugin_id: id.to_string(),
                referenced_by: None,
            })?;
        let owner = plugin.id().clone();
        let service = plugin
            .descriptor_mut()
            .and_then(|full| full.services.get_mut(index))
            .ok_or_else(|| PluginSystemError::UnknownService {
                plugin_id: owner.to_string(),
                service_id: service_id.clone(),
            })?;
        service
            .activate(&owner, self.host)
            .map_err(|reason| PluginSystemError::ServiceActivationFailed {
                plugin_id: owner.to_string(),
                service_id,
                reason,
            })
    }

    // --- code loading ---

    /// Load a plugin's base code through its loader.
    ///
    /// Allowed while the plugin is active or activating. Dependencies
    /// marked `force_load` are loaded first.
    pub fn load_base(&mut self, plugin_id: &str) -> Result<(), ErrorList> {
        let id = self.known(plugin_id)?;
        let plugin = self.plugin(plugin_id)?;
        if plugin.is_loaded() {
            return Ok(());
        }
        if !matches!(plugin.state(), PluginState::Active | PluginState::Activating) {
            return Err(PluginSystemError::NotActive {
                plugin_id: id.to_string(),
            }
            .into());
        }
        if let Some(cycle) = Self::cycle(&self.load_stack, &id) {
            return Err(cycle.into());
        }

        self.load_stack.push(id.clone());
        let outcome = self.load_base_pushed(&id);
        self.load_stack.pop();
        outcome
    }

    fn load_base_pushed(&mut self, id: &PluginId) -> Result<(), ErrorList> {
        self.ensure_full(id)?;

        let forced: Vec<PluginId> = self
            .plugin(id.as_str())?
            .dependencies()
            .iter()
            .filter(|d| d.force_load)
            .map(|d| d.plugin_id.clone())
            .collect();
        let mut errors = ErrorList::new();
        for dep in forced {
            if let Err(e) = self.load_base(dep.as_str()) {
                errors.push(PluginSystemError::nested(
                    format!("Couldn't load dependency '{}' of '{}'", dep, id),
                    e,
                ));
            }
        }
        errors.into_result()?;

        let mut handle = self.resolve_loader(id)?;
        {
            let plugin = self.plugin(id.as_str())?;
            let full = self.descriptor_of(id.as_str())?;
            let context = PluginContext {
                plugin_id: plugin.id(),
                directory: plugin.directory(),
                attributes: &full.loader_attributes,
            };
            handle
                .loader_mut()
                .load_base(&context)
                .map_err(|reason| PluginSystemError::LoadingError {
                    plugin_id: id.to_string(),
                    reason,
                })?;
        }

        info!("Loaded plugin '{}' with loader '{}'", id, handle.loader_id());
        self.plugin_mut(id.as_str())?.set_loaded(Some(handle));
        self.notify(id);
        Ok(())
    }

    /// Find the loader factory for a plugin and create its loader.
    fn resolve_loader(&mut self, id: &PluginId) -> Result<LoaderHandle, ErrorList> {
        let declared = self.descriptor_of(id.as_str())?.loader_id.clone();
        let loader_id = match declared.or_else(|| self.parser.default_loader().map(str::to_string)) {
            Some(loader_id) => loader_id,
            None => {
                return Err(PluginSystemError::LoaderResolutionFailed {
                    plugin_id: id.to_string(),
                    loader_id: String::new(),
                    reason: "no loader declared and no default loader configured".to_string(),
                }
                .into());
            }
        };
        let failed = |reason: &str| PluginSystemError::LoaderResolutionFailed {
            plugin_id: id.to_string(),
            loader_id: loader_id.clone(),
            reason: reason.to_string(),
        };

        let factory: Arc<dyn LoaderFactory> = match LoaderRef::parse(&loader_id) {
            None => return Err(failed("malformed loader type").into()),
            Some(LoaderRef::Bootstrap(tag)) => self
                .host
                .loaders
                .bootstrap(tag)
                .ok_or_else(|| failed("no such loader type is registered"))?,
            Some(LoaderRef::Provided { plugin_id, service_id }) => {
                self.provided_factory(id, &loader_id, plugin_id, service_id)?
            }
        };

        let plugin = self.plugin(id.as_str())?;
        let full = self.descriptor_of(id.as_str())?;
        let context = PluginContext {
            plugin_id: plugin.id(),
            directory: plugin.directory(),
            attributes: &full.loader_attributes,
        };
        let loader = factory.create(&context).map_err(|reason| failed(&reason))?;
        debug!("Created loader '{}' for plugin '{}'", loader_id, id);
        Ok(LoaderHandle::new(loader_id.clone(), loader))
    }

    /// Activate the provider of a `plugin:service` loader type and fetch
    /// the factory its service exposes.
    fn provided_factory(
        &mut self,
        owner: &PluginId,
        loader_id: &str,
        provider: &str,
        service_id: &str,
    ) -> Result<Arc<dyn LoaderFactory>, ErrorList> {
        let failed = |reason: &str| PluginSystemError::LoaderResolutionFailed {
            plugin_id: owner.to_string(),
            loader_id: loader_id.to_string(),
            reason: reason.to_string(),
        };
        if !self.plugins.contains_key(provider) {
            return Err(PluginSystemError::UnknownPlugin {
                plugin_id: provider.to_string(),
                referenced_by: Some(owner.to_string()),
            }
            .into());
        }
        self.activate(provider).map_err(|e| {
            PluginSystemError::nested(
                format!("Couldn't activate loader provider '{}' for '{}'", provider, owner),
                e,
            )
        })?;
        self.load_service(provider, service_id).map_err(|e| {
            PluginSystemError::nested(format!("Couldn't load loader service '{}'", loader_id), e)
        })?;
        if self.host.loaders.provided(loader_id).is_none() {
            return Err(failed("the provider did not register this loader type").into());
        }
        self.descriptor_of(provider)?
            .service(service_id)
            .and_then(|service| service.loader_factory())
            .ok_or_else(|| failed("service is not a loader provider").into())
    }

    /// Load the code of one service, loading the plugin's base code first.
    pub fn load_service(&mut self, plugin_id: &str, service_id: &str) -> Result<(), ErrorList> {
        let id = self.known(plugin_id)?;
        if !matches!(
            self.plugin(plugin_id)?.state(),
            PluginState::Active | PluginState::Activating
        ) {
            return Err(PluginSystemError::NotActive {
                plugin_id: id.to_string(),
            }
            .into());
        }
        self.ensure_full(&id)?;
        let index = self
            .descriptor_of(plugin_id)?
            .service_index(service_id)
            .ok_or_else(|| PluginSystemError::UnknownService {
                plugin_id: id.to_string(),
                service_id: service_id.to_string(),
            })?;
        self.load_service_at(&id, index)
    }

    fn load_service_at(&mut self, id: &PluginId, index: usize) -> Result<(), ErrorList> {
        let already = self
            .descriptor_of(id.as_str())?
            .services
            .get(index)
            .is_some_and(|s| s.is_loaded());
        if already {
            return Ok(());
        }
        self.load_base(id.as_str())?;

        let plugin = self.plugin_mut(id.as_str())?;
        let (plugin_id, directory, full, handle) = plugin.parts_mut();
        let owner = plugin_id.to_string();
        let (Some(full), Some(handle)) = (full, handle) else {
            return Err(PluginSystemError::LoadingError {
                plugin_id: owner,
                reason: "plugin code is not loaded".to_string(),
            }
            .into());
        };
        let Some(service) = full.services.get(index) else {
            return Err(PluginSystemError::UnknownService {
                plugin_id: owner,
                service_id: format!("#{}", index),
            }
            .into());
        };
        let service_id = service.id().to_string();
        let binding = {
            let context = PluginContext {
                plugin_id,
                directory,
                attributes: &full.loader_attributes,
            };
            let request = ServiceRequest {
                service_id: service.id(),
                kind: service.kind(),
                fields: service.fields(),
            };
            handle.loader_mut().load_service(&context, &request)
        };
        let load_failed = |reason: String| PluginSystemError::ServiceLoadFailed {
            plugin_id: owner.clone(),
            service_id: service_id.clone(),
            reason,
        };
        let binding = binding.map_err(load_failed)?;
        if let Some(service) = full.services.get_mut(index) {
            service.bind(binding).map_err(load_failed)?;
        }
        debug!("Loaded service '{}' of plugin '{}'", service_id, owner);
        Ok(())
    }

    /// Release the code of one service.
    ///
    /// Services whose activation needed their code can't be unloaded while
    /// they are active.
    pub fn unload_service(&mut self, plugin_id: &str, service_id: &str) -> Result<(), ErrorList> {
        let id = self.known(plugin_id)?;
        let index = self
            .plugin(plugin_id)?
            .descriptor()
            .and_then(|full| full.service_index(service_id))
            .ok_or_else(|| PluginSystemError::UnknownService {
                plugin_id: id.to_string(),
                service_id: service_id.to_string(),
            })?;
        self.unload_service_at(&id, index).map_err(ErrorList::from)
    }

    fn unload_service_at(&mut self, id: &PluginId, index: usize) -> Result<(), PluginSystemError> {
        let plugin = self.plugin_mut(id.as_str())?;
        let (plugin_id, directory, full, handle) = plugin.parts_mut();
        let Some(full) = full else {
            return Ok(());
        };
        let Some(service) = full.services.get(index) else {
            return Ok(());
        };
        if !service.is_loaded() {
            return Ok(());
        }
        if service.is_active() && service.needs_code_to_activate() {
            return Err(PluginSystemError::ServiceLoadFailed {
                plugin_id: plugin_id.to_string(),
                service_id: service.id().to_string(),
                reason: "can't unload the code of an active service".to_string(),
            });
        }
        if let Some(handle) = handle {
            let context = PluginContext {
                plugin_id,
                directory,
                attributes: &full.loader_attributes,
            };
            handle
                .loader_mut()
                .unload_service(&context, service.id())
                .map_err(|reason| PluginSystemError::ServiceLoadFailed {
                    plugin_id: plugin_id.to_string(),
                    service_id: service.id().to_string(),
                    reason,
                })?;
        }
        if let Some(service) = full.services.get_mut(index) {
            service.unbind();
        }
        Ok(())
    }

    /// Unload every service and then the base code of a plugin that is
    /// leaving the active state.
    ///
    /// Code of a plugin that is no longer active is always released; a
    /// service whose code can't be unloaded cleanly is dropped anyway.
    fn release_code(&mut self, id: &PluginId) -> ErrorList {
        let mut errors = ErrorList::new();
        // Services left active by a failed activation are dropped below
        let inactive: Vec<usize> = self
            .descriptor_of(id.as_str())
            .map(|d| {
                d.services
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_loaded() && !s.is_active())
                    .map(|(index, _)| index)
                    .collect()
            })
            .unwrap_or_default();
        for index in inactive {
            if let Err(e) = self.unload_service_at(id, index) {
                errors.push(e);
            }
        }
        if let Some(full) = self.plugins.get_mut(id.as_str()).and_then(|p| p.descriptor_mut()) {
            for service in full.services.iter_mut().filter(|s| s.is_loaded()) {
                warn!("Dropping code of service '{}' of '{}'", service.id(), id);
                service.unbind();
            }
        }
        if let Err(e) = self.unload_base(id) {
            errors.push(e);
        }
        errors
    }

    /// Release the plugin's base code. Fails while a service is loaded.
    fn unload_base(&mut self, id: &PluginId) -> Result<(), PluginSystemError> {
        let plugin = self.plugin_mut(id.as_str())?;
        if !plugin.is_loaded() {
            return Ok(());
        }
        if let Some(service) = plugin
            .descriptor()
            .and_then(|full| full.services.iter().find(|s| s.is_loaded()))
        {
            return Err(PluginSystemError::LoadingError {
                plugin_id: id.to_string(),
                reason: format!("service '{}' is still loaded", service.id()),
            });
        }
        let outcome = match plugin.take_loader() {
            Some(mut handle) => {
                let empty = BTreeMap::new();
                let context = PluginContext {
                    plugin_id: plugin.id(),
                    directory: plugin.directory(),
                    attributes: plugin
                        .descriptor()
                        .map(|full| &full.loader_attributes)
                        .unwrap_or(&empty),
                };
                handle
                    .loader_mut()
                    .unload_base(&context)
                    .map_err(|reason| PluginSystemError::LoadingError {
                        plugin_id: id.to_string(),
                        reason,
                    })
            }
            None => Ok(()),
        };
        debug!("Unloaded plugin '{}'", id);
        self.notify(id);
        outcome
    }

    // --- deactivation ---

    /// Deactivate a plugin.
    ///
    /// Refused while other active plugins depend on it. Deactivating a
    /// plugin that isn't active succeeds without doing anything.
    pub fn deactivate(&mut self, plugin_id: &str) -> Result<(), ErrorList> {
        let id = self.known(plugin_id)?;
        let plugin = self.plugin(plugin_id)?;
        match plugin.state() {
            PluginState::Available => return Ok(()),
            PluginState::Active => {}
            state => {
                return Err(PluginSystemError::Busy {
                    plugin_id: id.to_string(),
                    state: state.to_string(),
                }
                .into());
            }
        }
        if plugin.use_count() > 0 {
            return Err(PluginSystemError::StillInUse {
                plugin_id: id.to_string(),
                use_count: plugin.use_count(),
            }
            .into());
        }

        self.set_state(&id, PluginState::Deactivating);
        let mut errors = ErrorList::new();
        if let Some(plugin) = self.plugins.get_mut(plugin_id) {
            let owner = plugin.id().clone();
            if let Some(full) = plugin.descriptor_mut() {
                for service in full.services.iter_mut() {
                    if let Err(reason) = service.deactivate(&owner, self.host) {
                        errors.push(PluginSystemError::ServiceDeactivationFailed {
                            plugin_id: owner.to_string(),
                            service_id: service.id().to_string(),
                            reason,
                        });
                    }
                }
            }
        }
        if !errors.is_empty() {
            self.set_state(&id, PluginState::Active);
            return Err(errors);
        }

        let dependencies = self.plugin(plugin_id)?.dependencies().to_vec();
        for dep in dependencies {
            if let Some(target) = self.plugins.get_mut(dep.plugin_id.as_str()) {
                if !target.release() {
                    warn!("Use count of '{}' was already zero when '{}' released it", dep.plugin_id, id);
                }
            }
        }

        errors.append(self.release_code(&id));

        self.set_state(&id, PluginState::Available);
        info!("Deactivated plugin '{}'", id);
        errors.into_result()
    }

    /// Deactivate a set of plugins regardless of the order they depend on
    /// each other.
    ///
    /// Makes repeated passes over the plugins still active, stopping once
    /// all are done or a pass makes no progress. Only the errors of the
    /// final, stuck pass are reported, plus errors from plugins that did
    /// get deactivated.
    pub fn deactivate_all<I, S>(&mut self, plugin_ids: I) -> ErrorList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut errors = ErrorList::new();
        let mut pending: Vec<PluginId> = Vec::new();
        for plugin_id in plugin_ids {
            match self.known(plugin_id.as_ref()) {
                Ok(id) if !pending.contains(&id) => pending.push(id),
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        while !pending.is_empty() {
            let mut progress = false;
            let mut pass_errors = ErrorList::new();
            let mut still_active = Vec::new();
            for id in pending {
                match self.deactivate(id.as_str()) {
                    Ok(()) => progress = true,
                    Err(e) => {
                        let active = self.plugins.get(&id).is_some_and(|p| p.is_active());
                        if active {
                            pass_errors.append(e);
                            still_active.push(id);
                        } else {
                            progress = true;
                            errors.append(e);
                        }
                    }
                }
            }
            pending = still_active;
            if !progress {
                errors.append(pass_errors);
                break;
            }
        }
        errors
    }
}
