//! The registry's record of one plugin.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::LoaderHandle;
use crate::plugin_system::manifest::{DescriptorParser, FullDescriptor, PluginId};

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Available,
    Activating,
    Active,
    Deactivating,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Available => "available",
            PluginState::Activating => "activating",
            PluginState::Active => "active",
            PluginState::Deactivating => "deactivating",
        };
        f.write_str(s)
    }
}

/// How much of the descriptor is known.
///
/// A stub comes from the descriptor cache and only knows the id; it is
/// upgraded by parsing the descriptor the first time more is needed.
#[derive(Debug)]
pub enum Fidelity {
    Stub,
    Full(Box<FullDescriptor>),
}

impl Fidelity {
    /// Replace a stub with the parsed descriptor. A full descriptor is kept.
    pub fn upgrade(self, full: FullDescriptor) -> Fidelity {
        match self {
            Fidelity::Stub => Fidelity::Full(Box::new(full)),
            already => already,
        }
    }
}

/// A plugin known to the registry.
#[derive(Debug)]
pub struct PluginDescriptor {
    id: PluginId,
    directory: PathBuf,
    fidelity: Fidelity,
    state: PluginState,
    loaded: bool,
    use_count: u32,
    loader: Option<LoaderHandle>,
}

impl PluginDescriptor {
    /// A plugin whose descriptor was just parsed
    pub fn full(directory: PathBuf, full: FullDescriptor) -> Self {
        Self {
            id: full.id.clone(),
            directory,
            fidelity: Fidelity::Full(Box::new(full)),
            state: PluginState::Available,
            loaded: false,
            use_count: 0,
            loader: None,
        }
    }

    /// A plugin known from the cache only
    pub fn stub(id: PluginId, directory: PathBuf) -> Self {
        Self {
            id,
            directory,
            fidelity: Fidelity::Stub,
            state: PluginState::Available,
            loaded: false,
            use_count: 0,
            loader: None,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn fidelity(&self) -> &Fidelity {
        &self.fidelity
    }

    pub fn is_full(&self) -> bool {
        matches!(self.fidelity, Fidelity::Full(_))
    }

    pub fn descriptor(&self) -> Option<&FullDescriptor> {
        match &self.fidelity {
            Fidelity::Full(full) => Some(full),
            Fidelity::Stub => None,
        }
    }

    pub(crate) fn descriptor_mut(&mut self) -> Option<&mut FullDescriptor> {
        match &mut self.fidelity {
            Fidelity::Full(full) => Some(full),
            Fidelity::Stub => None,
        }
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == PluginState::Active
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of active plugins depending on this one
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn dependencies(&self) -> &[PluginDependency] {
        self.descriptor().map(|d| d.dependencies.as_slice()).unwrap_or_default()
    }

    /// Parse the descriptor if only a stub is known.
    ///
    /// Fails with `CacheCorruption` if the descriptor now declares a
    /// different id than the one the cache recorded.
    pub fn ensure_full(&mut self, parser: &DescriptorParser) -> Result<(), PluginSystemError> {
        if self.is_full() {
            return Ok(());
        }
        let full = parser.parse_dir(&self.directory)?;
        if full.id != self.id {
            return Err(PluginSystemError::CacheCorruption {
                directory: self.directory.clone(),
                expected: self.id.to_string(),
                found: full.id.to_string(),
            });
        }
        let stub = std::mem::replace(&mut self.fidelity, Fidelity::Stub);
        self.fidelity = stub.upgrade(full);
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: PluginState) {
        self.state = state;
    }

    pub(crate) fn set_loaded(&mut self, handle: Option<LoaderHandle>) {
        self.loaded = handle.is_some();
        self.loader = handle;
    }

    pub(crate) fn acquire(&mut self) {
        self.use_count += 1;
    }

    /// Returns false if the count was already zero
    pub(crate) fn release(&mut self) -> bool {
        match self.use_count.checked_sub(1) {
            Some(count) => {
                self.use_count = count;
                true
            }
            None => false,
        }
    }

    /// Split borrow of the descriptor and the loader, for service loading
    pub(crate) fn parts_mut(&mut self) -> (&PluginId, &Path, Option<&mut FullDescriptor>, Option<&mut LoaderHandle>) {
        let full = match &mut self.fidelity {
            Fidelity::Full(full) => Some(full.as_mut()),
            Fidelity::Stub => None,
        };
        (&self.id, &self.directory, full, self.loader.as_mut())
    }

    pub(crate) fn take_loader(&mut self) -> Option<LoaderHandle> {
        self.loaded = false;
        self.loader.take()
    }

    /// A serializable snapshot for display
    pub fn view(&self) -> PluginView {
        let full = self.descriptor();
        PluginView {
            id: self.id.clone(),
            directory: self.directory.clone(),
            fidelity: if full.is_some() { "full" } else { "stub" },
            name: full.map(|d| d.name.clone()),
            description: full.map(|d| d.description.clone()),
            version: full.and_then(|d| d.version.as_ref().map(ToString::to_string)),
            state: self.state,
            loaded: self.loaded,
            use_count: self.use_count,
            loader: full.map(|d| d.loader_id.clone().unwrap_or_else(|| "default".to_string())),
            dependencies: self.dependencies().to_vec(),
            services: full
                .map(|d| {
                    d.services
                        .iter()
                        .map(|s| ServiceView {
                            id: s.id().to_string(),
                            kind: s.kind().to_string(),
                            active: s.is_active(),
                            loaded: s.is_loaded(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    pub id: String,
    pub kind: String,
    pub active: bool,
    pub loaded: bool,
}

/// Read-only snapshot of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginView {
    pub id: PluginId,
    pub directory: PathBuf,
    pub fidelity: &'static str,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub state: PluginState,
    pub loaded: bool,
    pub use_count: u32,
    pub loader: Option<String>,
    pub dependencies: Vec<PluginDependency>,
    pub services: Vec<ServiceView>,
}

impl PluginView {
    /// Display name, falling back to the id for stubs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}
