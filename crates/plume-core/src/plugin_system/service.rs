//! Services: the typed capabilities a plugin contributes to the host.
//!
//! A descriptor declares its services by kind tag. The [`ServiceRegistry`]
//! maps each tag to a constructor that validates the kind-specific fields;
//! the resulting [`Service`] registers itself with the [`ServiceHost`] when
//! its plugin is activated and withdraws on deactivation. Code for a service
//! is bound lazily through the plugin's loader as a [`ServiceBinding`].
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::kernel::constants::{DEFAULT_OPENER_PRIORITY, MAX_OPENER_PRIORITY};
use crate::plugin_system::error::DescriptorProblem;
use crate::plugin_system::host::{OpenerEntry, SaverEntry, ServiceHost};
use crate::plugin_system::loader::LoaderFactory;
use crate::plugin_system::manifest::PluginId;

pub const GENERAL_KIND: &str = "general";
pub const RESOURCE_KIND: &str = "resource";
pub const FILE_OPENER_KIND: &str = "file_opener";
pub const FILE_SAVER_KIND: &str = "file_saver";
pub const LOADER_PROVIDER_KIND: &str = "plugin_loader";

/// Hook run when a general service starts or stops
pub type HookFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
/// Checks whether a file is in an opener's format
pub type ProbeFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;
/// Reads or writes a file
pub type FileFn = Arc<dyn Fn(&Path) -> Result<(), String> + Send + Sync>;

/// Code a loader hands out for one service.
#[derive(Clone)]
pub enum ServiceBinding {
    General {
        init: Option<HookFn>,
        cleanup: Option<HookFn>,
    },
    FileOpener {
        probe: Option<ProbeFn>,
        open: FileFn,
    },
    FileSaver {
        save: FileFn,
    },
    LoaderProvider {
        factory: Arc<dyn LoaderFactory>,
    },
    /// Binding for a host-defined service kind
    Custom(Arc<dyn Any + Send + Sync>),
}

impl ServiceBinding {
    fn kind_name(&self) -> &'static str {
        match self {
            ServiceBinding::General { .. } => GENERAL_KIND,
            ServiceBinding::FileOpener { .. } => FILE_OPENER_KIND,
            ServiceBinding::FileSaver { .. } => FILE_SAVER_KIND,
            ServiceBinding::LoaderProvider { .. } => LOADER_PROVIDER_KIND,
            ServiceBinding::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceBinding::{}", self.kind_name())
    }
}

/// Behaviour of a service kind defined by the host.
pub trait CustomService: Send + fmt::Debug {
    /// Whether activation needs the plugin's code to be loaded first
    fn needs_code_to_activate(&self) -> bool {
        false
    }

    /// Accept the code produced by the plugin's loader
    fn bind(&mut self, binding: ServiceBinding) -> Result<(), String> {
        let _ = binding;
        Ok(())
    }

    fn unbind(&mut self) {}

    fn activate(&mut self, owner: &PluginId, service_id: &str, host: &mut ServiceHost) -> Result<(), String>;

    fn deactivate(&mut self, owner: &PluginId, service_id: &str, host: &mut ServiceHost) -> Result<(), String>;
}

#[derive(Default)]
pub struct GeneralService {
    init: Option<HookFn>,
    cleanup: Option<HookFn>,
}

#[derive(Debug, Clone)]
pub struct ResourceService {
    pub name: String,
    pub data: Arc<[u8]>,
}

pub struct FileOpenerService {
    pub format_id: String,
    pub description: String,
    pub priority: i32,
    /// Whether the opener ships a probe function or matches by suffix only
    pub has_probe: bool,
    pub suffixes: Vec<String>,
    pub mime_types: Vec<String>,
    probe: Option<ProbeFn>,
    open: Option<FileFn>,
}

pub struct FileSaverService {
    pub format_id: String,
    pub description: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub default_priority: Option<i32>,
    save: Option<FileFn>,
}

pub struct LoaderProviderService {
    /// `plugin_id:service_id`, the type descriptors name in their loader
    pub loader_type: String,
    factory: Option<Arc<dyn LoaderFactory>>,
}

/// Kind-specific state of a service.
pub enum ServiceBody {
    General(GeneralService),
    Resource(ResourceService),
    FileOpener(FileOpenerService),
    FileSaver(FileSaverService),
    LoaderProvider(LoaderProviderService),
    Custom(Box<dyn CustomService>),
}

/// A service declared by a plugin.
pub struct Service {
    id: String,
    kind: String,
    fields: BTreeMap<String, Value>,
    active: bool,
    loaded: bool,
    body: ServiceBody,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.active)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The kind tag the descriptor used
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Kind-specific descriptor fields, as declared
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn body(&self) -> &ServiceBody {
        &self.body
    }

    /// Whether activation has to load the plugin's code first
    pub fn needs_code_to_activate(&self) -> bool {
        match &self.body {
            ServiceBody::General(_) => true,
            ServiceBody::Custom(custom) => custom.needs_code_to_activate(),
            _ => false,
        }
    }

    /// Probe and open functions of a loaded file opener
    pub fn opener_functions(&self) -> Option<(Option<ProbeFn>, FileFn)> {
        match &self.body {
            ServiceBody::FileOpener(opener) => opener.open.clone().map(|open| (opener.probe.clone(), open)),
            _ => None,
        }
    }

    /// Save function of a loaded file saver
    pub fn saver_function(&self) -> Option<FileFn> {
        match &self.body {
            ServiceBody::FileSaver(saver) => saver.save.clone(),
            _ => None,
        }
    }

    /// Loader factory of a loaded loader provider
    pub fn loader_factory(&self) -> Option<Arc<dyn LoaderFactory>> {
        match &self.body {
            ServiceBody::LoaderProvider(provider) => provider.factory.clone(),
            _ => None,
        }
    }

    /// Attach the code produced by the plugin's loader.
    pub(crate) fn bind(&mut self, binding: ServiceBinding) -> Result<(), String> {
        match (&mut self.body, binding) {
            (ServiceBody::General(general), ServiceBinding::General { init, cleanup }) => {
                general.init = init;
                general.cleanup = cleanup;
            }
            (ServiceBody::FileOpener(opener), ServiceBinding::FileOpener { probe, open }) => {
                if opener.has_probe && probe.is_none() {
                    return Err("the loader provided no probe function".to_string());
                }
                opener.probe = probe;
                opener.open = Some(open);
            }
            (ServiceBody::FileSaver(saver), ServiceBinding::FileSaver { save }) => {
                saver.save = Some(save);
            }
            (ServiceBody::LoaderProvider(provider), ServiceBinding::LoaderProvider { factory }) => {
                provider.factory = Some(factory);
            }
            (ServiceBody::Custom(custom), binding) => custom.bind(binding)?,
            // Resources carry their data in the descriptor; any binding is accepted.
            (ServiceBody::Resource(_), _) => {}
            (_, binding) => {
                return Err(format!(
                    "loader returned {} code for a '{}' service",
                    binding.kind_name(),
                    self.kind
                ));
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Drop the bound code.
    pub(crate) fn unbind(&mut self) {
        match &mut self.body {
            ServiceBody::General(general) => {
                general.init = None;
                general.cleanup = None;
            }
            ServiceBody::FileOpener(opener) => {
                opener.probe = None;
                opener.open = None;
            }
            ServiceBody::FileSaver(saver) => saver.save = None,
            ServiceBody::LoaderProvider(provider) => provider.factory = None,
            ServiceBody::Custom(custom) => custom.unbind(),
            ServiceBody::Resource(_) => {}
        }
        self.loaded = false;
    }

    /// Register this service's contribution with the host.
    pub(crate) fn activate(&mut self, owner: &PluginId, host: &mut ServiceHost) -> Result<(), String> {
        if self.active {
            return Ok(());
        }
        match &mut self.body {
            ServiceBody::General(general) => {
                if !self.loaded {
                    return Err("service code is not loaded".to_string());
                }
                if let Some(init) = &general.init {
                    init()?;
                }
            }
            ServiceBody::Resource(resource) => {
                host.resources
                    .register(&resource.name, owner.clone(), Arc::clone(&resource.data))?;
            }
            ServiceBody::FileOpener(opener) => {
                host.formats.register_opener(OpenerEntry {
                    plugin_id: owner.clone(),
                    service_id: self.id.clone(),
                    format_id: opener.format_id.clone(),
                    description: opener.description.clone(),
                    priority: opener.priority,
                    has_probe: opener.has_probe,
                    suffixes: opener.suffixes.clone(),
                    mime_types: opener.mime_types.clone(),
                })?;
            }
            ServiceBody::FileSaver(saver) => {
                host.formats.register_saver(SaverEntry {
                    plugin_id: owner.clone(),
                    service_id: self.id.clone(),
                    format_id: saver.format_id.clone(),
                    description: saver.description.clone(),
                    extension: saver.extension.clone(),
                    mime_type: saver.mime_type.clone(),
                    default_priority: saver.default_priority,
                })?;
            }
            ServiceBody::LoaderProvider(provider) => {
                host.loaders
                    .register_provided(&provider.loader_type, owner.clone(), self.id.clone())?;
            }
            ServiceBody::Custom(custom) => custom.activate(owner, &self.id, host)?,
        }
        self.active = true;
        Ok(())
    }

    /// Withdraw this service's contribution from the host.
    pub(crate) fn deactivate(&mut self, owner: &PluginId, host: &mut ServiceHost) -> Result<(), String> {
        if !self.active {
            return Ok(());
        }
        match &mut self.body {
            ServiceBody::General(general) => {
                if let Some(cleanup) = &general.cleanup {
                    cleanup()?;
                }
            }
            ServiceBody::Resource(resource) => {
                host.resources.unregister(&resource.name, owner);
            }
            ServiceBody::FileOpener(_) => {
                host.formats.unregister_opener(owner, &self.id);
            }
            ServiceBody::FileSaver(_) => {
                if host.formats.is_in_use(owner) {
                    return Err("the saver is in use".to_string());
                }
                host.formats.unregister_saver(owner, &self.id);
            }
            ServiceBody::LoaderProvider(provider) => {
                host.loaders.unregister_provided(&provider.loader_type);
            }
            ServiceBody::Custom(custom) => custom.deactivate(owner, &self.id, host)?,
        }
        self.active = false;
        Ok(())
    }
}

/// Descriptor fields of one service, handed to a kind's constructor.
#[derive(Debug, Clone, Copy)]
pub struct ServiceFields<'a> {
    pub plugin_id: &'a str,
    pub plugin_dir: &'a Path,
    pub service_id: &'a str,
    pub values: &'a BTreeMap<String, Value>,
}

impl<'a> ServiceFields<'a> {
    pub fn string(&self, key: &str) -> Result<Option<&'a str>, String> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(format!("'{}' must be a string", key)),
        }
    }

    pub fn required_string(&self, key: &str) -> Result<&'a str, String> {
        self.string(key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| format!("'{}' is required", key))
    }

    pub fn integer(&self, key: &str) -> Result<Option<i64>, String> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| format!("'{}' must be an integer", key)),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| format!("'{}' must be an integer", key)),
            Some(_) => Err(format!("'{}' must be an integer", key)),
        }
    }

    pub fn boolean(&self, key: &str) -> Result<Option<bool>, String> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(format!("'{}' must be true or false", key)),
        }
    }

    /// A list of strings; a single string counts as a one-element list.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, String> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(format!("'{}' must only contain strings", key)),
                })
                .collect(),
            Some(_) => Err(format!("'{}' must be a list of strings", key)),
        }
    }

    /// `plugin_id:service_id`, the id services use to name themselves host-wide
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.plugin_id, self.service_id)
    }
}

/// Builds a [`ServiceBody`] from descriptor fields
pub type ServiceConstructor = Arc<dyn Fn(&ServiceFields<'_>) -> Result<ServiceBody, String> + Send + Sync>;

/// Map from service kind tag to constructor.
#[derive(Clone)]
pub struct ServiceRegistry {
    constructors: HashMap<String, ServiceConstructor>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").field("kinds", &self.kinds()).finish()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ServiceRegistry {
    /// A registry without any kinds
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the five built-in kinds
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.define(GENERAL_KIND, |_| Ok(ServiceBody::General(GeneralService::default())));
        registry.define(RESOURCE_KIND, build_resource);
        registry.define(FILE_OPENER_KIND, build_file_opener);
        registry.define(FILE_SAVER_KIND, build_file_saver);
        registry.define(LOADER_PROVIDER_KIND, |fields| {
            Ok(ServiceBody::LoaderProvider(LoaderProviderService {
                loader_type: fields.qualified_id(),
                factory: None,
            }))
        });
        registry
    }

    /// Add a service kind.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is already defined.
    pub fn define<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(&ServiceFields<'_>) -> Result<ServiceBody, String> + Send + Sync + 'static,
    {
        assert!(
            !self.constructors.contains_key(tag),
            "service kind '{}' is already defined",
            tag
        );
        self.constructors.insert(tag.to_string(), Arc::new(constructor));
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// All defined kind tags, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a service of kind `tag` from its descriptor fields.
    pub fn construct(&self, tag: &str, fields: &ServiceFields<'_>) -> Result<Service, DescriptorProblem> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| DescriptorProblem::UnknownServiceKind {
                service_id: fields.service_id.to_string(),
                kind: tag.to_string(),
            })?;
        let body = constructor(fields).map_err(|reason| DescriptorProblem::InvalidService {
            service_id: fields.service_id.to_string(),
            reason,
        })?;
        Ok(Service {
            id: fields.service_id.to_string(),
            kind: tag.to_string(),
            fields: fields.values.clone(),
            active: false,
            loaded: false,
            body,
        })
    }
}

fn build_resource(fields: &ServiceFields<'_>) -> Result<ServiceBody, String> {
    let name = fields.required_string("name")?.to_string();
    let data: Arc<[u8]> = match (fields.string("value")?, fields.string("file")?) {
        (Some(value), None) => Arc::from(value.as_bytes()),
        (None, Some(file)) => {
            let path = fields.plugin_dir.join(file);
            let bytes = fs::read(&path).map_err(|e| format!("can't read '{}': {}", path.display(), e))?;
            Arc::from(bytes)
        }
        (Some(_), Some(_)) => return Err("'value' and 'file' are mutually exclusive".to_string()),
        (None, None) => return Err("either 'value' or 'file' is required".to_string()),
    };
    Ok(ServiceBody::Resource(ResourceService { name, data }))
}

fn build_file_opener(fields: &ServiceFields<'_>) -> Result<ServiceBody, String> {
    let priority = fields
        .integer("priority")?
        .map(|p| p.clamp(0, MAX_OPENER_PRIORITY as i64) as i32)
        .unwrap_or(DEFAULT_OPENER_PRIORITY);
    let suffixes = fields
        .string_list("suffixes")?
        .into_iter()
        .map(|s| s.trim_start_matches('.').to_lowercase())
        .collect();
    Ok(ServiceBody::FileOpener(FileOpenerService {
        format_id: fields.qualified_id(),
        description: fields.string("description")?.unwrap_or_default().to_string(),
        priority,
        has_probe: fields.boolean("probe")?.unwrap_or(true),
        suffixes,
        mime_types: fields.string_list("mime_types")?,
        probe: None,
        open: None,
    }))
}

fn build_file_saver(fields: &ServiceFields<'_>) -> Result<ServiceBody, String> {
    let default_priority = fields
        .integer("default_priority")?
        .map(|p| i32::try_from(p).map_err(|_| "'default_priority' is out of range".to_string()))
        .transpose()?;
    Ok(ServiceBody::FileSaver(FileSaverService {
        format_id: fields.qualified_id(),
        description: fields.string("description")?.unwrap_or_default().to_string(),
        extension: fields.string("extension")?.map(|e| e.trim_start_matches('.').to_string()),
        mime_type: fields.string("mime_type")?.map(str::to_string),
        default_priority,
        save: None,
    }))
}
