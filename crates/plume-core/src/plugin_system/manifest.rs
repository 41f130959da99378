//! Plugin descriptors: the raw tree read from a plugin directory and the
//! validated [`FullDescriptor`] the lifecycle engine works with.
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::{DescriptorProblem, PluginSystemError};
use crate::plugin_system::loader::LoaderRef;
use crate::plugin_system::service::{Service, ServiceFields, ServiceRegistry};
use crate::storage::config::ConfigFormat;

/// Identifier of a plugin, unique within a registry.
///
/// Only ASCII letters, digits, `_` and `-` are accepted, which keeps ids safe
/// to embed in the pipe-delimited cache format and in `plugin:service`
/// loader references.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    /// Validates and wraps a plugin id.
    pub fn new(id: impl Into<String>) -> Result<Self, DescriptorProblem> {
        let id = id.into();
        if id.is_empty() {
            return Err(DescriptorProblem::MissingId);
        }
        if !Self::is_valid(&id) {
            return Err(DescriptorProblem::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Whether `id` only uses the allowed character set.
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PluginId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PluginId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PluginId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// --- Raw descriptor tree, as produced by a DescriptorReader ---

/// Text that is either a single string or a map of locale to translation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    Localized(BTreeMap<String, String>),
}

impl LocalizedText {
    /// Picks the best translation for `locale`.
    ///
    /// Tries the exact locale, then its language part (`de` for `de_AT`),
    /// then the untranslated `C`/`en` entries, then any entry.
    pub fn resolve(&self, locale: Option<&str>) -> Option<&str> {
        match self {
            LocalizedText::Plain(text) => Some(text.as_str()),
            LocalizedText::Localized(map) => {
                let mut candidates: Vec<&str> = Vec::new();
                if let Some(locale) = locale {
                    candidates.push(locale);
                    if let Some((lang, _)) = locale.split_once(['_', '-', '.']) {
                        candidates.push(lang);
                    }
                }
                candidates.extend(["C", "en", ""]);
                candidates
                    .iter()
                    .find_map(|key| map.get(*key))
                    .or_else(|| map.values().next())
                    .map(String::as_str)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDependency {
    pub id: String,
    #[serde(default)]
    pub force_load: bool,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLoader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawService {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Kind-specific fields, interpreted by the service kind's constructor
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// The descriptor tree exactly as read from disk, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<LocalizedText>,
    #[serde(default)]
    pub description: Option<LocalizedText>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub requires_explicit_enabling: bool,
    #[serde(default)]
    pub autoload: bool,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
    #[serde(default)]
    pub loader: Option<RawLoader>,
    #[serde(default)]
    pub services: Vec<RawService>,
}

/// Reads the descriptor file of a plugin directory into a [`RawDescriptor`].
pub trait DescriptorReader: Send + Sync {
    /// Locate the descriptor file inside `directory`, if there is one.
    fn descriptor_path(&self, directory: &Path) -> Option<PathBuf> {
        constants::DESCRIPTOR_FILE_NAMES
            .iter()
            .map(|name| directory.join(name))
            .find(|path| path.is_file())
    }

    /// Read and deserialize the descriptor at `path`.
    fn read(&self, path: &Path) -> Result<RawDescriptor, PluginSystemError>;
}

/// Reads `plugin.json`, `plugin.toml` or `plugin.yaml`, picking the format
/// from the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDescriptorReader;

impl DescriptorReader for FileDescriptorReader {
    fn read(&self, path: &Path) -> Result<RawDescriptor, PluginSystemError> {
        let content = fs::read_to_string(path)
            .map_err(|e| PluginSystemError::io(e, "read_descriptor", path.to_path_buf()))?;
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            PluginSystemError::parse(
                path.to_path_buf(),
                DescriptorProblem::Malformed("unsupported descriptor format".to_string()),
            )
        })?;
        format
            .parse::<RawDescriptor>(&content)
            .map_err(|message| PluginSystemError::parse(path.to_path_buf(), DescriptorProblem::Malformed(message)))
    }
}

// --- Validated descriptor ---

/// Everything a descriptor declares, validated.
#[derive(Debug)]
pub struct FullDescriptor {
    pub id: PluginId,
    pub name: String,
    pub description: String,
    pub version: Option<Version>,
    pub requires_explicit_enabling: bool,
    pub autoload: bool,
    pub dependencies: Vec<PluginDependency>,
    /// `None` means the host's default loader
    pub loader_id: Option<String>,
    pub loader_attributes: BTreeMap<String, String>,
    pub services: Vec<Service>,
}

impl FullDescriptor {
    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id() == service_id)
    }

    pub fn service_index(&self, service_id: &str) -> Option<usize> {
        self.services.iter().position(|s| s.id() == service_id)
    }
}

/// Turns descriptor files into [`FullDescriptor`]s.
///
/// Owns the descriptor reader, the service kinds known to the host and the
/// default loader applied to descriptors that don't declare one.
pub struct DescriptorParser {
    reader: Box<dyn DescriptorReader>,
    kinds: ServiceRegistry,
    default_loader: Option<String>,
    locale: Option<String>,
}

impl fmt::Debug for DescriptorParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorParser")
            .field("kinds", &self.kinds)
            .field("default_loader", &self.default_loader)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl Default for DescriptorParser {
    fn default() -> Self {
        Self::new(Box::new(FileDescriptorReader))
    }
}

impl DescriptorParser {
    /// Create a parser using `reader` and the built-in service kinds
    pub fn new(reader: Box<dyn DescriptorReader>) -> Self {
        Self {
            reader,
            kinds: ServiceRegistry::with_builtins(),
            default_loader: None,
            locale: None,
        }
    }

    pub fn kinds(&self) -> &ServiceRegistry {
        &self.kinds
    }

    pub fn kinds_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.kinds
    }

    pub fn default_loader(&self) -> Option<&str> {
        self.default_loader.as_deref()
    }

    pub fn set_default_loader(&mut self, tag: Option<String>) {
        self.default_loader = tag;
    }

    pub fn set_locale(&mut self, locale: Option<String>) {
        self.locale = locale;
    }

    pub fn descriptor_path(&self, directory: &Path) -> Option<PathBuf> {
        self.reader.descriptor_path(directory)
    }

    /// Read and validate the descriptor of the plugin in `directory`.
    pub fn parse_dir(&self, directory: &Path) -> Result<FullDescriptor, PluginSystemError> {
        let path = self.descriptor_path(directory).ok_or_else(|| {
            PluginSystemError::parse(
                directory.to_path_buf(),
                DescriptorProblem::Malformed("no descriptor file".to_string()),
            )
        })?;
        let raw = self.reader.read(&path)?;
        self.build(raw, directory, &path)
    }

    /// Validate a raw descriptor field by field.
    ///
    /// All problems are collected; the descriptor is rejected as a unit if
    /// there is at least one.
    pub fn build(&self, raw: RawDescriptor, directory: &Path, path: &Path) -> Result<FullDescriptor, PluginSystemError> {
        let mut problems = Vec::new();

        let raw_id = raw.id.unwrap_or_default();
        let id = match PluginId::new(raw_id.clone()) {
            Ok(id) => Some(id),
            Err(problem) => {
                problems.push(problem);
                None
            }
        };

        let locale = self.locale.as_deref();
        let name = raw
            .name
            .as_ref()
            .and_then(|n| n.resolve(locale))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if name.is_none() {
            problems.push(DescriptorProblem::MissingName);
        }
        let description = raw
            .description
            .as_ref()
            .and_then(|d| d.resolve(locale))
            .unwrap_or_default()
            .to_string();

        let version = match raw.version.as_deref().map(Version::parse).transpose() {
            Ok(v) => v,
            Err(e) => {
                problems.push(DescriptorProblem::InvalidVersion(e.to_string()));
                None
            }
        };

        let mut dependencies = Vec::new();
        for raw_dep in raw.dependencies {
            let dep_id = match PluginId::new(raw_dep.id.clone()) {
                Ok(dep_id) => dep_id,
                Err(_) => {
                    problems.push(DescriptorProblem::InvalidDependency(format!(
                        "'{}' is not a valid plugin id",
                        raw_dep.id
                    )));
                    continue;
                }
            };
            let dep_version = match raw_dep.version.as_deref().map(Version::parse).transpose() {
                Ok(v) => v,
                Err(e) => {
                    problems.push(DescriptorProblem::InvalidDependency(format!(
                        "version of '{}': {}",
                        raw_dep.id, e
                    )));
                    continue;
                }
            };
            dependencies.push(PluginDependency {
                plugin_id: dep_id,
                force_load: raw_dep.force_load,
                version: dep_version,
            });
        }

        let (loader_id, loader_attributes) = match raw.loader {
            Some(loader) => match LoaderRef::parse(&loader.kind) {
                Some(loader_ref) => {
                    // A loader provided by another plugin makes that plugin a dependency.
                    if let LoaderRef::Provided { plugin_id: provider, .. } = loader_ref {
                        let is_self = id.as_ref().is_some_and(|own| own == provider);
                        let declared = dependencies.iter().any(|d| d.plugin_id == provider);
                        if !is_self && !declared {
                            if let Ok(provider_id) = PluginId::new(provider) {
                                dependencies.push(PluginDependency::force_loaded(provider_id));
                            }
                        }
                    }
                    (Some(loader.kind), loader.attributes)
                }
                None => {
                    problems.push(DescriptorProblem::InvalidLoader(loader.kind));
                    (None, BTreeMap::new())
                }
            },
            None => {
                if self.default_loader.is_none() {
                    problems.push(DescriptorProblem::MissingLoader);
                }
                (None, BTreeMap::new())
            }
        };

        let mut services: Vec<Service> = Vec::new();
        for (index, raw_service) in raw.services.into_iter().enumerate() {
            let service_id = match raw_service.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(service_id) => service_id.to_string(),
                None => {
                    problems.push(DescriptorProblem::InvalidService {
                        service_id: format!("#{}", index),
                        reason: "missing id".to_string(),
                    });
                    continue;
                }
            };
            if services.iter().any(|s| s.id() == service_id) {
                problems.push(DescriptorProblem::DuplicateService(service_id));
                continue;
            }
            let fields = ServiceFields {
                plugin_id: &raw_id,
                plugin_dir: directory,
                service_id: &service_id,
                values: &raw_service.fields,
            };
            match self.kinds.construct(&raw_service.kind, &fields) {
                Ok(service) => services.push(service),
                Err(problem) => problems.push(problem),
            }
        }

        match (id, name) {
            (Some(id), Some(name)) if problems.is_empty() => Ok(FullDescriptor {
                id,
                name,
                description,
                version,
                requires_explicit_enabling: raw.requires_explicit_enabling,
                autoload: raw.autoload,
                dependencies,
                loader_id,
                loader_attributes,
                services,
            }),
            _ => Err(PluginSystemError::Parse {
                path: path.to_path_buf(),
                problems,
            }),
        }
    }
}
