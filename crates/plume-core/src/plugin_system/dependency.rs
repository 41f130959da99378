use std::fmt;

use semver::Version;
use serde::Serialize;

use crate::plugin_system::manifest::PluginId;

/// Represents a dependency on another plugin.
///
/// The target is referenced by id only; it is looked up in the registry
/// each time it is needed and never held directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDependency {
    /// The id of the required plugin
    pub plugin_id: PluginId,

    /// Base-load the dependency's code whenever the owner's code is loaded
    pub force_load: bool,

    /// Exact version the dependency must declare, if any
    pub version: Option<Version>,
}

impl PluginDependency {
    /// Create a dependency that only needs the target to be active
    pub fn new(plugin_id: PluginId) -> Self {
        Self {
            plugin_id,
            force_load: false,
            version: None,
        }
    }

    /// Create a dependency whose code is loaded together with the owner's
    pub fn force_loaded(plugin_id: PluginId) -> Self {
        Self {
            plugin_id,
            force_load: true,
            version: None,
        }
    }

    /// Require the target to declare exactly this version
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Check the declared version of the target against this dependency.
    ///
    /// Only equality is checked; a dependency without a version accepts anything.
    pub fn accepts(&self, declared: Option<&Version>) -> bool {
        match &self.version {
            Some(required) => declared == Some(required),
            None => true,
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.force_load { "Loads" } else { "Requires" };
        match &self.version {
            Some(version) => write!(f, "{} plugin: {} (version: {})", requirement_type, self.plugin_id, version),
            None => write!(f, "{} plugin: {} (any version)", requirement_type, self.plugin_id),
        }
    }
}
