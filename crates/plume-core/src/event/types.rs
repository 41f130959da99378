use crate::plugin_system::manifest::PluginId;
use crate::plugin_system::plugin::PluginState;

/// Plugin-specific events
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    /// A plugin's lifecycle state or loaded flag changed
    StateChanged {
        plugin_id: PluginId,
        state: PluginState,
        loaded: bool,
    },
    /// A rescan added or removed plugins
    ListChanged {
        added: Vec<PluginId>,
        removed: Vec<PluginId>,
    },
}

impl PluginEvent {
    /// Get the name of this event
    pub fn name(&self) -> &'static str {
        match self {
            PluginEvent::StateChanged { .. } => "plugin.state_changed",
            PluginEvent::ListChanged { .. } => "plugin.list_changed",
        }
    }

    /// The plugin this event is about, if it concerns a single plugin
    pub fn plugin_id(&self) -> Option<&PluginId> {
        match self {
            PluginEvent::StateChanged { plugin_id, .. } => Some(plugin_id),
            PluginEvent::ListChanged { .. } => None,
        }
    }
}
