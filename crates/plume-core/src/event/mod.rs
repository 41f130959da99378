//! # Plume Core Event System
//!
//! Synchronous notifications about plugin state. The lifecycle engine
//! dispatches a [`PluginEvent`] whenever a plugin's state or loaded flag
//! changes and after each rescan; host code observes them by registering
//! handlers on the [`EventDispatcher`].
//!
//! Handlers run inline on the thread performing the plugin operation and
//! receive only the event, so they cannot call back into the registry.
pub mod dispatcher;
pub mod types;

/// Type for handler identifiers
pub type EventId = u64;

/// Result of event processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    /// Event was processed successfully and propagation should continue
    Continue,
    /// Event was processed and propagation should stop
    Stop,
}

/// Re-export important types
pub use dispatcher::{EventDispatcher, EventHandler};
pub use types::PluginEvent;
