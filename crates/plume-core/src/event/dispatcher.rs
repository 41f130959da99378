use std::collections::HashMap;
use std::fmt;

use log::trace;

use crate::event::{EventId, EventResult, PluginEvent};

/// Handler invoked for dispatched plugin events
pub type EventHandler = Box<dyn Fn(&PluginEvent) -> EventResult + Send + Sync>;

/// Dispatcher for plugin events.
///
/// Handlers are registered either for one event name or for every event.
/// Name-specific handlers run first, in registration order; a handler
/// returning [`EventResult::Stop`] ends propagation.
pub struct EventDispatcher {
    handlers: HashMap<&'static str, Vec<(EventId, EventHandler)>>,
    catch_all: Vec<(EventId, EventHandler)>,
    next_handler_id: EventId,
}

// Manual Debug implementation for EventDispatcher
impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_handler_count: usize = self.handlers.values().map(|v| v.len()).sum();
        f.debug_struct("EventDispatcher")
            .field("name_handlers_count", &name_handler_count)
            .field("catch_all_count", &self.catch_all.len())
            .field("next_handler_id", &self.next_handler_id)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            catch_all: Vec::new(),
            next_handler_id: 1,
        }
    }

    fn next_id(&mut self) -> EventId {
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        id
    }

    /// Register a handler for events named `event_name`
    pub fn register_handler<F>(&mut self, event_name: &'static str, handler: F) -> EventId
    where
        F: Fn(&PluginEvent) -> EventResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.handlers.entry(event_name).or_default().push((id, Box::new(handler)));
        id
    }

    /// Register a handler for every event
    pub fn register_catch_all<F>(&mut self, handler: F) -> EventId
    where
        F: Fn(&PluginEvent) -> EventResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.catch_all.push((id, Box::new(handler)));
        id
    }

    pub fn unregister_handler(&mut self, id: EventId) -> bool {
        let mut found = false;
        for handlers in self.handlers.values_mut().chain(std::iter::once(&mut self.catch_all)) {
            let len_before = handlers.len();
            handlers.retain(|(h_id, _)| *h_id != id);
            if handlers.len() < len_before {
                found = true;
            }
        }
        found
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum::<usize>() + self.catch_all.len()
    }

    /// Deliver `event` to its handlers.
    pub fn dispatch(&self, event: &PluginEvent) -> EventResult {
        trace!("Dispatching {:?}", event);
        let named = self.handlers.get(event.name()).into_iter().flatten();
        for (_, handler) in named.chain(self.catch_all.iter()) {
            if handler(event) == EventResult::Stop {
                return EventResult::Stop;
            }
        }
        EventResult::Continue
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
