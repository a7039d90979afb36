//! Per-instance publish/subscribe.

use std::rc::Rc;

use serde_json::Value;

use crate::vm::Vm;

pub type Listener = Rc<dyn Fn(&mut Vm<'_>, &[Value])>;

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Emitted on an instance once its own build (children included) completes.
pub const EVENT_VM_READY: &str = "vm-ready";
/// Broadcast over the whole tree when the pending-build counter hits zero.
pub const EVENT_READY_TO_COMPILE: &str = "ready-to-compile";
pub const EVENT_STOP_BUILDING: &str = "stop-building";
/// Public action: recompute the instance's computed properties.
pub const EVENT_REBUILD_COMPUTED: &str = "action:rebuild-computed";
pub const HOOK_PREFIX: &str = "hook:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Entry<H> {
    id: ListenerId,
    event: String,
    handler: H,
    once: bool,
}

pub struct EventBus<H> {
    entries: Vec<Entry<H>>,
    next_id: u64,
}

impl<H> Default for EventBus<H> {
    fn default() -> Self {
        Self {
            entries: vec![],
            next_id: 0,
        }
    }
}

impl<H: Clone> EventBus<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, event: &str, handler: H) -> ListenerId {
        self.push(event, handler, false)
    }

    pub fn once(&mut self, event: &str, handler: H) -> ListenerId {
        self.push(event, handler, true)
    }

    fn push(&mut self, event: &str, handler: H, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Entry {
            id,
            event: event.to_string(),
            handler,
            once,
        });
        id
    }

    /// Remove every listener for `event`.
    pub fn off(&mut self, event: &str) {
        self.entries.retain(|e| e.event != event);
    }

    pub fn off_listener(&mut self, id: ListenerId) {
        self.entries.retain(|e| e.id != id);
    }

    /// Handlers to run for one emission, in registration order.
    /// One-shot listeners are removed as they are taken.
    pub fn take(&mut self, event: &str) -> Vec<H> {
        let handlers = self
            .entries
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.handler.clone())
            .collect();
        self.entries.retain(|e| !(e.once && e.event == event));
        handlers
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.entries.iter().filter(|e| e.event == event).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_listeners_are_taken_once() {
        let mut bus: EventBus<&'static str> = EventBus::new();
        bus.on("ping", "a");
        bus.once("ping", "b");
        bus.on("other", "c");

        assert_eq!(bus.take("ping"), vec!["a", "b"]);
        assert_eq!(bus.take("ping"), vec!["a"]);
        assert_eq!(bus.listener_count("other"), 1);
    }

    #[test]
    fn test_off() {
        let mut bus: EventBus<u8> = EventBus::new();
        let first = bus.on("x", 1);
        bus.on("x", 2);
        bus.off_listener(first);
        assert_eq!(bus.take("x"), vec![2]);
        bus.off("x");
        assert!(bus.take("x").is_empty());
    }
}
