//! Listener registry for unsolicited device events.
//!
//! Listeners are callbacks with an optional filter. Registration returns a
//! [`ListenerId`] that is later used to remove the listener.
//!
//! # Example
//!
//! ```
//! use insteon_gateway::dispatcher::{ListenerFilter, ListenerRegistry};
//! use insteon_gateway::Address;
//!
//! let listeners = ListenerRegistry::new();
//! let id = listeners.register(
//!     Some(ListenerFilter::new().source(Address::new(0x12, 0x5F, 0x5E)).command(0x11)),
//!     |event| println!("keypad on: {:?}", event.button()),
//! );
//! assert!(listeners.unregister(id));
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::event::{DeviceEvent, EventMessage};
use crate::address::Address;

/// Callback invoked for matching events.
pub type ListenerCallback = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Criteria a listener can require. Unset fields match anything.
///
/// A filtered listener only ever sees group broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    pub source: Option<Address>,
    pub command: Option<u8>,
    pub button: Option<u8>,
}

impl ListenerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, address: Address) -> Self {
        self.source = Some(address);
        self
    }

    pub fn command(mut self, cmd1: u8) -> Self {
        self.command = Some(cmd1);
        self
    }

    pub fn button(mut self, button: u8) -> Self {
        self.button = Some(button);
        self
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        let EventMessage::Insteon {
            from,
            button,
            cmd1,
            ..
        } = event.message
        else {
            return false;
        };

        self.source.map_or(true, |a| a == from)
            && self.command.map_or(true, |c| c == cmd1)
            && self.button.map_or(true, |b| b == button)
            && event.is_group_broadcast()
    }
}

struct Entry {
    id: ListenerId,
    filter: Option<ListenerFilter>,
    callback: ListenerCallback,
}

/// Engine-scoped collection of listeners.
pub struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback. `None` receives every event.
    pub fn register<F>(&self, filter: Option<ListenerFilter>, callback: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Entry {
                id,
                filter,
                callback: Arc::new(callback),
            });
        }
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|e| e.id != id);
                entries.len() != before
            }
            Err(_) => false,
        }
    }

    /// Remove every listener. Returns how many were removed.
    pub fn clear(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => {
                let n = entries.len();
                entries.clear();
                n
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `event` to every listener. Returns how many callbacks ran.
    ///
    /// The listener set is snapshotted first, so callbacks may register or
    /// unregister listeners. A panicking callback is logged and skipped.
    pub fn notify(&self, event: &DeviceEvent) -> usize {
        let matching: Vec<(ListenerId, ListenerCallback)> = match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .filter(|e| e.filter.map_or(true, |f| f.matches(event)))
                .map(|e| (e.id, e.callback.clone()))
                .collect(),
            Err(_) => return 0,
        };

        for (id, callback) in &matching {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!("Listener {:?} panicked on {}", id, event.frame);
            }
        }
        matching.len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
