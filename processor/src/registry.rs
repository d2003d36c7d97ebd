//! # Handler Registry
//!
//! Maps (family name, version) to the handler that serves it, and tracks
//! which entries the validator has acknowledged.
//!
//! ## Registration flag
//!
//! The process-wide flag is true only while every held handler has been
//! acknowledged. Adding or replacing a handler clears it, as does a lost
//! connection (the validator forgets registrations on disconnect).
//! Re-adding the very same handler leaves it untouched.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::handler::TransactionHandler;

/// Routing key for a handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub family: String,
    pub version: String,
}

impl HandlerKey {
    pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            version: version.into(),
        }
    }

    pub fn of(handler: &dyn TransactionHandler) -> Self {
        Self::new(handler.family_name(), handler.version())
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.version)
    }
}

/// What [`HandlerRegistry::register`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Replaced,
    /// The same handler was already held for this key
    Unchanged,
}

struct Slot {
    handler: Arc<dyn TransactionHandler>,
    acknowledged: bool,
}

/// Concurrent handler table
///
/// Lookups and registrations only contend on the shard holding their key.
pub struct HandlerRegistry {
    handlers: DashMap<HandlerKey, Slot>,
    registered: AtomicBool,
    announced: AtomicBool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            registered: AtomicBool::new(false),
            announced: AtomicBool::new(false),
        }
    }

    /// Adds or replaces the handler for its (family, version).
    ///
    /// Handlers compare by identity: the same `Arc` is a no-op, any other
    /// instance replaces the entry and clears the registration flag.
    pub fn register(&self, handler: Arc<dyn TransactionHandler>) -> RegisterOutcome {
        let key = HandlerKey::of(handler.as_ref());
        let outcome = match self.handlers.entry(key) {
            Entry::Occupied(mut entry) => {
                if Arc::ptr_eq(&entry.get().handler, &handler) {
                    RegisterOutcome::Unchanged
                } else {
                    entry.insert(Slot {
                        handler,
                        acknowledged: false,
                    });
                    RegisterOutcome::Replaced
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    handler,
                    acknowledged: false,
                });
                RegisterOutcome::Added
            }
        };

        if outcome != RegisterOutcome::Unchanged {
            self.registered.store(false, Ordering::SeqCst);
        }
        outcome
    }

    pub fn lookup(&self, family: &str, version: &str) -> Option<Arc<dyn TransactionHandler>> {
        self.handlers
            .get(&HandlerKey::new(family, version))
            .map(|slot| Arc::clone(&slot.handler))
    }

    /// Handlers the validator has not acknowledged yet
    pub fn unacknowledged(&self) -> Vec<Arc<dyn TransactionHandler>> {
        self.handlers
            .iter()
            .filter(|slot| !slot.acknowledged)
            .map(|slot| Arc::clone(&slot.handler))
            .collect()
    }

    /// Records the validator's acknowledgement of `handler`.
    ///
    /// Ignored if the entry was replaced while the request was in flight;
    /// the replacement still needs its own round trip.
    pub fn acknowledge(&self, handler: &Arc<dyn TransactionHandler>) {
        let key = HandlerKey::of(handler.as_ref());
        if let Some(mut slot) = self.handlers.get_mut(&key) {
            if Arc::ptr_eq(&slot.handler, handler) {
                slot.acknowledged = true;
                self.announced.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Sets the registration flag if every entry is acknowledged and
    /// returns it.
    pub fn complete_registration(&self) -> bool {
        self.registered.store(true, Ordering::SeqCst);
        if self.handlers.iter().any(|slot| !slot.acknowledged) {
            self.registered.store(false, Ordering::SeqCst);
        }
        self.registered.load(Ordering::SeqCst)
    }

    /// Forgets every acknowledgement.
    pub fn invalidate(&self) {
        self.registered.store(false, Ordering::SeqCst);
        self.announced.store(false, Ordering::SeqCst);
        for mut slot in self.handlers.iter_mut() {
            slot.acknowledged = false;
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// True once the validator on the current connection has acknowledged
    /// any handler. Replacing a handler keeps it set.
    pub fn has_acknowledged(&self) -> bool {
        self.announced.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn keys(&self) -> Vec<HandlerKey> {
        self.handlers.iter().map(|slot| slot.key().clone()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
