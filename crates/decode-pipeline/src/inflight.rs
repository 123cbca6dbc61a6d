//! Per-fingerprint serialization of concurrent decodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Gives at most one caller at a time the right to work on a key.
///
/// Callers that lose the race wait for the winner to finish and should then
/// re-check the result cache before doing the work themselves.
#[derive(Debug, Default)]
pub struct InFlight {
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Held while working on a key; dropping it lets the next waiter in.
#[derive(Debug)]
pub struct InFlightGuard {
    _slot: OwnedMutexGuard<()>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> InFlightGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|_, slot| slot.strong_count() > 0);

            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.to_string(), Arc::downgrade(&slot));
                    slot
                }
            }
        };

        InFlightGuard {
            _slot: slot.lock_owned().await,
        }
    }

    /// Keys currently held or waited on.
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }
}
