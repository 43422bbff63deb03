//! Per-machine critical sections.
//!
//! Request handlers and background jobs both take the machine's lock before
//! opening a write transaction, so a production event can never interleave
//! with a rollover or sweep of the same machine. Different machines never
//! share a lock. A machine's slot lives only while someone holds or waits
//! on it, so ids that never resolve to a machine leave nothing behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub struct MachineLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MachineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_machine<T>(&self, machine_id: &str, op: impl FnOnce() -> T) -> T {
        let slot = self.slot(machine_id);
        let result = {
            // Guards no data; poisoning is ignored.
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            op()
        };
        self.release(machine_id, slot);
        result
    }

    fn slot(&self, machine_id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(machine_id.to_string()).or_default())
    }

    /// Slots are cloned only under the map lock, so a count of one here
    /// means nobody else holds or waits on this machine.
    fn release(&self, machine_id: &str, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        drop(slot);
        if slots
            .get(machine_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            slots.remove(machine_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
