//! Per-packet storage for each dissector's parsed output.
//!
//! The original C dissector chain attaches a `void *` per protocol to each
//! packet and requires every dissector to supply a matching `free_data`
//! destructor. In Rust the slot map below stores `Box<dyn Any + Send +
//! Sync>` values and relies on `Drop` to run whatever destructor the
//! concrete type needs — there is no `free_data` method to implement or
//! forget to call.

use std::any::Any;
use std::collections::HashMap;

use crate::dissector::DissectorId;

/// Type-erased per-protocol data attached to a packet, keyed by the
/// dissector that produced it.
#[derive(Default)]
pub struct ProtocolDataMap {
    slots: HashMap<DissectorId, Box<dyn Any + Send + Sync>>,
}

impl ProtocolDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, id: DissectorId, data: T) {
        self.slots.insert(id, Box::new(data));
    }

    pub fn get<T: Any + Send + Sync>(&self, id: DissectorId) -> Option<&T> {
        self.slots.get(&id).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, id: DissectorId) -> Option<&mut T> {
        self.slots.get_mut(&id).and_then(|b| b.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self, id: DissectorId) -> Option<T> {
        self.slots.remove(&id).and_then(|b| b.downcast::<T>().ok()).map(|b| *b)
    }

    pub fn contains(&self, id: DissectorId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
