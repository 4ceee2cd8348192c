use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::types::{FieldValue, ObjectMeta, StoredState};

/// Host persistence layer: named state values plus object metadata.
///
/// Calls are synchronous and must not block on I/O; the engine calls them
/// while holding its own bookkeeping lock.
pub trait StateStore: Send + Sync {
    fn get_state(&self, key: &str) -> Option<StoredState>;
    fn set_state(&self, key: &str, value: FieldValue, ack: bool);
    fn object_exists(&self, key: &str) -> bool;
    fn create_object_if_absent(&self, key: &str, meta: &ObjectMeta);
    fn update_object_metadata(&self, key: &str, meta: &ObjectMeta);
}

/// In-process store, for embedding without a host and for tests.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, StoredState>>,
    objects: Mutex<HashMap<String, ObjectMeta>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<ObjectMeta> {
        self.objects.lock().get(key).cloned()
    }

    pub fn value(&self, key: &str) -> Option<FieldValue> {
        self.states.lock().get(key).map(|s| s.value.clone())
    }

    /// Number of `set_state` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl StateStore for MemoryStore {
    fn get_state(&self, key: &str) -> Option<StoredState> {
        self.states.lock().get(key).cloned()
    }

    fn set_state(&self, key: &str, value: FieldValue, ack: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.states
            .lock()
            .insert(key.to_string(), StoredState { value, ack });
    }

    fn object_exists(&self, key: &str) -> bool {
        self.objects.lock().contains_key(key)
    }

    fn create_object_if_absent(&self, key: &str, meta: &ObjectMeta) {
        self.objects
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| meta.clone());
    }

    fn update_object_metadata(&self, key: &str, meta: &ObjectMeta) {
        self.objects.lock().insert(key.to_string(), meta.clone());
    }
}
