//! Reconciliation of polled cloud values against local state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::codes::{field_meta, normalize_code};
use crate::coerce::{coerce, values_match};
use crate::store::StateStore;
use crate::types::{
    online_key, state_key, Device, FieldMeta, FieldValue, ObjectMeta, Role, ValueKind,
};

pub const HOLD_WINDOW: Duration = Duration::from_secs(60);
pub const LAG_WINDOW: Duration = Duration::from_secs(15);

pub type SharedReconciler = Arc<Mutex<Reconciler>>;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub value: FieldValue,
    pub until: Instant,
}

/// Outcome for one polled field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Changed,
    Skipped,
    /// Disagrees with an active hold.
    Held,
    /// Disagrees with local state right after a local write.
    Suppressed,
    /// Not storable (non-finite number).
    Invalid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub devices: usize,
    pub changed: usize,
    pub skipped: usize,
    pub held: usize,
    pub suppressed: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl CycleStats {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Changed => self.changed += 1,
            Decision::Skipped => self.skipped += 1,
            Decision::Held => self.held += 1,
            Decision::Suppressed => self.suppressed += 1,
            Decision::Invalid => self.invalid += 1,
        }
    }

    pub fn merge(&mut self, other: CycleStats) {
        self.devices += other.devices;
        self.changed += other.changed;
        self.skipped += other.skipped;
        self.held += other.held;
        self.suppressed += other.suppressed;
        self.invalid += other.invalid;
        self.failed += other.failed;
    }
}

pub struct Reconciler {
    pause_window: Duration,
    pending: HashMap<String, PendingWrite>,
    recent: HashMap<String, Instant>,
    last_global_write: Option<Instant>,
    synced_meta: HashMap<String, ObjectMeta>,
    vendor_ids: HashMap<String, String>,
}

impl Reconciler {
    pub fn new(pause_window: Duration) -> Self {
        Self {
            pause_window,
            pending: HashMap::new(),
            recent: HashMap::new(),
            last_global_write: None,
            synced_meta: HashMap::new(),
            vendor_ids: HashMap::new(),
        }
    }

    pub fn shared(pause_window: Duration) -> SharedReconciler {
        Arc::new(Mutex::new(Self::new(pause_window)))
    }

    /// Record a successful local write of `key`. Replaces any earlier hold.
    pub fn register_write(&mut self, key: &str, value: FieldValue, now: Instant) {
        debug!(key, value = %value, "holding local write");
        self.pending.insert(
            key.to_string(),
            PendingWrite {
                value,
                until: now + HOLD_WINDOW,
            },
        );
        self.recent.insert(key.to_string(), now);
        self.last_global_write = Some(now);
    }

    /// Reflect an accepted local write into the store and register it, as one
    /// step under the engine lock so no poll pass can land in between.
    pub fn acknowledge_write(
        &mut self,
        store: &dyn StateStore,
        key: &str,
        value: FieldValue,
        now: Instant,
    ) {
        store.set_state(key, value.clone(), true);
        self.register_write(key, value, now);
    }

    /// Anti-race gate: false while inside the pause window after any write.
    pub fn poll_allowed(&self, now: Instant) -> bool {
        match self.last_global_write {
            Some(at) => now.saturating_duration_since(at) >= self.pause_window,
            None => true,
        }
    }

    pub fn pending(&self, key: &str) -> Option<&PendingWrite> {
        self.pending.get(key)
    }

    pub fn last_write(&self, key: &str) -> Option<Instant> {
        self.recent.get(key).copied()
    }

    /// Vendor id behind a sanitized device key, as last seen in a poll.
    pub fn vendor_id(&self, device_key: &str) -> Option<&str> {
        self.vendor_ids.get(device_key).map(String::as_str)
    }

    /// Drop holds past their window and stamps older than the lag window.
    pub fn purge_expired(&mut self, now: Instant) {
        self.pending.retain(|_, p| now < p.until);
        self.recent
            .retain(|_, at| now.saturating_duration_since(*at) < LAG_WINDOW);
    }

    /// Device object, online flag and every status field of one device.
    pub fn apply_device(
        &mut self,
        store: &dyn StateStore,
        device: &Device,
        now: Instant,
    ) -> CycleStats {
        let device_key = device.key();
        self.vendor_ids
            .insert(device_key.clone(), device.id.clone());
        self.sync_meta(
            store,
            &device_key,
            ObjectMeta::Device {
                name: device.name.clone(),
                device_type: device.device_type.clone(),
            },
        );

        let mut stats = self.apply_snapshot(store, &device_key, &device.status, now);
        stats.record(self.apply_online(store, &device_key, device.online));
        stats.devices = 1;
        stats
    }

    pub fn apply_snapshot(
        &mut self,
        store: &dyn StateStore,
        device_key: &str,
        status: &BTreeMap<String, Value>,
        now: Instant,
    ) -> CycleStats {
        let mut stats = CycleStats::default();
        for (code, raw) in status {
            stats.record(self.apply_field(store, device_key, code, raw, now));
        }
        stats
    }

    pub fn apply_field(
        &mut self,
        store: &dyn StateStore,
        device_key: &str,
        raw_code: &str,
        raw: &Value,
        now: Instant,
    ) -> Decision {
        let code = normalize_code(raw_code);
        let key = state_key(device_key, &code);
        let value = coerce(&code, raw);

        if let FieldValue::Number(n) = value
            && !n.is_finite()
        {
            trace!(key = %key, raw = %raw, "dropping non-numeric value");
            return Decision::Invalid;
        }

        self.sync_meta(store, &key, ObjectMeta::State(field_meta(&code, &value)));

        if let Some(pending) = self.pending.get(&key) {
            if now < pending.until {
                if !values_match(&code, &value, &pending.value) {
                    trace!(key = %key, cloud = %value, pending = %pending.value, "held");
                    return Decision::Held;
                }
                debug!(key = %key, value = %value, "cloud converged on local write");
            } else {
                debug!(key = %key, pending = %pending.value, "hold expired without convergence");
            }
            self.pending.remove(&key);
        }

        let current = store.get_state(&key);

        if let Some(&written) = self.recent.get(&key) {
            if now.saturating_duration_since(written) < LAG_WINDOW {
                let agrees = current
                    .as_ref()
                    .is_some_and(|s| values_match(&code, &value, &s.value));
                if !agrees {
                    trace!(key = %key, cloud = %value, "suppressing lagging cloud value");
                    return Decision::Suppressed;
                }
            } else {
                self.recent.remove(&key);
            }
        }

        match current {
            Some(s) if values_match(&code, &value, &s.value) => Decision::Skipped,
            _ => {
                trace!(key = %key, value = %value, "applying cloud value");
                store.set_state(&key, value, true);
                Decision::Changed
            }
        }
    }

    fn apply_online(&mut self, store: &dyn StateStore, device_key: &str, online: bool) -> Decision {
        let key = online_key(device_key);
        self.sync_meta(
            store,
            &key,
            ObjectMeta::State(FieldMeta {
                name: "Online".to_string(),
                kind: ValueKind::Boolean,
                role: Role::Indicator,
                unit: String::new(),
                writable: false,
            }),
        );
        let value = FieldValue::Bool(online);
        match store.get_state(&key) {
            Some(s) if s.value == value => Decision::Skipped,
            _ => {
                store.set_state(&key, value, true);
                Decision::Changed
            }
        }
    }

    /// Push metadata to the store when it differs from what was last synced.
    fn sync_meta(&mut self, store: &dyn StateStore, key: &str, meta: ObjectMeta) {
        if self.synced_meta.get(key) == Some(&meta) {
            return;
        }
        if store.object_exists(key) {
            store.update_object_metadata(key, &meta);
        } else {
            store.create_object_if_absent(key, &meta);
        }
        self.synced_meta.insert(key.to_string(), meta);
    }
}
