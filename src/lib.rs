mod client;
pub mod codes;
pub mod coerce;
mod config;
mod dispatcher;
mod error;
mod logger;
pub mod protocol;
mod reconcile;
mod scheduler;
mod store;
mod types;

pub use client::{CloudClient, CloudClientBuilder};
pub use config::{clamp_poll_interval, Config, MessageLogConfig};
pub use dispatcher::{CommandDispatcher, SOFT_REFRESH_DELAY};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use reconcile::{
    CycleStats, Decision, PendingWrite, Reconciler, SharedReconciler, HOLD_WINDOW, LAG_WINDOW,
};
pub use scheduler::{poll_cycle, refresh_codes, SyncService, WriteEvent, WriteEvents};
pub use store::{MemoryStore, StateStore};
pub use types::*;
