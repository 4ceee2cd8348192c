use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::client::{CloudClient, CloudClientBuilder};
use crate::config::{clamp_poll_interval, Config};
use crate::dispatcher::CommandDispatcher;
use crate::reconcile::{CycleStats, Reconciler, SharedReconciler};
use crate::store::StateStore;
use crate::types::FieldValue;
use crate::{Error, Result};

const WRITE_QUEUE_CAPACITY: usize = 64;

/// One full poll of every device. `None` when the anti-race gate skipped it.
pub async fn poll_cycle(
    client: &CloudClient,
    store: &dyn StateStore,
    engine: &SharedReconciler,
) -> Result<Option<CycleStats>> {
    let now = Instant::now();
    {
        let mut engine = engine.lock();
        if !engine.poll_allowed(now) {
            debug!("skipping poll cycle, local write just issued");
            return Ok(None);
        }
        engine.purge_expired(now);
    }

    let devices = client.get_devices().await?;
    let mut stats = CycleStats::default();

    for mut device in devices {
        if device.status.is_empty() {
            match client.get_device_status(&device.id).await {
                Ok(status) => device.status = status,
                Err(e) => {
                    warn!(device = %device.id, error = %e, "status fetch failed, skipping device");
                    stats.failed += 1;
                    continue;
                }
            }
        }
        let device_stats = engine.lock().apply_device(store, &device, Instant::now());
        stats.merge(device_stats);
    }

    debug!(?stats, "poll cycle complete");
    Ok(Some(stats))
}

/// Targeted single-shot re-fetch of some codes of one device. Not gated.
pub async fn refresh_codes(
    client: &CloudClient,
    store: &dyn StateStore,
    engine: &SharedReconciler,
    vendor_id: &str,
    device_key: &str,
    codes: &[&str],
) -> Result<CycleStats> {
    let status = client.get_device_status(vendor_id).await?;
    let wanted: BTreeMap<_, _> = status
        .into_iter()
        .filter(|(code, _)| codes.contains(&code.as_str()))
        .collect();
    trace!(device = %device_key, count = wanted.len(), "applying targeted refresh");
    Ok(engine
        .lock()
        .apply_snapshot(store, device_key, &wanted, Instant::now()))
}

/// A state change reported by the host event layer.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEvent {
    pub key: String,
    pub value: FieldValue,
    pub ack: bool,
}

/// Host-side handle feeding local writes into the service.
#[derive(Clone)]
pub struct WriteEvents {
    tx: mpsc::Sender<WriteEvent>,
}

impl WriteEvents {
    /// Acknowledged events are echoes of our own writes and are dropped here.
    pub async fn send(&self, event: WriteEvent) -> Result<()> {
        if event.ack {
            trace!(key = %event.key, "ignoring acknowledged echo");
            return Ok(());
        }
        self.tx
            .send(event)
            .await
            .map_err(|e| Error::ChannelClosed(format!("write consumer stopped, dropped {}", e.0.key)))
    }
}

struct PollTask {
    handle: JoinHandle<()>,
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct SyncService {
    client: Arc<CloudClient>,
    store: Arc<dyn StateStore>,
    engine: SharedReconciler,
    events: WriteEvents,
    poll_task: Option<PollTask>,
    write_task: JoinHandle<()>,
}

impl SyncService {
    /// Must be called from within a tokio runtime; spawns the write consumer.
    pub fn new(
        client: CloudClient,
        store: Arc<dyn StateStore>,
        pause_window: Duration,
    ) -> Self {
        Self::with_dispatcher(Arc::new(client), store, Reconciler::shared(pause_window), |d| d)
    }

    pub fn from_config(config: &Config, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        let client = CloudClientBuilder::from_config(config).build()?;
        Ok(Self::new(client, store, config.pause_window()))
    }

    /// Like `new`, with a hook to adjust the dispatcher before it starts.
    pub fn with_dispatcher(
        client: Arc<CloudClient>,
        store: Arc<dyn StateStore>,
        engine: SharedReconciler,
        configure: impl FnOnce(CommandDispatcher) -> CommandDispatcher,
    ) -> Self {
        let dispatcher = configure(CommandDispatcher::new(
            client.clone(),
            store.clone(),
            engine.clone(),
        ));
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let write_task = tokio::spawn(consume_writes(dispatcher, rx));

        Self {
            client,
            store,
            engine,
            events: WriteEvents { tx },
            poll_task: None,
            write_task,
        }
    }

    /// Start (or restart) periodic polling. Returns the effective interval.
    pub fn start_polling(&mut self, interval_secs: u64) -> Duration {
        let period = clamp_poll_interval(interval_secs);
        if period.as_secs() != interval_secs {
            warn!(requested = interval_secs, effective = period.as_secs(), "poll interval clamped");
        }

        let client = self.client.clone();
        let store = self.store.clone();
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                match poll_cycle(&client, store.as_ref(), &engine).await {
                    Ok(Some(stats)) if stats.changed > 0 || stats.failed > 0 => {
                        info!(changed = stats.changed, held = stats.held, failed = stats.failed, "poll cycle");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "poll cycle failed"),
                }
            }
        });

        self.poll_task = Some(PollTask { handle });
        info!(interval_secs = period.as_secs(), "polling started");
        period
    }

    pub fn stop_polling(&mut self) {
        if self.poll_task.take().is_some() {
            info!("polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.is_some()
    }

    /// Run one gated poll cycle now.
    pub async fn poll_now(&self) -> Result<Option<CycleStats>> {
        poll_cycle(&self.client, self.store.as_ref(), &self.engine).await
    }

    pub fn events(&self) -> WriteEvents {
        self.events.clone()
    }

    /// Queue a user write of `key`.
    pub async fn on_local_write(&self, key: impl Into<String>, value: FieldValue) -> Result<()> {
        self.events
            .send(WriteEvent {
                key: key.into(),
                value,
                ack: false,
            })
            .await
    }

    pub fn engine(&self) -> &SharedReconciler {
        &self.engine
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.write_task.abort();
    }
}

async fn consume_writes(dispatcher: CommandDispatcher, mut rx: mpsc::Receiver<WriteEvent>) {
    while let Some(event) = rx.recv().await {
        match dispatcher.write(&event.key, event.value).await {
            Ok(_) => {}
            Err(Error::Validation(msg)) => warn!(key = %event.key, "{msg}"),
            Err(e) => warn!(key = %event.key, error = %e, "local write failed"),
        }
    }
    debug!("write channel closed");
}
