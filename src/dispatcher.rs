use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::CloudClient;
use crate::codes::{self, CodeSpec, LOWER_TEMP, MODE, TEMP_CURRENT, UPPER_TEMP};
use crate::coerce::{is_truthy, to_wire_number};
use crate::reconcile::SharedReconciler;
use crate::scheduler::refresh_codes;
use crate::store::StateStore;
use crate::types::{split_key, state_key, Command, FieldValue, ValueKind};
use crate::{Error, Result};

pub const SOFT_REFRESH_DELAY: Duration = Duration::from_millis(1500);

/// Wire encodings for one write, plus the value to reflect locally.
struct Prepared {
    wire: Value,
    alternate: Option<Value>,
    local: FieldValue,
}

pub struct CommandDispatcher {
    client: Arc<CloudClient>,
    store: Arc<dyn StateStore>,
    engine: SharedReconciler,
    soft_refresh_delay: Option<Duration>,
}

impl CommandDispatcher {
    pub fn new(client: Arc<CloudClient>, store: Arc<dyn StateStore>, engine: SharedReconciler) -> Self {
        Self {
            client,
            store,
            engine,
            soft_refresh_delay: Some(SOFT_REFRESH_DELAY),
        }
    }

    /// `None` disables the targeted re-fetch after a write.
    pub fn soft_refresh_delay(mut self, delay: Option<Duration>) -> Self {
        self.soft_refresh_delay = delay;
        self
    }

    /// Submit a local write of `key` (`<deviceKey>.<code>`).
    ///
    /// Returns the value now held locally, or `None` when the code is not
    /// writable and the intent was dropped.
    pub async fn write(&self, key: &str, value: FieldValue) -> Result<Option<FieldValue>> {
        let (device_key, raw_code) =
            split_key(key).ok_or_else(|| Error::Validation(format!("malformed state key: {key}")))?;
        let code = codes::normalize_code(raw_code);

        let Some(spec) = codes::spec(&code).filter(|s| s.writable) else {
            warn!(key, "ignoring write to read-only or unknown code");
            return Ok(None);
        };

        let prepared = self.prepare(device_key, spec, &value)?;
        let vendor_id = self
            .engine
            .lock()
            .vendor_id(device_key)
            .map(str::to_string)
            .unwrap_or_else(|| device_key.to_string());

        self.submit(&vendor_id, &code, &prepared).await?;

        let key = state_key(device_key, &code);
        self.engine.lock().acknowledge_write(
            self.store.as_ref(),
            &key,
            prepared.local.clone(),
            Instant::now(),
        );
        debug!(key = %key, value = %prepared.local, "local write acknowledged");

        if let Some(delay) = self.soft_refresh_delay {
            self.schedule_soft_refresh(delay, vendor_id, device_key.to_string(), code);
        }
        Ok(Some(prepared.local))
    }

    fn prepare(&self, device_key: &str, spec: &CodeSpec, value: &FieldValue) -> Result<Prepared> {
        match spec.kind {
            ValueKind::Number => {
                let mut n = match value {
                    FieldValue::Number(n) => *n,
                    FieldValue::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
                    FieldValue::Bool(b) => f64::from(u8::from(*b)),
                };
                if !n.is_finite() {
                    return Err(Error::Validation(format!("{}: not a finite number: {value}", spec.code)));
                }
                if spec.clamped {
                    n = self.clamp_to_limits(device_key, n);
                }
                let wire = to_wire_number(spec.code, n);
                let local = if spec.tenths { (n * 10.0).round() / 10.0 } else { n };
                Ok(Prepared {
                    wire,
                    alternate: None,
                    local: FieldValue::Number(local),
                })
            }
            ValueKind::Boolean => {
                let on = is_truthy(value);
                Ok(Prepared {
                    wire: Value::Bool(on),
                    alternate: Some(Value::from(u8::from(on))),
                    local: FieldValue::Bool(on),
                })
            }
            ValueKind::String => {
                let mut text = value
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| value.to_string());
                if spec.code == MODE {
                    text = codes::normalize_mode(&text);
                }
                if let Some(choices) = &spec.choices
                    && !choices.allowed.contains(&text.as_str())
                {
                    warn!(code = spec.code, requested = %text, fallback = choices.default, "unrecognized value");
                    text = choices.default.to_string();
                }
                Ok(Prepared {
                    wire: Value::String(text.clone()),
                    alternate: None,
                    local: FieldValue::Text(text),
                })
            }
        }
    }

    /// Clamp to the device's known limits. Either limit may be missing.
    fn clamp_to_limits(&self, device_key: &str, n: f64) -> f64 {
        let limit = |code: &str| {
            self.store
                .get_state(&state_key(device_key, code))
                .and_then(|s| s.value.as_f64())
                .filter(|v| v.is_finite())
        };
        let mut clamped = n;
        if let Some(upper) = limit(UPPER_TEMP)
            && clamped > upper
        {
            clamped = upper;
        }
        if let Some(lower) = limit(LOWER_TEMP)
            && clamped < lower
        {
            clamped = lower;
        }
        if clamped != n {
            debug!(device = %device_key, requested = n, clamped, "setpoint clamped to device limits");
        }
        clamped
    }

    async fn submit(&self, vendor_id: &str, code: &str, prepared: &Prepared) -> Result<()> {
        let primary = [Command::new(code, prepared.wire.clone())];
        match self.client.send_command(vendor_id, &primary).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let Some(alternate) = &prepared.alternate else {
                    return Err(e);
                };
                warn!(device = %vendor_id, code, error = %e, "command rejected, retrying with alternate encoding");
                let retry = [Command::new(code, alternate.clone())];
                self.client.send_command(vendor_id, &retry).await.map(|_| ())
            }
        }
    }

    fn schedule_soft_refresh(&self, delay: Duration, vendor_id: String, device_key: String, code: String) {
        let client = self.client.clone();
        let store = self.store.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let codes = [code.as_str(), TEMP_CURRENT];
            match refresh_codes(&client, store.as_ref(), &engine, &vendor_id, &device_key, &codes).await {
                Ok(stats) => debug!(device = %device_key, ?stats, "soft refresh done"),
                Err(e) => warn!(device = %device_key, error = %e, "soft refresh failed"),
            }
        });
    }
}
