use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    commands_body, envelope_failure, parse_device_list, parse_status_response,
    parse_token_response, token_form,
};
use crate::types::{Command, Device};
use crate::{Error, Result};

/// Tokens are refreshed this long before the server-declared expiry.
const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_SAFETY_MARGIN < self.expires_at
    }
}

pub struct CloudClientBuilder {
    base_url: String,
    token_url: Option<String>,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl CloudClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            headers: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new(&config.base_url)
            .token_url(&config.token_url)
            .credentials(&config.client_id, &config.client_secret)
            .timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(scope) = &config.scope {
            builder = builder.scope(scope);
        }
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        if let Some(log) = &config.message_log {
            builder = builder.message_log(log.mode, &log.path);
        }
        builder
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.token_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    pub fn credentials(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.client_secret = secret.into();
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<CloudClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(CloudClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            token_url: self.token_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scope: self.scope,
            headers: self.headers,
            token: Mutex::new(None),
            logger,
        })
    }
}

/// Authenticated client for the vendor cloud API.
///
/// Shared by the poll loop and the command path. The token cache lock is
/// only held to read or replace the token, so concurrent callers that find
/// it stale each run their own refresh; the last one to finish wins.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    token_url: Option<String>,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    headers: Vec<(String, String)>,
    token: Mutex<Option<CachedToken>>,
    logger: Option<Mutex<MessageLogger>>,
}

impl CloudClient {
    pub fn builder(base_url: impl Into<String>) -> CloudClientBuilder {
        CloudClientBuilder::new(base_url)
    }

    /// Cached access token, or a fresh one from the token endpoint.
    pub async fn ensure_token(&self) -> Result<String> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|t| t.is_fresh(Instant::now()))
            .map(|t| t.access_token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let url = self
            .token_url
            .as_deref()
            .ok_or_else(|| Error::Auth("token endpoint not configured".to_string()))?;

        debug!(url = %url, "requesting access token");
        self.log_request("POST", url, None);

        let resp = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&token_form(self.scope.as_deref()))
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Auth(format!("token response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token endpoint returned HTTP {}: {text}",
                status.as_u16()
            )));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Auth(format!("token response is not JSON: {e}")))?;
        let (access_token, lifetime) = parse_token_response(&body)
            .ok_or_else(|| Error::Auth("token response has no access_token".to_string()))?;

        *self.token.lock() = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!(lifetime, "access token acquired");
        Ok(access_token)
    }

    pub fn invalidate_token(&self) {
        *self.token.lock() = None;
    }

    /// Authenticated request. A 401 drops the cached token and the request is
    /// retried exactly once with a fresh one.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<Value> {
        let token = self.ensure_token().await?;
        match self.send_once(&method, path, body, extra_headers, &token).await {
            Err(e) if e.is_unauthorized() => {
                debug!(path, "unauthorized, refreshing token and retrying once");
                self.invalidate_token();
                let token = self.ensure_token().await?;
                self.send_once(&method, path, body, extra_headers, &token).await
            }
            other => other,
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
        token: &str,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.log_request(method.as_str(), path, body);

        let mut req = self.http.request(method.clone(), &url).bearer_auth(token);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        for (name, value) in extra_headers {
            req = req.header(*name, *value);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        trace!(path, status, "API response");

        if !(200..300).contains(&status) {
            self.log_response(path, status, &Value::String(text.clone()));
            return Err(Error::Api { status, body: text });
        }

        let parsed: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        self.log_response(path, status, &parsed);

        if let Some(msg) = envelope_failure(&parsed) {
            return Err(Error::Api { status, body: msg });
        }
        Ok(parsed)
    }

    /// All devices visible to the credentials, in listing order.
    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        let body = self.request(Method::GET, "/devices", None, &[]).await?;
        let devices = parse_device_list(&body);
        if devices.is_empty() {
            warn!("device listing returned no devices");
        }
        Ok(devices)
    }

    /// Status map for one device: dedicated endpoint, then the device
    /// endpoint, then a full listing.
    pub async fn get_device_status(&self, id: &str) -> Result<BTreeMap<String, Value>> {
        let segment = urlencoding::encode(id);
        match self
            .request(Method::GET, &format!("/devices/{segment}/status"), None, &[])
            .await
        {
            Ok(body) => return Ok(parse_status_response(&body)),
            Err(e) => debug!(device = %id, error = %e, "status endpoint failed"),
        }

        match self
            .request(Method::GET, &format!("/devices/{segment}"), None, &[])
            .await
        {
            Ok(body) => return Ok(parse_status_response(&body)),
            Err(e) => debug!(device = %id, error = %e, "device endpoint failed"),
        }

        let devices = self.get_devices().await?;
        Ok(devices
            .into_iter()
            .find(|d| d.id == id)
            .map(|d| d.status)
            .unwrap_or_default())
    }

    /// Submit a command batch and return the raw vendor answer.
    pub async fn send_command(&self, id: &str, commands: &[Command]) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let body = commands_body(commands);
        if let Some(logger) = &self.logger {
            logger.lock().log_command(&request_id, id, &body);
        }
        debug!(device = %id, request_id = %request_id, count = commands.len(), "sending commands");
        self.request(
            Method::POST,
            &format!("/devices/{}/commands", urlencoding::encode(id)),
            Some(&body),
            &[("X-Request-Id", request_id.as_str())],
        )
        .await
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) {
        if let Some(logger) = &self.logger {
            logger.lock().log_request(method, path, body);
        }
    }

    fn log_response(&self, path: &str, status: u16, body: &Value) {
        if let Some(logger) = &self.logger {
            logger.lock().log_response(path, status, body);
        }
    }
}
