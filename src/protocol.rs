use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::codes::normalize_code;
use crate::types::{Command, Device};

pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 1800;

/// Form fields of a client-credentials token request.
pub fn token_form(scope: Option<&str>) -> Vec<(&'static str, String)> {
    let mut form = vec![("grant_type", "client_credentials".to_string())];
    if let Some(scope) = scope.filter(|s| !s.trim().is_empty()) {
        form.push(("scope", scope.to_string()));
    }
    form
}

/// Access token and lifetime in seconds, from a bare or `result`-wrapped body.
pub fn parse_token_response(body: &Value) -> Option<(String, u64)> {
    let inner = body.get("result").filter(|v| v.is_object()).unwrap_or(body);
    let token = inner.get("access_token")?.as_str()?;
    if token.is_empty() {
        return None;
    }
    let lifetime = inner
        .get("expires_in")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Some((token.to_string(), lifetime))
}

pub fn commands_body(commands: &[Command]) -> Value {
    json!({ "commands": commands })
}

/// Vendor-level failure reported inside a 2xx body.
pub fn envelope_failure(body: &Value) -> Option<String> {
    match body.get("success") {
        Some(Value::Bool(false)) => {
            let code = body.get("code").map(|c| c.to_string()).unwrap_or_default();
            let msg = body.get("msg").and_then(|m| m.as_str()).unwrap_or("");
            Some(format!("vendor rejected request (code {code}): {msg}"))
        }
        _ => None,
    }
}

fn unwrap_result(body: &Value) -> &Value {
    match body.get("result") {
        Some(inner) if !inner.is_null() => inner,
        _ => body,
    }
}

fn device_array(body: &Value) -> Option<&Vec<Value>> {
    let inner = unwrap_result(body);
    if let Value::Array(items) = inner {
        return Some(items);
    }
    ["devices", "list", "data"]
        .iter()
        .find_map(|key| inner.get(*key).and_then(|v| v.as_array()))
}

/// Normalize any of the listing shapes the cloud returns into device records.
pub fn parse_device_list(body: &Value) -> Vec<Device> {
    device_array(body)
        .map(|items| items.iter().filter_map(parse_device).collect())
        .unwrap_or_default()
}

fn first_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
}

/// Device id as text; some listings carry it as a number.
fn device_id(obj: &Value) -> Option<String> {
    ["id", "device_id", "devId", "uuid"]
        .iter()
        .find_map(|k| match obj.get(*k)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub fn parse_device(obj: &Value) -> Option<Device> {
    let id = device_id(obj)?;
    let name = first_str(obj, &["name", "custom_name", "customName"])
        .unwrap_or(&id)
        .to_string();
    let device_type = first_str(obj, &["category", "type", "product_name", "productName"])
        .unwrap_or("")
        .to_string();
    let online = ["online", "is_online", "isOnline"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_bool()))
        .unwrap_or(false);
    let status = ["status", "properties", "dps"]
        .iter()
        .find_map(|k| obj.get(*k))
        .map(flatten_status)
        .unwrap_or_default();

    Some(Device {
        id,
        name,
        device_type,
        online,
        status,
        raw: obj.clone(),
    })
}

/// Flatten `[{code, value}, ...]` or `{code: value}` into canonical code pairs.
pub fn flatten_status(status: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    match status {
        Value::Array(entries) => {
            for entry in entries {
                let Some(code) = entry.get("code").and_then(|c| c.as_str()) else {
                    continue;
                };
                let code = normalize_code(code);
                if code.is_empty() {
                    continue;
                }
                out.insert(code, entry.get("value").cloned().unwrap_or(Value::Null));
            }
        }
        Value::Object(map) => {
            for (code, value) in map {
                let code = normalize_code(code);
                if !code.is_empty() {
                    out.insert(code, value.clone());
                }
            }
        }
        _ => {}
    }
    out
}

/// Status map from a dedicated status endpoint answer.
pub fn parse_status_response(body: &Value) -> BTreeMap<String, Value> {
    let inner = unwrap_result(body);
    match inner {
        Value::Array(_) => flatten_status(inner),
        Value::Object(_) => match inner.get("status") {
            Some(status) => flatten_status(status),
            None => BTreeMap::new(),
        },
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_form_with_and_without_scope() {
        assert_eq!(token_form(None).len(), 1);
        let form = token_form(Some("devices"));
        assert_eq!(form[1], ("scope", "devices".to_string()));
        assert_eq!(token_form(Some("  ")).len(), 1);
    }

    #[test]
    fn token_lifetime_defaults() {
        let (token, lifetime) = parse_token_response(&json!({"access_token": "abc"})).unwrap();
        assert_eq!(token, "abc");
        assert_eq!(lifetime, DEFAULT_TOKEN_LIFETIME_SECS);

        let wrapped = json!({"success": true, "result": {"access_token": "x", "expires_in": 7200}});
        assert_eq!(parse_token_response(&wrapped), Some(("x".to_string(), 7200)));
        assert!(parse_token_response(&json!({"error": "invalid_client"})).is_none());
    }

    #[test]
    fn command_payload_shape() {
        let body = commands_body(&[Command::new("temp_set", json!(215))]);
        assert_eq!(body, json!({"commands": [{"code": "temp_set", "value": 215}]}));
    }

    #[test]
    fn device_list_shapes() {
        let bare = json!([{"id": "a", "status": []}]);
        let wrapped = json!({"result": {"devices": [{"id": "a"}, {"id": "b"}]}});
        let listed = json!({"success": true, "result": {"list": [{"device_id": "c"}]}});
        assert_eq!(parse_device_list(&bare).len(), 1);
        assert_eq!(parse_device_list(&wrapped).len(), 2);
        assert_eq!(parse_device_list(&listed)[0].id, "c");
        assert!(parse_device_list(&json!({"result": {}})).is_empty());
    }

    #[test]
    fn device_fields_and_status() {
        let dev = parse_device(&json!({
            "id": "rt1",
            "name": "Living room",
            "category": "wkf",
            "online": true,
            "status": [
                {"code": "TempSet", "value": 215},
                {"code": "cur_temp", "value": 198},
                {"value": 1}
            ]
        }))
        .unwrap();
        assert_eq!(dev.name, "Living room");
        assert_eq!(dev.device_type, "wkf");
        assert!(dev.online);
        assert_eq!(dev.status.len(), 2);
        assert_eq!(dev.status["temp_set"], json!(215));
        assert_eq!(dev.status["temp_current"], json!(198));
    }

    #[test]
    fn numeric_device_id_is_kept() {
        let devices = parse_device_list(&json!([{"id": 12345, "online": true}, {"id": ""}]));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "12345");
        assert_eq!(devices[0].name, "12345");
    }

    #[test]
    fn status_response_shapes() {
        let arr = json!({"result": [{"code": "switch", "value": true}]});
        assert_eq!(parse_status_response(&arr)["switch"], json!(true));
        let obj = json!({"status": {"mode": "auto"}});
        assert_eq!(parse_status_response(&obj)["mode"], json!("auto"));
    }

    #[test]
    fn envelope_failure_detection() {
        assert!(envelope_failure(&json!({"success": true})).is_none());
        let msg = envelope_failure(&json!({"success": false, "code": 2008, "msg": "bad value"})).unwrap();
        assert!(msg.contains("2008"));
        assert!(msg.contains("bad value"));
    }
}
