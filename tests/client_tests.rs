use serde_json::json;
use thermo_sync::{CloudClient, Command, Error};
use wiremock::matchers::{body_json, body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// base64("key:secret")
const BASIC_AUTH: &str = "Basic a2V5OnNlY3JldA==";

fn client_for(server: &MockServer) -> CloudClient {
    CloudClient::builder(server.uri())
        .token_url(format!("{}/oauth/token", server.uri()))
        .credentials("key", "secret")
        .build()
        .expect("client should build")
}

async fn mount_token(server: &MockServer, token: &str, expires_in: u64, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": token, "expires_in": expires_in})),
        )
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn token_acquired_once_and_cached() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.get_devices().await.unwrap();
    client.get_devices().await.unwrap();
}

#[tokio::test]
async fn short_lived_token_is_refreshed_every_call() {
    let server = MockServer::start().await;
    // Lifetime inside the safety margin is never considered fresh.
    mount_token(&server, "tok-short", 30, 2).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.get_devices().await.unwrap();
    client.get_devices().await.unwrap();
}

#[tokio::test]
async fn unauthorized_retries_once_with_new_token() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 2).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "rt1", "online": true}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "rt1");
}

#[tokio::test]
async fn second_unauthorized_is_returned() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 2).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_devices().await.unwrap_err();
    assert!(err.is_unauthorized(), "expected 401, got {err:?}");
}

#[tokio::test]
async fn token_endpoint_failure_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_devices().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "expected Auth, got {err:?}");
}

#[tokio::test]
async fn token_response_without_access_token_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "bearer"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.ensure_token().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn scope_and_custom_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("scope=devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(header("x-tenant", "home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::builder(server.uri())
        .token_url(format!("{}/oauth/token", server.uri()))
        .credentials("key", "secret")
        .scope("devices")
        .header("X-Tenant", "home")
        .build()
        .unwrap();
    client.get_devices().await.unwrap();
}

#[tokio::test]
async fn device_listing_shapes() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {
                "list": [
                    {
                        "id": "bf.01",
                        "name": "Hall",
                        "category": "wkf",
                        "online": true,
                        "status": [{"code": "temp_set", "value": 215}]
                    },
                    {"device_id": "bf02", "online": false}
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name, "Hall");
    assert_eq!(devices[0].key(), "bf_01");
    assert_eq!(devices[0].status.get("temp_set"), Some(&json!(215)));
    assert_eq!(devices[1].id, "bf02");
    assert!(!devices[1].online);
    assert!(devices[1].status.is_empty());
}

#[tokio::test]
async fn empty_listing_is_not_an_error() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_devices().await.unwrap().is_empty());
}

#[tokio::test]
async fn status_from_dedicated_endpoint() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices/rt1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"code": "temp_set", "value": 210},
                {"code": "TempCurrent", "value": 195}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let status = client.get_device_status("rt1").await.unwrap();
    assert_eq!(status.get("temp_set"), Some(&json!(210)));
    assert_eq!(status.get("temp_current"), Some(&json!(195)));
}

#[tokio::test]
async fn status_falls_back_to_device_endpoint() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices/rt1/status"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/rt1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"id": "rt1", "status": {"switch": true}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let status = client.get_device_status("rt1").await.unwrap();
    assert_eq!(status.get("switch"), Some(&json!(true)));
}

#[tokio::test]
async fn status_falls_back_to_listing() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices/rt1/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/rt1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "other", "status": [{"code": "switch", "value": false}]},
            {"id": "rt1", "status": [{"code": "mode", "value": "manual"}]}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let status = client.get_device_status("rt1").await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status.get("mode"), Some(&json!("manual")));
}

#[tokio::test]
async fn status_of_unlisted_device_is_empty() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices/ghost/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "rt1"}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_device_status("ghost").await.unwrap().is_empty());
}

#[tokio::test]
async fn command_body_and_request_id() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/devices/rt1/commands"))
        .and(header("authorization", "Bearer tok"))
        .and(header_exists("x-request-id"))
        .and(body_json(json!({"commands": [{"code": "temp_set", "value": 280}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "result": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let answer = client
        .send_command("rt1", &[Command::new("temp_set", json!(280))])
        .await
        .unwrap();
    assert_eq!(answer["result"], json!(true));
}

#[tokio::test]
async fn envelope_failure_is_api_error() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/devices/rt1/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": 2008,
            "msg": "command or value not support"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .send_command("rt1", &[Command::new("switch", json!(true))])
        .await
        .unwrap_err();
    match err {
        Error::Api { status, body } => {
            assert_eq!(status, 200);
            assert!(body.contains("not support"), "body: {body}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn vendor_id_is_encoded_as_one_path_segment() {
    let server = MockServer::start().await;
    mount_token(&server, "tok", 3600, 1).await;
    Mock::given(method("GET"))
        .and(path("/devices/bf%2F01/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"code": "switch", "value": true}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/devices/bf%2F01/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let status = client.get_device_status("bf/01").await.unwrap();
    assert_eq!(status.get("switch"), Some(&json!(true)));
    client
        .send_command("bf/01", &[Command::new("switch", json!(false))])
        .await
        .unwrap();
}
