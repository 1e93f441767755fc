use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use reqwest::StatusCode;
use runner_ipc::{
    error::RunnerError,
    server::{
        ControlServer, ServerState, CONTROL_REQUEST_ACCELERATION_DURATION,
        CONTROL_REQUEST_ACCELERATION_INTERVAL, HEALTH_CHECK_ENDPOINT, MENU_OPENED_ENDPOINT,
        MESSAGE_ENDPOINT, RECHECK_ENDPOINT,
    },
    services::{CheckInAccelerator, MessageError, Messenger},
    AuthedClient,
};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::{sleep, timeout},
};

#[derive(Default)]
struct RecordingAccelerator {
    overrides: Mutex<Vec<(Duration, Duration)>>,
    forwarding_overrides: Mutex<Vec<(Duration, Duration)>>,
}

impl RecordingAccelerator {
    fn overrides(&self) -> Vec<(Duration, Duration)> {
        self.overrides.lock().unwrap().clone()
    }

    fn forwarding_overrides(&self) -> Vec<(Duration, Duration)> {
        self.forwarding_overrides.lock().unwrap().clone()
    }
}

impl CheckInAccelerator for RecordingAccelerator {
    fn set_check_in_interval_override(&self, interval: Duration, duration: Duration) {
        self.overrides.lock().unwrap().push((interval, duration));
    }

    fn set_forwarding_interval_override(&self, interval: Duration, duration: Duration) {
        self.forwarding_overrides
            .lock()
            .unwrap()
            .push((interval, duration));
    }
}

#[derive(Default)]
struct RecordingMessenger {
    fail: bool,
    messages: Mutex<Vec<(String, Value)>>,
}

impl RecordingMessenger {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Messenger for RecordingMessenger {
    fn send_message(&self, method: &str, params: Value) -> Result<(), MessageError> {
        self.messages
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if self.fail {
            return Err(MessageError::Rejected("messenger unavailable".to_string()));
        }
        Ok(())
    }
}

struct Harness {
    server: Arc<ControlServer>,
    serving: JoinHandle<Result<(), RunnerError>>,
    accelerator: Arc<RecordingAccelerator>,
    messenger: Arc<RecordingMessenger>,
}

impl Harness {
    async fn start(messenger: RecordingMessenger) -> Self {
        let accelerator = Arc::new(RecordingAccelerator::default());
        let messenger = Arc::new(messenger);
        let server = Arc::new(
            ControlServer::new(accelerator.clone(), messenger.clone())
                .await
                .unwrap(),
        );
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        Self {
            server,
            serving,
            accelerator,
            messenger,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.url(), path)
    }

    async fn stop(self) {
        self.server.shutdown(Duration::from_secs(5)).await.unwrap();
        self.serving.await.unwrap().unwrap();
        assert_eq!(self.server.state(), ServerState::Stopped);
    }
}

fn client(token: &str) -> AuthedClient {
    AuthedClient::new(token, Duration::from_secs(5)).unwrap()
}

fn plain_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn authenticated_routes() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;
    let client = client(&token);

    let response = client
        .get(&harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // health accepts any method
    let response = client
        .post(&harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(&harness.url(MENU_OPENED_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let accelerated = vec![(
        CONTROL_REQUEST_ACCELERATION_INTERVAL,
        CONTROL_REQUEST_ACCELERATION_DURATION,
    )];
    assert_eq!(harness.accelerator.overrides(), accelerated);
    assert_eq!(harness.accelerator.forwarding_overrides(), accelerated);

    let response = client
        .post(&harness.url(MESSAGE_ENDPOINT))
        .json(&json!({ "method": "ping", "params": { "tab": 2 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.messenger.messages(),
        vec![("ping".to_string(), json!({ "tab": 2 }))]
    );

    harness.server.deregister_client("test-client").await;
    let response = client
        .get(&harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    harness.stop().await;
}

#[tokio::test]
async fn message_rejects_bad_bodies() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;
    let client = client(&token);
    let url = harness.url(MESSAGE_ENDPOINT);

    let cases: [(&str, &str); 4] = [
        ("empty body", ""),
        ("not json", "definitely not json"),
        ("no method", r#"{"params": {}}"#),
        ("empty method", r#"{"method": ""}"#),
    ];
    for (name, body) in cases {
        let response = client
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name}");
    }

    assert!(harness.messenger.messages().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn message_without_params_forwards_null() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;

    let response = client(&token)
        .post(&harness.url(MESSAGE_ENDPOINT))
        .body(r#"{"method":"refresh"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.messenger.messages(),
        vec![("refresh".to_string(), Value::Null)]
    );

    harness.stop().await;
}

#[tokio::test]
async fn messenger_failure_is_a_server_error() {
    let harness = Harness::start(RecordingMessenger::failing()).await;
    let token = harness.server.register_client("test-client").await;

    let response = client(&token)
        .post(&harness.url(MESSAGE_ENDPOINT))
        .json(&json!({ "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    harness.stop().await;
}

#[tokio::test]
async fn recheck_needs_no_token() {
    let harness = Harness::start(RecordingMessenger::default()).await;

    let response = plain_client()
        .get(harness.url(RECHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.accelerator.overrides(),
        vec![(
            CONTROL_REQUEST_ACCELERATION_INTERVAL,
            CONTROL_REQUEST_ACCELERATION_DURATION
        )]
    );
    // only the check-in loop is accelerated
    assert!(harness.accelerator.forwarding_overrides().is_empty());
    assert_eq!(
        harness.messenger.messages(),
        vec![("recheck".to_string(), Value::Null)]
    );

    harness.stop().await;
}

#[tokio::test]
async fn recheck_hides_messenger_failure() {
    let harness = Harness::start(RecordingMessenger::failing()).await;

    let response = plain_client()
        .get(harness.url(RECHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.accelerator.overrides().len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn rejects_missing_or_malformed_credentials() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;
    let plain = plain_client();

    let response = plain
        .get(harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    for header in [
        format!("Basic {token}"),
        "Bearer ".to_string(),
        format!("Bearer {token}Bearer {token}"),
        format!("bearer {token}"),
        "Bearer not-a-registered-token".to_string(),
    ] {
        let response = plain
            .get(harness.url(MENU_OPENED_ENDPOINT))
            .header("authorization", &header)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{header}");
    }

    assert!(harness.accelerator.overrides().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn tokens_are_per_client_and_stable() {
    let harness = Harness::start(RecordingMessenger::default()).await;

    let first = harness.server.register_client("user-501").await;
    let again = harness.server.register_client("user-501").await;
    let other = harness.server.register_client("user-502").await;
    assert_eq!(first, again);
    assert_ne!(first, other);

    harness.server.deregister_client("user-501").await;

    let response = client(&first)
        .get(&harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client(&other)
        .get(&harness.url(HEALTH_CHECK_ENDPOINT))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // a re-registered key gets a fresh token
    let renewed = harness.server.register_client("user-501").await;
    assert_ne!(renewed, first);

    harness.stop().await;
}

#[tokio::test]
async fn url_points_at_loopback() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let addr = harness.server.local_addr();
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
    assert_eq!(harness.server.url(), format!("http://{addr}"));
    harness.stop().await;
}

const SLOW_BODY: &str = r#"{"method":"ping"}"#;

/// Sends the headers and part of the body of a `/message` request, leaving it in flight.
async fn begin_slow_message(addr: SocketAddr, token: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST {MESSAGE_ENDPOINT} HTTP/1.1\r\nHost: {addr}\r\nAuthorization: Bearer {token}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        SLOW_BODY.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&SLOW_BODY.as_bytes()[..5]).await.unwrap();
    // let the server pick the request up before anything else happens
    sleep(Duration::from_millis(200)).await;
    stream
}

async fn read_response(stream: &mut TcpStream) -> String {
    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Reads until the server closes the connection, which may surface as a reset.
async fn assert_dropped_without_response(stream: &mut TcpStream) {
    let mut response = Vec::new();
    let _ = timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("connection was not dropped");
    assert!(
        response.is_empty(),
        "{}",
        String::from_utf8_lossy(&response)
    );
}

#[tokio::test]
async fn shutdown_lets_in_flight_requests_finish() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;
    let mut stream = begin_slow_message(harness.server.local_addr(), &token).await;

    let shutdown = tokio::spawn({
        let server = harness.server.clone();
        async move { server.shutdown(Duration::from_secs(5)).await }
    });
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.server.state(), ServerState::ShuttingDown);

    stream
        .write_all(&SLOW_BODY.as_bytes()[5..])
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    shutdown.await.unwrap().unwrap();
    harness.serving.await.unwrap().unwrap();
    assert_eq!(harness.server.state(), ServerState::Stopped);
    assert_eq!(harness.messenger.messages().len(), 1);
}

#[tokio::test]
async fn shutdown_abandons_requests_past_the_deadline() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let token = harness.server.register_client("test-client").await;
    let mut stream = begin_slow_message(harness.server.local_addr(), &token).await;

    let deadline = Duration::from_millis(300);
    let result = harness.server.shutdown(deadline).await;
    assert!(
        matches!(result, Err(RunnerError::ShutdownTimedOut(d)) if d == deadline),
        "{result:?}"
    );
    assert_eq!(harness.server.state(), ServerState::Stopped);

    assert_dropped_without_response(&mut stream).await;

    harness.serving.await.unwrap().unwrap();
    assert!(harness.messenger.messages().is_empty());
}

#[tokio::test]
async fn shutdown_drops_connections_stalled_mid_headers() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let mut stream = TcpStream::connect(harness.server.local_addr())
        .await
        .unwrap();
    stream
        .write_all(format!("GET {HEALTH_CHECK_ENDPOINT} HTTP/1.1\r\nHost: x\r\n").as_bytes())
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let deadline = Duration::from_millis(300);
    let result = timeout(Duration::from_secs(10), harness.server.shutdown(deadline))
        .await
        .expect("shutdown outlived its deadline");
    assert!(
        matches!(result, Err(RunnerError::ShutdownTimedOut(d)) if d == deadline),
        "{result:?}"
    );
    assert_eq!(harness.server.state(), ServerState::Stopped);

    assert_dropped_without_response(&mut stream).await;
    timeout(Duration::from_secs(5), harness.serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_before_serve_closes_cleanly() {
    let accelerator = Arc::new(RecordingAccelerator::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let server = ControlServer::new(accelerator, messenger).await.unwrap();
    assert_eq!(server.state(), ServerState::Created);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    // serving after shutdown reports a closed server instead of starting
    server.serve().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(TcpStream::connect(server.local_addr()).await.is_err());
}

#[tokio::test]
async fn serve_twice_is_an_error() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    let mut state = harness.server.state();
    while state != ServerState::Serving {
        sleep(Duration::from_millis(10)).await;
        state = harness.server.state();
    }

    let second = harness.server.serve().await;
    assert!(matches!(second, Err(RunnerError::AlreadyServing)));

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let harness = Harness::start(RecordingMessenger::default()).await;
    harness.server.shutdown(Duration::from_secs(5)).await.unwrap();
    harness.server.shutdown(Duration::from_secs(5)).await.unwrap();
    harness.serving.await.unwrap().unwrap();
    assert_eq!(harness.server.state(), ServerState::Stopped);
}
