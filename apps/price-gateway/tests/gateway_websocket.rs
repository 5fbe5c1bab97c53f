//! WebSocket Gateway Integration Tests
//!
//! Drives the real axum server with a WebSocket client against the scripted
//! broker and credential provider.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use price_gateway::infrastructure::gateway::serve;
use price_gateway::infrastructure::persistence::InMemoryStockRepository;
use price_gateway::{
    BatchConfig, Credentials, GatewayState, MockBrokerConnector, MockCredentialProvider,
    SessionConfig, SessionContext,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VIC_PAYLOAD: &str =
    r#"{"symbol":"VIC","close":100,"high":105,"low":98,"open":99,"volume":5000}"#;
const BAD_CREDENTIALS: &str = "Connection refused: Bad User Name or Password";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestGateway {
    addr: std::net::SocketAddr,
    state: Arc<GatewayState>,
    stocks: Arc<InMemoryStockRepository>,
    shutdown: CancellationToken,
}

/// Start a gateway on a random port.
async fn start_gateway(
    broker: MockBrokerConnector,
    refresher: MockCredentialProvider,
) -> TestGateway {
    let stocks = Arc::new(InMemoryStockRepository::upserting());
    let ctx = SessionContext::new(
        Arc::new(broker),
        Arc::new(refresher),
        stocks.clone(),
        SessionConfig {
            ack_timeout: Duration::from_secs(2),
            data_timeout: Duration::from_millis(300),
        },
    );
    let shutdown = CancellationToken::new();
    let state = Arc::new(GatewayState::new(
        ctx,
        BatchConfig {
            chunk_size: 10,
            pacing: Duration::from_millis(20),
        },
        "test-0.0.1",
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        serve(listener, server_state).await.unwrap();
    });

    TestGateway {
        addr,
        state,
        stocks,
        shutdown,
    }
}

/// Connect a client and consume the greeting.
async fn connect(gateway: &TestGateway) -> Client {
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", gateway.addr))
        .await
        .unwrap();
    let greeting = recv(&mut client).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["message"], "Connected to WSS server");
    assert_eq!(greeting["version"], "test-0.0.1");
    client
}

async fn send(client: &mut Client, value: &Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Receive messages until one of type `kind` arrives; returns all of them.
async fn recv_until(client: &mut Client, kind: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let message = recv(client).await;
        let done = message["type"] == kind;
        seen.push(message);
        if done {
            return seen;
        }
    }
}

fn kinds(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn subscribe(code: &str, token: &str) -> Value {
    json!({
        "type": "subscribe",
        "code": code,
        "investorToken": token,
        "investorId": "i1",
        "userId": "u1",
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn ping_returns_pong_with_timestamp() {
    let gateway = start_gateway(MockBrokerConnector::new(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    send(&mut client, &json!({"type": "ping"})).await;
    let pong = recv(&mut client).await;

    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn health_reports_connections() {
    let gateway = start_gateway(MockBrokerConnector::new(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;
    let _other = connect(&gateway).await;

    send(&mut client, &json!({"type": "health"})).await;
    let health = recv(&mut client).await;

    assert_eq!(health["type"], "health");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 2);
    assert!(health["uptime"].as_f64().unwrap() >= 0.0);
    assert!(health["memory"].is_object());
}

#[tokio::test]
async fn invalid_requests_get_error_messages() {
    let gateway = start_gateway(MockBrokerConnector::new(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    send(&mut client, &json!({"type": "unsubscribe"})).await;
    let unknown = recv(&mut client).await;
    assert_eq!(unknown["type"], "error");
    assert_eq!(unknown["error"], "Unknown message type");

    send(&mut client, &json!({"type": "subscribe", "code": "VIC"})).await;
    let missing = recv(&mut client).await;
    assert_eq!(missing["error"], "Missing required parameters");

    send(
        &mut client,
        &json!({"type": "subscribe_batch", "codes": "VIC", "investorToken": "t", "investorId": "i"}),
    )
    .await;
    let batch = recv(&mut client).await;
    assert_eq!(
        batch["error"],
        "Missing required parameters or invalid codes array"
    );

    client.send(Message::text("{not json")).await.unwrap();
    let parse = recv(&mut client).await;
    assert_eq!(parse["type"], "error");
    assert!(!parse["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn subscribe_delivers_scaled_price() {
    let gateway = start_gateway(
        MockBrokerConnector::new().with_price("VIC", VIC_PAYLOAD),
        MockCredentialProvider::new(),
    )
    .await;
    let mut client = connect(&gateway).await;

    send(&mut client, &subscribe("VIC", "t1")).await;
    let messages = recv_until(&mut client, "price_update").await;

    assert_eq!(kinds(&messages), vec!["connected", "subscribed", "price_update"]);
    assert_eq!(messages[0]["code"], "VIC");
    assert_eq!(messages[0]["message"], "Connected to MQTT");
    assert_eq!(
        messages[1]["topic"],
        "plaintext/quotes/krx/mdds/v2/ohlc/stock/1D/VIC"
    );

    let data = &messages[2]["data"];
    assert_eq!(messages[2]["code"], "VIC");
    assert_eq!(data["symbol"], "VIC");
    assert_eq!(data["close"], 100.0);
    assert_eq!(data["marketPrice"], 100_000.0);
    assert_eq!(data["highPrice"], 105_000.0);
    assert_eq!(data["lowPrice"], 98_000.0);
    assert_eq!(data["openPrice"], 99_000.0);
    assert_eq!(data["volumn"], 5000.0);

    wait_for(|| gateway.stocks.get("VIC").is_some()).await;
    wait_for(|| gateway.state.registry().session_count() == 0).await;
}

#[tokio::test]
async fn no_data_sends_timeout() {
    let gateway = start_gateway(MockBrokerConnector::new(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    send(&mut client, &subscribe("FPT", "t1")).await;
    let messages = recv_until(&mut client, "timeout").await;

    assert_eq!(kinds(&messages), vec!["connected", "subscribed", "timeout"]);
    assert_eq!(messages[2]["code"], "FPT");
    assert_eq!(messages[2]["message"], "No data received for stock");
}

#[tokio::test]
async fn auth_failure_refreshes_and_retries() {
    let refresher = MockCredentialProvider::succeeding(Credentials::new("t2", "i2"));
    let gateway = start_gateway(
        MockBrokerConnector::new()
            .reject_token("t1", BAD_CREDENTIALS)
            .with_price("VIC", VIC_PAYLOAD),
        refresher,
    )
    .await;
    let mut client = connect(&gateway).await;

    send(&mut client, &subscribe("VIC", "t1")).await;
    let messages = recv_until(&mut client, "price_update").await;

    assert_eq!(
        kinds(&messages),
        vec!["token_refreshed", "connected", "subscribed", "price_update"]
    );
    assert_eq!(messages[0]["newCredentials"]["investorToken"], "t2");
    assert_eq!(messages[0]["newCredentials"]["investorId"], "i2");
}

#[tokio::test]
async fn repeated_auth_failure_reports_auth_error() {
    let gateway = start_gateway(
        MockBrokerConnector::new()
            .reject_token("t1", BAD_CREDENTIALS)
            .reject_token("t2", BAD_CREDENTIALS),
        MockCredentialProvider::succeeding(Credentials::new("t2", "i2")),
    )
    .await;
    let mut client = connect(&gateway).await;

    send(&mut client, &subscribe("VIC", "t1")).await;
    let messages = recv_until(&mut client, "auth_error").await;

    assert_eq!(kinds(&messages), vec!["token_refreshed", "auth_error"]);
    assert_eq!(
        messages[1]["error"],
        "Authentication failed after token refresh attempt."
    );
}

#[tokio::test]
async fn batch_reports_progress_and_completion() {
    let codes: Vec<String> = (0..12).map(|i| format!("S{i:02}")).collect();
    let mut broker = MockBrokerConnector::new();
    for code in codes.iter().take(11) {
        broker = broker.with_price(
            code,
            format!(r#"{{"symbol":"{code}","close":10,"high":11,"low":9,"open":10,"volume":1}}"#),
        );
    }
    let gateway = start_gateway(broker, MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    send(
        &mut client,
        &json!({
            "type": "subscribe_batch",
            "codes": codes,
            "investorToken": "t1",
            "investorId": "i1",
        }),
    )
    .await;
    let messages = recv_until(&mut client, "batch_complete").await;

    let batch: Vec<&Value> = messages
        .iter()
        .filter(|m| m["type"].as_str().unwrap().starts_with("batch_"))
        .collect();
    assert_eq!(batch.len(), 4);
    assert_eq!(batch[0]["type"], "batch_start");
    assert_eq!(batch[0]["total"], 12);
    assert_eq!(batch[1]["processed"], 10);
    assert_eq!(batch[2]["processed"], 12);
    assert_eq!(batch[3]["total"], 12);
    assert_eq!(batch[3]["success"], 11);
    assert_eq!(batch[3]["failed"], 1);

    let prices = messages
        .iter()
        .filter(|m| m["type"] == "price_update")
        .count();
    assert_eq!(prices, 11);
}

#[tokio::test]
async fn client_disconnect_cancels_sessions() {
    let broker = MockBrokerConnector::new().without_suback("VIC");
    let gateway = start_gateway(broker.clone(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    send(&mut client, &subscribe("VIC", "t1")).await;
    let connected = recv(&mut client).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["code"], "VIC");

    client.close(None).await.unwrap();

    wait_for(|| broker.open_connections() == 0).await;
    wait_for(|| gateway.state.registry().connection_count() == 0).await;
    assert_eq!(broker.close_count(), 1);
    assert_eq!(gateway.state.registry().session_count(), 0);
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let gateway = start_gateway(MockBrokerConnector::new(), MockCredentialProvider::new()).await;
    let mut client = connect(&gateway).await;

    gateway.shutdown.cancel();

    let closed = timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_for(|| gateway.state.registry().connection_count() == 0).await;
}
