use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer};
use futures_util::{SinkExt, StreamExt};
use realtime_service::{configure_app, Config, ConnectionRegistry, EventBroadcaster};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_app() -> String {
    let registry = ConnectionRegistry::new();
    let broadcaster = Arc::new(EventBroadcaster::new());
    broadcaster.attach_registry(registry.clone());
    let config = Config::default();

    let server = HttpServer::new(move || {
        let registry = registry.clone();
        let broadcaster = broadcaster.clone();
        let config = config.clone();
        App::new().configure(move |cfg| configure_app(cfg, registry, broadcaster, config))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    tokio::spawn(server.run());

    format!("127.0.0.1:{}", addr.port())
}

async fn connect_and_authenticate(addr: &str, user_id: i64) -> WsClient {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket upgrade");

    let auth = json!({"type": "authenticate", "user_id": user_id}).to_string();
    ws.send(WsMessage::text(auth)).await.unwrap();

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "connected");
    assert_eq!(ack["user_id"], user_id);
    ws
}

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            // Protocol heartbeat is invisible to the event layer.
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[actix_web::test]
async fn authenticate_then_targeted_delivery() {
    let addr = start_app().await;
    let mut ws = connect_and_authenticate(&addr, 42).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{addr}/api/v1/realtime/notify/42"))
        .json(&json!({
            "id": 9,
            "title": "New applicant",
            "message": "Someone applied to your posting",
            "category": "applications"
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "delivered");

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "new_notification");
    assert_eq!(event["notification"]["id"], 9);
}

#[actix_web::test]
async fn offline_user_send_answers_200_not_connected() {
    let addr = start_app().await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{addr}/api/v1/realtime/badge-counts/404"))
        .json(&json!({"feedback": 5, "contact_messages": 2, "total": 7}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "not_connected");
}

#[actix_web::test]
async fn status_endpoint_tracks_connection_lifecycle() {
    let addr = start_app().await;
    let http = reqwest::Client::new();

    let body: Value = http
        .get(format!("http://{addr}/api/v1/realtime/status/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connected"], false);

    let mut ws = connect_and_authenticate(&addr, 7).await;

    let body: Value = http
        .get(format!("http://{addr}/api/v1/realtime/status/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connected"], true);

    let stats: Value = http
        .get(format!("http://{addr}/api/v1/realtime/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connected_users"], 1);

    ws.close(None).await.unwrap();
    // The session unregisters on actor stop; give it a beat.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let body: Value = http
        .get(format!("http://{addr}/api/v1/realtime/status/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connected"], false);
}

#[actix_web::test]
async fn malformed_client_frame_keeps_connection_open() {
    let addr = start_app().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws.send(WsMessage::text("this is not json")).await.unwrap();
    ws.send(WsMessage::text(r#"{"type":"unknown_frame"}"#))
        .await
        .unwrap();

    // The connection survived both discards and still authenticates.
    let auth = json!({"type": "authenticate", "user_id": 5}).to_string();
    ws.send(WsMessage::text(auth)).await.unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "connected");
}

#[actix_web::test]
async fn close_right_after_authenticate_never_leaks_a_registration() {
    let addr = start_app().await;
    let http = reqwest::Client::new();

    // Authenticate and drop the transport in the same breath. The bind must
    // either complete and be unregistered on session stop, or never reach
    // the registry at all; the loop makes the interleavings likely.
    for user_id in 0..200 {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let auth = json!({"type": "authenticate", "user_id": user_id}).to_string();
        ws.send(WsMessage::text(auth)).await.unwrap();
        drop(ws);
    }

    let mut remaining = -1;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats: Value = http
            .get(format!("http://{addr}/api/v1/realtime/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        remaining = stats["connected_users"].as_i64().unwrap();
        if remaining == 0 {
            break;
        }
    }
    assert_eq!(remaining, 0, "sessions left ghost registry entries");
}

#[actix_web::test]
async fn last_connect_wins_across_transports() {
    let addr = start_app().await;

    let _first = connect_and_authenticate(&addr, 11).await;
    let mut second = connect_and_authenticate(&addr, 11).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{addr}/api/v1/realtime/messages/11"))
        .json(&json!({
            "message": {"body": "hello"},
            "sender": {"id": 3, "name": "Sam"},
            "conversation_id": 77
        }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "delivered");

    let event = next_json(&mut second).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["conversation_id"], 77);
}
