//! Integration tests for the tagserve WebSocket server.
//!
//! These tests start an actual engine and server and connect with a
//! WebSocket client to verify end-to-end functionality.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use tagserve_core::{AddressSpace, NodeId, Value, VariableAttributes};
use tagserve_server::{Engine, EngineConfig, EngineHandle, ItemId, ServerConfig, TagServer};

/// Find an available port for testing.
async fn find_available_port() -> SocketAddr {
    // Bind to port 0 to get an available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// The node set every test server starts with.
fn bootstrap_space() -> AddressSpace {
    let mut space = AddressSpace::new();
    space
        .add_variable(
            "index",
            Value::Double(0.0),
            VariableAttributes::new("Index").with_description("Random index"),
        )
        .unwrap();
    space
        .add_variable(
            "cycleCount",
            Value::Int(0),
            VariableAttributes::new("Cycle count"),
        )
        .unwrap();
    space
        .add_variable(
            "unitName",
            Value::from("press-7"),
            VariableAttributes::new("Unit name").read_only(),
        )
        .unwrap();
    space
}

/// Start a test engine + server; returns the address, the engine handle and
/// the server task.
async fn start_test_server() -> (SocketAddr, EngineHandle, tokio::task::JoinHandle<()>) {
    let addr = find_available_port().await;

    let engine_config = EngineConfig {
        min_sampling_interval: Duration::from_millis(20),
        tick_quantum: Duration::from_millis(2),
    };
    let (engine, handle) = Engine::new(engine_config, bootstrap_space());
    let space = engine.space();
    tokio::spawn(engine.run());

    let config = ServerConfig {
        name: "test-tagserve".to_string(),
        version: "0.1.0".to_string(),
        bind_addr: addr,
    };
    let server = TagServer::new(config, handle.clone(), space);
    let server_handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle, server_handle)
}

/// Connect a WebSocket client to the given address.
async fn connect_client(addr: SocketAddr) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let url = format!("ws://{}", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    ws_stream
}

/// Wait for a text message with timeout.
async fn recv_text(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<String, &'static str> {
    match timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Ok(text),
        Ok(Some(Ok(_))) => Err("Unexpected message type"),
        Ok(Some(Err(_))) => Err("WebSocket error"),
        Ok(None) => Err("Connection closed"),
        Err(_) => Err("Timeout"),
    }
}

/// Receive and parse the next text message.
async fn recv_json(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> serde_json::Value {
    let text = recv_text(ws).await.expect("Should receive a message");
    serde_json::from_str(&text).expect("Valid JSON")
}

/// Subscribe to one node and return (item id, subscribe response).
async fn subscribe_one(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    node: &str,
    interval_ms: u64,
) -> (u32, serde_json::Value) {
    let subscribe = serde_json::json!({
        "requestId": "sub-1",
        "subscribe": [{"node": node, "samplingInterval": interval_ms}]
    });
    ws.send(Message::Text(subscribe.to_string()))
        .await
        .expect("Should send subscribe");

    let response = recv_json(ws).await;
    let item = response["results"][0]["item"]
        .as_u64()
        .expect("item id in subscribe response") as u32;
    (item, response)
}

#[tokio::test]
async fn test_hello_message_on_connect() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;

    // First message should be Hello
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["name"], "test-tagserve");
    assert_eq!(hello["version"], "0.1.0");
    assert!(hello["timestamp"].is_string());

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_subscribe_and_receive_notification() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let (item, response) = subscribe_one(&mut ws, "index", 50).await;
    assert_eq!(response["requestId"], "sub-1");
    assert_eq!(response["results"][0]["statusCode"], 0);
    assert_eq!(response["results"][0]["revisedSamplingInterval"], 50);

    // Write through the engine; the next due sample should notify.
    handle
        .write(NodeId::from("index"), Value::Double(42.0))
        .await
        .expect("write accepted");

    let notification = recv_json(&mut ws).await;
    assert_eq!(notification["node"], "index");
    assert_eq!(notification["item"], item);
    assert_eq!(notification["value"]["type"], "double");
    assert_eq!(notification["value"]["value"], 42.0);
    assert!(notification["timestamp"].is_string());

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_requested_interval_is_clamped() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    // The test server's floor is 20ms; ask for 1ms.
    let (_, response) = subscribe_one(&mut ws, "index", 1).await;
    assert_eq!(response["results"][0]["statusCode"], 0);
    assert_eq!(response["results"][0]["revisedSamplingInterval"], 20);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_subscribe_unknown_node_rejected() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let subscribe = serde_json::json!({
        "requestId": "sub-bad",
        "subscribe": [{"node": "noSuchNode"}]
    });
    ws.send(Message::Text(subscribe.to_string()))
        .await
        .expect("Should send subscribe");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["requestId"], "sub-bad");
    assert_eq!(response["results"][0]["statusCode"], 404);
    assert!(response["results"][0].get("item").is_none());

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_write_over_websocket() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let (_, _) = subscribe_one(&mut ws, "index", 20).await;

    let write = serde_json::json!({
        "requestId": "w-1",
        "write": {"node": "index", "value": {"type": "double", "value": 7.5}}
    });
    ws.send(Message::Text(write.to_string()))
        .await
        .expect("Should send write");

    // Expect both the write response and the resulting notification.
    let mut saw_response = false;
    let mut saw_notification = false;
    for _ in 0..2 {
        let msg = recv_json(&mut ws).await;
        if msg.get("state").is_some() {
            assert_eq!(msg["requestId"], "w-1");
            assert_eq!(msg["state"], "COMPLETED");
            assert_eq!(msg["statusCode"], 0);
            saw_response = true;
        } else {
            assert_eq!(msg["node"], "index");
            assert_eq!(msg["value"]["value"], 7.5);
            saw_notification = true;
        }
    }
    assert!(saw_response && saw_notification);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_write_wrong_type_rejected() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let (_, _) = subscribe_one(&mut ws, "index", 20).await;

    // "index" is a double node; write an int.
    let write = serde_json::json!({
        "requestId": "w-2",
        "write": {"node": "index", "value": {"type": "int", "value": 42}}
    });
    ws.send(Message::Text(write.to_string()))
        .await
        .expect("Should send write");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["requestId"], "w-2");
    assert_eq!(response["state"], "FAILED");
    assert_eq!(response["statusCode"], 400);

    // The rejected write must not produce a notification.
    match timeout(Duration::from_millis(300), ws.next()).await {
        Err(_) => {} // Timeout is expected
        Ok(Some(Ok(Message::Text(_)))) => panic!("Rejected write should not notify"),
        _ => {}
    }

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_write_read_only_node_rejected() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let write = serde_json::json!({
        "requestId": "w-3",
        "write": {"node": "unitName", "value": {"type": "text", "value": "press-8"}}
    });
    ws.send(Message::Text(write.to_string()))
        .await
        .expect("Should send write");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["state"], "FAILED");
    assert_eq!(response["statusCode"], 403);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_write_unknown_node_rejected() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let write = serde_json::json!({
        "requestId": "w-4",
        "write": {"node": "noSuchNode", "value": {"type": "double", "value": 1.0}}
    });
    ws.send(Message::Text(write.to_string()))
        .await
        .expect("Should send write");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["state"], "FAILED");
    assert_eq!(response["statusCode"], 404);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_unsubscribe_stops_notifications() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let (item, _) = subscribe_one(&mut ws, "index", 20).await;

    handle
        .write(NodeId::from("index"), Value::Double(1.0))
        .await
        .expect("write accepted");
    let notification = recv_json(&mut ws).await;
    assert_eq!(notification["value"]["value"], 1.0);

    let unsubscribe = serde_json::json!({
        "requestId": "unsub-1",
        "unsubscribe": [item]
    });
    ws.send(Message::Text(unsubscribe.to_string()))
        .await
        .expect("Should send unsubscribe");

    let response = recv_json(&mut ws).await;
    assert_eq!(response["requestId"], "unsub-1");
    assert_eq!(response["removed"][0], item);
    assert!(response["failed"].as_array().unwrap().is_empty());

    // Further changes are nobody's business anymore.
    handle
        .write(NodeId::from("index"), Value::Double(2.0))
        .await
        .expect("write accepted");

    match timeout(Duration::from_millis(300), ws.next()).await {
        Err(_) => {} // Timeout is expected - no notification
        Ok(Some(Ok(Message::Text(_)))) => panic!("Should not notify after unsubscribe"),
        _ => {}
    }

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_unsubscribe_foreign_item_refused() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let unsubscribe = serde_json::json!({
        "requestId": "unsub-2",
        "unsubscribe": [9999]
    });
    ws.send(Message::Text(unsubscribe.to_string()))
        .await
        .expect("Should send unsubscribe");

    let response = recv_json(&mut ws).await;
    assert!(response["removed"].as_array().unwrap().is_empty());
    assert_eq!(response["failed"][0], 9999);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_error_handling_malformed_json() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    // Send malformed JSON
    ws.send(Message::Text("{ invalid json".to_string()))
        .await
        .expect("Should send message");

    // Connection should remain open (server ignores bad messages)
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A valid subscribe afterwards still works.
    let (_, response) = subscribe_one(&mut ws, "index", 20).await;
    assert_eq!(response["results"][0]["statusCode"], 0);

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_clients_have_independent_subscriptions() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws1 = connect_client(addr).await;
    let _ = recv_text(&mut ws1).await.expect("Hello");
    let mut ws2 = connect_client(addr).await;
    let _ = recv_text(&mut ws2).await.expect("Hello");

    let (_, _) = subscribe_one(&mut ws1, "index", 20).await;
    let (_, _) = subscribe_one(&mut ws2, "cycleCount", 20).await;

    handle
        .write(NodeId::from("index"), Value::Double(3.0))
        .await
        .expect("write accepted");

    // Client 1 sees the change.
    let notification = recv_json(&mut ws1).await;
    assert_eq!(notification["node"], "index");

    // Client 2 watches a different node and stays quiet.
    match timeout(Duration::from_millis(300), ws2.next()).await {
        Err(_) => {} // Timeout is expected
        Ok(Some(Ok(Message::Text(_)))) => panic!("Client 2 should not be notified"),
        _ => {}
    }

    ws1.close(None).await.ok();
    ws2.close(None).await.ok();
    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_disconnect_deletes_items() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    let (item, _) = subscribe_one(&mut ws, "index", 20).await;
    ws.close(None).await.ok();
    drop(ws);

    // Give the connection task time to run its cleanup.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The item is already gone, so deleting it again must fail.
    let err = handle.delete_item(ItemId(item)).await;
    assert!(err.is_err(), "item should have been removed on disconnect");

    handle.cancel();
    server.abort();
}

#[tokio::test]
async fn test_ping_pong() {
    let (addr, handle, server) = start_test_server().await;

    let mut ws = connect_client(addr).await;
    let _ = recv_text(&mut ws).await.expect("Hello");

    ws.send(Message::Ping(vec![1, 2, 3, 4]))
        .await
        .expect("Should send ping");

    match timeout(Duration::from_secs(1), ws.next()).await {
        Ok(Some(Ok(Message::Pong(data)))) => {
            assert_eq!(data, vec![1, 2, 3, 4]);
        }
        _ => panic!("Should receive Pong"),
    }

    ws.close(None).await.ok();
    handle.cancel();
    server.abort();
}
