//! Tagserve WebSocket server implementation.
//!
//! This module provides the WebSocket front end of a running engine:
//! - Client connections
//! - Hello message on connect
//! - Monitored-item subscriptions and change delivery
//! - Write requests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use tagserve_core::{AddressSpace, NodeId, SpaceError};
use tagserve_protocol::{
    decode_client_message, encode_server_message, wire_timestamp, ChangeNotification,
    ClientMessage, HelloMessage, MonitorOutcome, RequestState, ServerMessage, SubscribeRequest,
    SubscribeResponse, UnsubscribeRequest, UnsubscribeResponse, WriteRequest, WriteResponse,
};

use crate::engine::{EngineError, EngineHandle};
use crate::monitor::{Change, ItemId, MonitorError};

/// Configuration for the tag server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name sent in the Hello message.
    pub name: String,
    /// Server version sent in the Hello message.
    pub version: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tagserve".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: "0.0.0.0:4840".parse().unwrap(),
        }
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("startup failed: {0}")]
    Startup(#[from] std::io::Error),
}

/// The WebSocket front end of a running engine.
pub struct TagServer {
    config: ServerConfig,
    engine: EngineHandle,
    space: Arc<RwLock<AddressSpace>>,
}

impl TagServer {
    pub fn new(
        config: ServerConfig,
        engine: EngineHandle,
        space: Arc<RwLock<AddressSpace>>,
    ) -> Self {
        Self {
            config,
            engine,
            space,
        }
    }

    /// Run the server, listening for WebSocket connections.
    ///
    /// A bind failure is a startup failure; everything after that is
    /// per-connection and never takes the server down.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("tag server listening on {}", self.config.bind_addr);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let config = self.config.clone();
                    let engine = self.engine.clone();
                    let space = self.space.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, config, engine, space).await
                        {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: ServerConfig,
    engine: EngineHandle,
    space: Arc<RwLock<AddressSpace>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("New connection from {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Send Hello message
    let hello = HelloMessage::new(&config.name, &config.version);
    let hello_msg = encode_server_message(&ServerMessage::Hello(hello))?;
    ws_tx.send(Message::Text(hello_msg)).await?;
    debug!("Sent Hello to {}", addr);

    // Changes for this connection's monitored items arrive here from the
    // engine's sampler, via the per-item channel sinks.
    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<Change>();

    // Items created over this connection; they die with it.
    let mut owned: Vec<ItemId> = Vec::new();

    loop {
        tokio::select! {
            // Handle incoming messages from the client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(
                            &text, addr, &engine, &space, &change_tx, &mut owned, &mut ws_tx,
                        ).await {
                            warn!("Error handling message from {}: {}", addr, e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    _ => {} // Ignore other message types
                }
            }

            // Forward sampled changes to the client
            change = change_rx.recv() => {
                // The local change_tx keeps the channel alive, so recv only
                // ever yields Some here.
                if let Some(change) = change {
                    let notification = ChangeNotification {
                        item: change.item.0,
                        node: change.node.to_string(),
                        value: change.value,
                        timestamp: wire_timestamp(change.timestamp),
                    };
                    let msg = encode_server_message(&ServerMessage::Notification(notification))?;
                    if let Err(e) = ws_tx.send(Message::Text(msg)).await {
                        error!("Failed to send notification to {}: {}", addr, e);
                        break;
                    }
                }
            }
        }
    }

    // Drop this connection's items so the sampler stops working for it.
    if !owned.is_empty() {
        debug!("Removing {} monitored item(s) for {}", owned.len(), addr);
        engine.delete_items(owned).await;
    }

    Ok(())
}

/// Handle a message received from a client.
#[allow(clippy::too_many_arguments)]
async fn handle_client_message(
    text: &str,
    addr: SocketAddr,
    engine: &EngineHandle,
    space: &Arc<RwLock<AddressSpace>>,
    change_tx: &mpsc::UnboundedSender<Change>,
    owned: &mut Vec<ItemId>,
    ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let msg = match decode_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            // Tolerated: log and keep the connection.
            warn!("Unparseable message from {}: {}", addr, e);
            return Ok(());
        }
    };

    let response = match msg {
        ClientMessage::Subscribe(req) => {
            ServerMessage::SubscribeResponse(handle_subscribe(req, engine, change_tx, owned).await)
        }
        ClientMessage::Unsubscribe(req) => {
            ServerMessage::UnsubscribeResponse(handle_unsubscribe(req, engine, owned).await)
        }
        ClientMessage::Write(req) => {
            ServerMessage::WriteResponse(handle_write(req, engine, space).await)
        }
    };

    ws_tx
        .send(Message::Text(encode_server_message(&response)?))
        .await?;
    Ok(())
}

/// Create one monitored item per spec entry; failures are per-entry.
async fn handle_subscribe(
    req: SubscribeRequest,
    engine: &EngineHandle,
    change_tx: &mpsc::UnboundedSender<Change>,
    owned: &mut Vec<ItemId>,
) -> SubscribeResponse {
    let mut results = Vec::with_capacity(req.subscribe.len());

    for spec in req.subscribe {
        let node = NodeId::from(spec.node.as_str());
        let interval = spec.sampling_interval.map(Duration::from_millis);
        let tx = change_tx.clone();
        let sink = Box::new(move |change: Change| {
            // Fire-and-forget: a gone client must not fail the tick.
            let _ = tx.send(change);
        });

        match engine.create_item(node, interval, sink).await {
            Ok(created) => {
                debug!(item = %created.id, node = %spec.node, "monitored item created");
                owned.push(created.id);
                results.push(MonitorOutcome {
                    node: spec.node,
                    status_code: 0,
                    item: Some(created.id.0),
                    revised_sampling_interval: Some(created.interval.as_millis() as u64),
                    message: None,
                });
            }
            Err(err) => {
                results.push(MonitorOutcome {
                    node: spec.node,
                    status_code: status_code_for(&err),
                    item: None,
                    revised_sampling_interval: None,
                    message: Some(err.to_string()),
                });
            }
        }
    }

    SubscribeResponse {
        request_id: req.request_id,
        results,
    }
}

/// Delete the listed items. Ids not created over this connection are
/// refused.
async fn handle_unsubscribe(
    req: UnsubscribeRequest,
    engine: &EngineHandle,
    owned: &mut Vec<ItemId>,
) -> UnsubscribeResponse {
    let mut removed = Vec::new();
    let mut failed = Vec::new();

    for raw in req.unsubscribe {
        let id = ItemId(raw);
        if !owned.contains(&id) {
            failed.push(raw);
            continue;
        }
        match engine.delete_item(id).await {
            Ok(()) => {
                owned.retain(|o| *o != id);
                removed.push(raw);
            }
            Err(_) => failed.push(raw),
        }
    }

    UnsubscribeResponse {
        request_id: req.request_id,
        removed,
        failed,
    }
}

/// Route a client write through the engine's write queue.
///
/// The access mask is transport policy: it is checked here, and only here.
/// Engine-path writes (bootstrap, internal value sources) bypass it.
async fn handle_write(
    req: WriteRequest,
    engine: &EngineHandle,
    space: &Arc<RwLock<AddressSpace>>,
) -> WriteResponse {
    let node = NodeId::from(req.write.node.as_str());

    let writable = {
        let space = space.read().await;
        space.node(&node).map(|n| n.attrs().access.write)
    };
    match writable {
        None => {
            return WriteResponse {
                request_id: req.request_id,
                state: RequestState::Failed,
                status_code: 404,
                message: Some(format!("unknown node: {}", node)),
            };
        }
        Some(false) => {
            return WriteResponse {
                request_id: req.request_id,
                state: RequestState::Failed,
                status_code: 403,
                message: Some(format!("node is not writable: {}", node)),
            };
        }
        Some(true) => {}
    }

    match engine.write(node, req.write.value).await {
        Ok(()) => WriteResponse {
            request_id: req.request_id,
            state: RequestState::Completed,
            status_code: 0,
            message: None,
        },
        Err(err) => WriteResponse {
            request_id: req.request_id,
            state: RequestState::Failed,
            status_code: status_code_for(&err),
            message: Some(err.to_string()),
        },
    }
}

/// HTTP-flavored status code for an engine error, as carried in responses.
fn status_code_for(err: &EngineError) -> u16 {
    match err {
        EngineError::Stopped => 503,
        EngineError::Monitor(MonitorError::UnknownNode(_)) => 404,
        EngineError::Monitor(MonitorError::NotFound(_)) => 404,
        EngineError::Space(SpaceError::UnknownNode(_)) => 404,
        EngineError::Space(SpaceError::TypeMismatch { .. }) => 400,
        EngineError::Space(SpaceError::DuplicateNode(_)) => 409,
    }
}
