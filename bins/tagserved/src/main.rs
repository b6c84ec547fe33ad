use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagserve_core::{AddressSpace, NodeId, SpaceError, Value, VariableAttributes};
use tagserve_server::{Engine, EngineConfig, EngineHandle, ServerConfig, TagServer};

type SharedSpace = Arc<tokio::sync::RwLock<AddressSpace>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tagserve_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tagserve starting...");

    // Configuration
    let ws_addr: SocketAddr = "0.0.0.0:4840".parse()?;
    let http_addr: SocketAddr = "0.0.0.0:4841".parse()?;

    let engine_config = EngineConfig {
        min_sampling_interval: Duration::from_millis(env_ms("TAGSERVE_MIN_SAMPLING_MS", 100)),
        tick_quantum: Duration::from_millis(env_ms("TAGSERVE_TICK_QUANTUM_MS", 10)),
    };

    // Address-space bootstrap; a failure here is fatal and the process
    // exits with a failure status.
    let space = bootstrap_space().context("address-space bootstrap failed")?;

    let (engine, handle) = Engine::new(engine_config, space);
    let space = engine.space();

    let server_config = ServerConfig {
        name: "tagserve".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bind_addr: ws_addr,
    };

    // The run loop: sampling, change detection, pending writes.
    let engine_task = tokio::spawn(engine.run());

    // WebSocket server
    let server = TagServer::new(server_config, handle.clone(), space.clone());
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    // HTTP read API
    let http_handle = tokio::spawn(async move {
        if let Err(e) = start_http_server(http_addr, space).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    // Synthetic value source, standing in for any external writer.
    let demo_handle = tokio::spawn(generate_demo_data(handle.clone()));

    tracing::info!("tagserve ready");
    tracing::info!("   WebSocket: ws://localhost:4840");
    tracing::info!("   HTTP API:  http://localhost:4841/nodes");
    tracing::info!("");
    tracing::info!("Try these commands:");
    tracing::info!("   curl http://localhost:4841/nodes");
    tracing::info!("   curl http://localhost:4841/nodes/index");
    tracing::info!("   websocat ws://localhost:4840");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
        _ = ws_handle => {
            anyhow::bail!("WebSocket server stopped unexpectedly");
        }
        _ = http_handle => {
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
        _ = demo_handle => {
            tracing::warn!("Demo data generator stopped");
        }
    }

    // Cooperative shutdown: the engine sees the flag within one quantum.
    handle.cancel();
    let _ = engine_task.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Numeric setting from the environment, falling back to a default.
fn env_ms(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Initial node set: the demo variable plus companions covering the other
/// scalar types.
fn bootstrap_space() -> Result<AddressSpace, SpaceError> {
    let mut space = AddressSpace::new();
    space.add_variable(
        "index",
        Value::Double(0.0),
        VariableAttributes::new("Index").with_description("Random index"),
    )?;
    space.add_variable(
        "cycleCount",
        Value::Int(0),
        VariableAttributes::new("Cycle count")
            .with_description("Iterations of the synthetic source"),
    )?;
    space.add_variable(
        "running",
        Value::Bool(true),
        VariableAttributes::new("Running"),
    )?;
    space.add_variable(
        "unitName",
        Value::from("demo-unit"),
        VariableAttributes::new("Unit name").read_only(),
    )?;
    Ok(space)
}

/// Start the HTTP read API
async fn start_http_server(addr: SocketAddr, space: SharedSpace) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/nodes", get(nodes_handler))
        .route("/nodes/:id", get(node_handler))
        .with_state(space);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Node list handler - metadata and current value of every node
async fn nodes_handler(State(space): State<SharedSpace>) -> Json<serde_json::Value> {
    let space = space.read().await;
    let nodes: Vec<serde_json::Value> = space
        .nodes()
        .map(|node| {
            serde_json::json!({
                "id": node.id().as_str(),
                "displayName": node.attrs().display_name,
                "description": node.attrs().description,
                "dataType": node.data_type().to_string(),
                "access": node.attrs().access,
                "value": node.value(),
            })
        })
        .collect();
    Json(serde_json::json!({ "nodes": nodes }))
}

/// Single-node handler
async fn node_handler(
    Path(id): Path<String>,
    State(space): State<SharedSpace>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let space = space.read().await;
    match space.node(&NodeId::from(id.as_str())) {
        Some(node) => Ok(Json(serde_json::json!({
            "id": node.id().as_str(),
            "dataType": node.data_type().to_string(),
            "value": node.value(),
        }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Generate demo data - a pseudo-random index value once per second,
/// through the same write queue any external source would use.
async fn generate_demo_data(engine: EngineHandle) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));

    // Small LCG, same value spread as the classic rand()-based generator.
    let mut state: u64 = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15);
    let mut cycle: i64 = 0;

    loop {
        interval.tick().await;

        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let index = ((state >> 33) % 4096) as f64;
        cycle += 1;

        if let Err(e) = engine
            .write(NodeId::from("index"), Value::Double(index))
            .await
        {
            tracing::error!("Failed to write demo value - engine may have stopped: {}", e);
            break;
        }
        let _ = engine
            .write(NodeId::from("cycleCount"), Value::Int(cycle))
            .await;
    }
}
