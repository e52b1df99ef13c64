//! Parimex Market Data Adapter
//!
//! Connects to the Parimex betting exchange, normalizes its streaming market
//! data, and publishes engine messages to other system components over IPC.

use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parimex_market_data::adapter::ParimexDataClient;
use parimex_market_data::config::Config;
use parimex_market_data::directory::InstrumentDirectory;
use parimex_market_data::publisher::Publisher;
use parimex_market_data::rest::VenueHttpClient;
use parimex_market_data::sink::ChannelSink;
use parimex_market_data::types::{BookType, InstrumentId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Parimex Market Data Adapter");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        event_types = ?config.event_type_ids,
        instruments = ?config.instruments,
        "Configuration loaded"
    );

    // Venue REST client doubles as the instrument catalogue source
    let http = Arc::new(VenueHttpClient::new(&config.rest_endpoint, &config.api_key));
    let directory = Arc::new(InstrumentDirectory::new(http.clone()));

    // Initialize publisher for IPC
    let publisher = Arc::new(Publisher::new(&config.ipc_socket_path).await?);

    // Engine channel: the adapter writes, the forwarder publishes
    let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(engine_tx));

    let client = Arc::new(ParimexDataClient::new(config.clone(), http, directory, sink));

    let forwarder_publisher = publisher.clone();
    tokio::spawn(async move {
        while let Some(message) = engine_rx.recv().await {
            if let Err(e) = forwarder_publisher.publish(&message).await {
                warn!(error = %e, "Failed to publish engine message");
            }
        }
    });

    // Start health check server
    let health_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_client).await {
            warn!(error = %e, "Health server error");
        }
    });

    client.connect().await?;

    // Startup subscriptions from configuration
    for raw in &config.instruments {
        let instrument_id = InstrumentId::new(raw.clone());
        if let Err(e) = client.subscribe_order_book(&instrument_id, BookType::L2, None) {
            warn!(instrument_id = %instrument_id, error = %e, "Startup subscription failed");
        }
    }

    if let Err(e) = client.run().await {
        error!(error = %e, "Stream dispatch ended");
        client.disconnect().await?;
        return Err(e.into());
    }

    client.disconnect().await?;
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(client: Arc<ParimexDataClient>) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(client);

    let addr = SocketAddr::from(([0, 0, 0, 0], 9090));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(client): State<Arc<ParimexDataClient>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-data",
        "connected": client.is_connected(),
        "degraded": client.is_degraded(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
