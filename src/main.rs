//! ORPflow Trader
//!
//! Connects to Binance, subscribes to the configured markets' trade streams and
//! dispatches every update through the engine until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flow_trader::{BinanceClient, Config, Engine, EngineMetrics, Market, MarketDescriptor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting ORPflow Trader");

    let config = Config::load()?;
    info!(markets = %config.markets, rest = %config.rest_endpoint, "Configuration loaded");

    let metrics = EngineMetrics::new()?;
    metrics.register(prometheus::default_registry())?;

    let cancel = CancellationToken::new();
    let client = Arc::new(BinanceClient::new(&config)?);
    let clock_sync = client.spawn_clock_sync(cancel.child_token());

    let engine = Arc::new(Engine::new(client.clone(), config.engine_settings(), metrics));
    engine.discover_markets().await;

    let mut selected: Vec<Arc<Market>> = Vec::new();
    for (asset, quote) in config.market_pairs() {
        match engine.market(&asset, &quote) {
            Some(market) => selected.push(market),
            None => warn!(asset = %asset, quote = %quote, "Configured market not listed by the exchange"),
        }
    }
    if selected.is_empty() {
        anyhow::bail!("none of the configured markets ({}) is tradable", config.markets);
    }

    for market in &selected {
        market.register_price_listener(Arc::new(|market: &MarketDescriptor, price: Decimal| {
            info!(market = %market, price = %price, "Price update");
        }));
    }
    let streams = engine.subscribe(&selected).await?;
    info!(markets = selected.len(), streams, "Subscribed");

    // Start health check server
    let addr: SocketAddr = config.metrics_addr.parse()?;
    let health_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(addr, health_engine).await {
            warn!(error = %e, "Health server error");
        }
    });

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for interrupt");
        }
        info!("Interrupt received, shutting down");
        interrupt.cancel();
    });

    engine.run(cancel.clone()).await;
    cancel.cancel();
    clock_sync.await?;

    info!("Stopped");
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(addr: SocketAddr, engine: Arc<Engine>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(engine);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "trader",
        "markets": engine.markets().len(),
        "queue_depth": engine.queue_depth(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
