use std::sync::Arc;
use std::time::Duration;

use trace_lite::config::Config;
use trace_lite::query::{build_router, QueryState};
use trace_lite::store::HttpStorageGateway;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Using default configuration");
        default_config()
    });

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.rust_log.clone()));
    if config.trace_lite_log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("starting trace-lite-api v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = trace_lite::metrics::init_metrics() {
        tracing::warn!(error = %e, "failed to initialize metrics registry");
    }

    let store = Arc::new(HttpStorageGateway::new(
        config.clickhouse_dsn.clone(),
        config.clickhouse_db.clone(),
        Duration::from_secs(config.store_timeout_secs),
    )?);

    let state = Arc::new(QueryState::new(store));
    let app = build_router(state)
        .route_layer(axum::middleware::from_fn(trace_lite::http_metrics::track_http_metrics))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: std::net::SocketAddr = normalize_addr(&config.api_addr).parse()?;
    tracing::info!(%addr, "read API listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("read API shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl_c handler");
    }
    tracing::info!("shutdown signal received");
}

fn normalize_addr(addr: &str) -> String {
    if let Some(stripped) = addr.strip_prefix(':') {
        format!("0.0.0.0:{stripped}")
    } else {
        addr.to_string()
    }
}

fn default_config() -> Config {
    toml::from_str("").expect("empty document deserializes via field defaults")
}
