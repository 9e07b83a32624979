use std::sync::Arc;
use std::time::Duration;

use trace_lite::config::Config;
use trace_lite::ingest::{build_router, IngestState};
use trace_lite::reconstruct::Reconstructor;
use trace_lite::store::HttpStorageGateway;
use trace_lite::tls;
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

    tracing::info!("starting trace-lite-collector v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = trace_lite::metrics::init_metrics() {
        tracing::warn!(error = %e, "failed to initialize metrics registry");
    }

    let store = Arc::new(HttpStorageGateway::new(
        config.clickhouse_dsn.clone(),
        config.clickhouse_db.clone(),
        Duration::from_secs(config.store_timeout_secs),
    )?);

    let reconstructor = Arc::new(Reconstructor::new(store.clone(), config.trace_window_duration()));
    let reconstructor_task = {
        let reconstructor = reconstructor.clone();
        tokio::spawn(async move { reconstructor.run().await })
    };

    let ingest_state = Arc::new(IngestState::new(store.clone(), reconstructor.clone(), &config));
    let app = build_router(ingest_state)
        .route_layer(axum::middleware::from_fn(trace_lite::http_metrics::track_http_metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let tls_config = tls::resolve(&config).await?;
    let addr: std::net::SocketAddr = normalize_addr(&config.collector_addr).parse()?;

    tracing::info!(%addr, "collector listening");
    let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "collector server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, draining reconstructor");
        }
    }

    reconstructor.stop();
    if let Err(e) = reconstructor.flush_aged(chrono::Utc::now()).await {
        tracing::error!(error = %e, "final flush failed during shutdown");
    }
    reconstructor_task.abort();

    tracing::info!("collector shut down cleanly");
    Ok(())
}

/// `:PORT` style addresses (as used in Go-flavored config) bind all interfaces.
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
