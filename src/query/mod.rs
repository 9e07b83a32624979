mod compare;
mod dependency;
mod drilldown;
mod errors;
mod hosts;
mod traces;
mod util;

use crate::store::StorageGateway;
use axum::{
    routing::get,
    Router,
};
use std::sync::Arc;

pub struct QueryState<G: StorageGateway> {
    pub store: Arc<G>,
}

impl<G: StorageGateway> QueryState<G> {
    pub fn new(store: Arc<G>) -> Self {
        Self { store }
    }
}

pub fn build_router<G: StorageGateway + 'static>(state: Arc<QueryState<G>>) -> Router {
    Router::new()
        .route("/v1/traces", get(traces::list_traces::<G>))
        .route("/v1/traces/:id", get(traces::get_trace::<G>))
        .route("/v1/traces/:id/waterfall", get(traces::get_trace_waterfall::<G>))
        .route("/v1/traces/:id/drilldown", get(traces::get_trace_waterfall::<G>))
        .route("/v1/dependency", get(dependency::get_dependency::<G>))
        .route("/v1/dependency/diff", get(dependency::get_dependency_diff::<G>))
        .route("/v1/hosts", get(hosts::get_hosts::<G>))
        .route("/v1/compare", get(compare::get_compare::<G>))
        .route("/v1/errors", get(errors::get_errors::<G>))
        .route("/health", get(health))
        .route("/health/live", get(health))
        .route("/health/ready", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": crate::metrics::uptime_seconds(),
    }))
}

async fn metrics_handler() -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, crate::metrics::gather_metrics())
}

pub use drilldown::build_drilldown;
