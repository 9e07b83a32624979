/// Integration tests for the read-API HTTP surface, exercised over the full
/// axum router with an in-memory storage gateway pre-seeded with rows.
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use trace_lite::query::{build_router, QueryState};
use trace_lite::store::InMemoryStorageGateway;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn seed_trace(store: &InMemoryStorageGateway) {
    let trace = json!({
        "trace_id": "trace-a",
        "env": "prod",
        "root_service": "checkout",
        "start_ts": 1_000,
        "end_ts": 1_100,
        "duration_ms": 100,
        "span_count": 2,
        "service_count": 2,
        "error_count": 0,
        "critical_path_ms": 100,
        "versions": ["1.4.2"],
    });
    store
        .insert_ndjson("traces", format!("{trace}\n"))
        .now_or_never_sync();

    let span1 = json!({
        "trace_id": "trace-a",
        "span_id": "span-1",
        "parent_span_id": "",
        "service": "checkout",
        "env": "prod",
        "host": "host-1",
        "version": "1.4.2",
        "operation": "/checkout",
        "start_ts": 1_000,
        "end_ts": 1_100,
        "duration_ms": 100,
        "self_time_ms": 40,
        "status_code": 200,
        "is_error": false,
        "source": "explicit",
        "updated_at": 1_100,
    });
    let span2 = json!({
        "trace_id": "trace-a",
        "span_id": "span-2",
        "parent_span_id": "span-1",
        "service": "payments",
        "env": "prod",
        "host": "host-2",
        "version": "1.4.2",
        "operation": "/charge",
        "start_ts": 1_020,
        "end_ts": 1_080,
        "duration_ms": 60,
        "self_time_ms": 60,
        "status_code": 200,
        "is_error": false,
        "source": "explicit",
        "updated_at": 1_080,
    });
    store
        .insert_ndjson("spans", format!("{span1}\n{span2}\n"))
        .now_or_never_sync();
}

/// `InMemoryStorageGateway::insert_ndjson` is async but never actually awaits
/// I/O; tests seed it from sync setup code via a tiny blocking helper.
trait NowOrNeverSync {
    fn now_or_never_sync(self);
}
impl<F: std::future::Future<Output = trace_lite::Result<()>>> NowOrNeverSync for F {
    fn now_or_never_sync(self) {
        futures::executor::block_on(self).unwrap();
    }
}

#[tokio::test]
async fn test_list_traces_returns_seeded_trace() {
    let store = Arc::new(InMemoryStorageGateway::new());
    seed_trace(&store);
    let state = Arc::new(QueryState::new(store));
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/traces?from=1970-01-01T00:00:00Z&to=2100-01-01T00:00:00Z")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_trace_waterfall_builds_drilldown() {
    let store = Arc::new(InMemoryStorageGateway::new());
    seed_trace(&store);
    let state = Arc::new(QueryState::new(store));
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/traces/trace-a/waterfall")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["drilldown"]["spans"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_trace_waterfall_missing_trace_is_not_found() {
    let store = Arc::new(InMemoryStorageGateway::new());
    let state = Arc::new(QueryState::new(store));
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/traces/does-not-exist/waterfall")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_hosts_endpoint_returns_empty_when_unseeded() {
    let store = Arc::new(InMemoryStorageGateway::new());
    let state = Arc::new(QueryState::new(store));
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/v1/hosts").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert!(value["hosts"].as_array().unwrap().is_empty());
}
