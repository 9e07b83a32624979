use crate::error::Result;
use crate::model::{DependencyEdgeMinute, Span};
use crate::sanitize::{resolve_window, sanitize_token};
use crate::store::StorageGateway;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::util::rows_to;
use super::QueryState;

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub env: Option<String>,
    pub base: Option<String>,
    pub cand: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct ServiceErrorSummary {
    pub service: String,
    pub calls: u64,
    pub errors: u64,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct OperationErrorSummary {
    pub service: String,
    pub operation: String,
    pub calls: u64,
    pub errors: u64,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct PropagationEdge {
    pub caller_service: String,
    pub callee_service: String,
    pub error_calls: u64,
    pub calls: u64,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct NewError {
    pub service: String,
    pub operation: String,
    pub cand_errors: u64,
}

pub async fn get_errors<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<ErrorsQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());

    let mut filters = vec![
        format!("start_ts >= {}", window.from.timestamp_millis()),
        format!("start_ts < {}", window.to.timestamp_millis()),
    ];
    if let Some(env) = q.env.as_deref() {
        let safe = sanitize_token(env);
        if !safe.is_empty() {
            filters.push(format!("env = '{safe}'"));
        }
    }

    let spans_sql = format!("SELECT * FROM spans WHERE {}", filters.join(" AND "));
    let rows = state.store.query(&spans_sql).await?;
    let spans = rows_to::<Span>(rows)?;

    let by_service = service_breakdown(&spans);
    let mut services: Vec<ServiceErrorSummary> = by_service.into_values().collect();
    services.sort_by(|a, b| b.error_rate.partial_cmp(&a.error_rate).unwrap());

    let by_op = operation_breakdown(&spans);
    let mut top_operations: Vec<OperationErrorSummary> = by_op.into_values().collect();
    top_operations.sort_by(|a, b| b.errors.cmp(&a.errors));
    top_operations.truncate(20);

    let edges_sql = format!(
        "SELECT * FROM dependency_edges_minute WHERE bucket_ts >= {} AND bucket_ts < {}",
        window.from.timestamp_millis(),
        window.to.timestamp_millis()
    );
    let edge_rows = state.store.query(&edges_sql).await?;
    let edges = rows_to::<DependencyEdgeMinute>(edge_rows)?;
    let propagation = propagation_map(&edges);

    let new_errors = match (q.base.as_deref(), q.cand.as_deref()) {
        (Some(base), Some(cand)) => new_errors_between(&spans, base, cand),
        _ => Vec::new(),
    };

    Ok(Json(json!({
        "services": services,
        "top_operations": top_operations,
        "propagation": propagation,
        "new_errors": new_errors,
    })))
}

fn service_breakdown(spans: &[Span]) -> HashMap<String, ServiceErrorSummary> {
    let mut by_service: HashMap<String, ServiceErrorSummary> = HashMap::new();
    for s in spans {
        let entry = by_service
            .entry(s.service.clone())
            .or_insert_with(|| ServiceErrorSummary {
                service: s.service.clone(),
                ..Default::default()
            });
        entry.calls += 1;
        if s.is_error {
            entry.errors += 1;
        }
    }
    for entry in by_service.values_mut() {
        entry.error_rate = if entry.calls > 0 {
            entry.errors as f64 / entry.calls as f64
        } else {
            0.0
        };
    }
    by_service
}

fn operation_breakdown(spans: &[Span]) -> HashMap<(String, String), OperationErrorSummary> {
    let mut by_op: HashMap<(String, String), OperationErrorSummary> = HashMap::new();
    for s in spans {
        let key = (s.service.clone(), s.operation.clone());
        let entry = by_op.entry(key).or_insert_with(|| OperationErrorSummary {
            service: s.service.clone(),
            operation: s.operation.clone(),
            calls: 0,
            errors: 0,
            error_rate: 0.0,
        });
        entry.calls += 1;
        if s.is_error {
            entry.errors += 1;
        }
    }
    for entry in by_op.values_mut() {
        entry.error_rate = if entry.calls > 0 {
            entry.errors as f64 / entry.calls as f64
        } else {
            0.0
        };
    }
    by_op
}

fn propagation_map(edges: &[DependencyEdgeMinute]) -> Vec<PropagationEdge> {
    #[derive(Default)]
    struct Acc {
        calls: u64,
        error_calls: u64,
    }
    let mut groups: HashMap<(String, String), Acc> = HashMap::new();
    for e in edges {
        let acc = groups
            .entry((e.caller_service.clone(), e.callee_service.clone()))
            .or_default();
        acc.calls += e.calls;
        acc.error_calls += e.error_calls;
    }

    let mut out: Vec<PropagationEdge> = groups
        .into_iter()
        .filter(|(_, acc)| acc.error_calls > 0)
        .map(|((caller, callee), acc)| PropagationEdge {
            caller_service: caller,
            callee_service: callee,
            error_calls: acc.error_calls,
            calls: acc.calls,
            error_rate: if acc.calls > 0 {
                acc.error_calls as f64 / acc.calls as f64
            } else {
                0.0
            },
        })
        .collect();
    out.sort_by(|a, b| b.error_calls.cmp(&a.error_calls));
    out
}

fn new_errors_between(spans: &[Span], base: &str, cand: &str) -> Vec<NewError> {
    #[derive(Default)]
    struct Counts {
        base_errors: u64,
        cand_errors: u64,
    }
    let mut by_op: HashMap<(String, String), Counts> = HashMap::new();
    for s in spans {
        if s.version != base && s.version != cand {
            continue;
        }
        let key = (s.service.clone(), s.operation.clone());
        let entry = by_op.entry(key).or_default();
        if s.is_error {
            if s.version == base {
                entry.base_errors += 1;
            } else {
                entry.cand_errors += 1;
            }
        }
    }

    by_op
        .into_iter()
        .filter(|(_, c)| c.base_errors == 0 && c.cand_errors > 0)
        .map(|((service, operation), c)| NewError {
            service,
            operation,
            cand_errors: c.cand_errors,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(service: &str, operation: &str, version: &str, is_error: bool) -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: String::new(),
            service: service.to_string(),
            env: "prod".to_string(),
            host: "h1".to_string(),
            version: version.to_string(),
            operation: operation.to_string(),
            start_ts: 0,
            end_ts: 10,
            duration_ms: 10,
            self_time_ms: 10,
            status_code: if is_error { 500 } else { 200 },
            is_error,
            source: "explicit".to_string(),
            updated_at: 0,
        }
    }

    #[test]
    fn test_service_breakdown_error_rate() {
        let spans = vec![
            span("checkout", "op", "v1", true),
            span("checkout", "op", "v1", false),
        ];
        let by_service = service_breakdown(&spans);
        let summary = &by_service["checkout"];
        assert_eq!(summary.calls, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.error_rate, 0.5);
    }

    #[test]
    fn test_new_errors_between_detects_only_cand_errors() {
        let spans = vec![
            span("checkout", "charge", "v1", false),
            span("checkout", "charge", "v2", true),
        ];
        let found = new_errors_between(&spans, "v1", "v2");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].operation, "charge");
        assert_eq!(found[0].cand_errors, 1);
    }

    #[test]
    fn test_new_errors_excludes_preexisting() {
        let spans = vec![
            span("checkout", "charge", "v1", true),
            span("checkout", "charge", "v2", true),
        ];
        let found = new_errors_between(&spans, "v1", "v2");
        assert!(found.is_empty());
    }

    #[test]
    fn test_propagation_map_excludes_error_free_edges() {
        let edges = vec![DependencyEdgeMinute {
            bucket_ts: 0,
            env: "prod".to_string(),
            caller_service: "a".to_string(),
            callee_service: "b".to_string(),
            caller_version: "1".to_string(),
            callee_version: "1".to_string(),
            calls: 10,
            error_calls: 0,
            p50_ms: 1.0,
            p95_ms: 2.0,
            max_ms: 3.0,
        }];
        assert!(propagation_map(&edges).is_empty());
    }
}
