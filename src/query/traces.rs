use crate::error::{AppError, Result};
use crate::model::{Span, Trace};
use crate::sanitize::{resolve_window, sanitize_token};
use crate::store::StorageGateway;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::util::{require_safe, rows_to};
use super::{build_drilldown, QueryState};

#[derive(Debug, Deserialize)]
pub struct ListTracesQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub env: Option<String>,
    pub service: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_traces<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<ListTracesQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());
    let limit = q.limit.unwrap_or(200).min(5000);

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
    if let Some(service) = q.service.as_deref() {
        let safe = sanitize_token(service);
        if !safe.is_empty() {
            filters.push(format!("root_service = '{safe}'"));
        }
    }

    let sql = format!(
        "SELECT * FROM traces WHERE {} ORDER BY start_ts DESC LIMIT {}",
        filters.join(" AND "),
        limit
    );
    let rows = state.store.query(&sql).await?;
    let traces = rows_to::<Trace>(rows)?;
    Ok(Json(json!({ "data": traces })))
}

pub async fn get_trace<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = require_safe(&id)?;
    let (trace, spans) = load_trace_and_spans(state.store.as_ref(), &id).await?;
    Ok(Json(json!({ "trace": trace, "spans": spans })))
}

pub async fn get_trace_waterfall<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = require_safe(&id)?;
    let (trace, spans) = load_trace_and_spans(state.store.as_ref(), &id).await?;
    let drilldown = build_drilldown(&trace, &spans);
    Ok(Json(json!({ "trace": trace, "drilldown": drilldown })))
}

async fn load_trace_and_spans<G: StorageGateway>(store: &G, trace_id: &str) -> Result<(Trace, Vec<Span>)> {
    let trace_sql =
        format!("SELECT * FROM traces WHERE trace_id = '{trace_id}' ORDER BY updated_at DESC LIMIT 1");
    let trace_rows = store.query(&trace_sql).await?;
    let mut traces = rows_to::<Trace>(trace_rows)?;
    let trace = traces
        .pop()
        .ok_or_else(|| AppError::Validation(format!("trace {trace_id} not found")))?;

    let spans_sql = format!("SELECT * FROM spans WHERE trace_id = '{trace_id}' ORDER BY start_ts ASC");
    let span_rows = store.query(&spans_sql).await?;
    let spans = rows_to::<Span>(span_rows)?;

    Ok((trace, spans))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_safe_rejects_unsafe_id() {
        assert!(require_safe("abc'; DROP TABLE traces; --").is_err());
    }

    #[test]
    fn test_require_safe_accepts_normal_id() {
        assert_eq!(require_safe("trace-a-123").unwrap(), "trace-a-123");
    }
}
