use crate::error::Result;
use crate::model::DependencyEdgeMinute;
use crate::sanitize::resolve_window;
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
pub struct WindowQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DependencyEdgeSummary {
    pub caller_service: String,
    pub callee_service: String,
    pub calls: u64,
    pub error_calls: u64,
    pub avg_latency_ms: f64,
    pub avg_p95_ms: f64,
    pub max_ms: f64,
    pub error_rate: f64,
}

pub async fn get_dependency<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<WindowQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());
    let sql = format!(
        "SELECT * FROM dependency_edges_minute WHERE bucket_ts >= {} AND bucket_ts < {}",
        window.from.timestamp_millis(),
        window.to.timestamp_millis()
    );
    let rows = state.store.query(&sql).await?;
    let edges = rows_to::<DependencyEdgeMinute>(rows)?;
    let summary = aggregate(&edges);
    Ok(Json(json!({ "edges": summary })))
}

fn aggregate(edges: &[DependencyEdgeMinute]) -> Vec<DependencyEdgeSummary> {
    #[derive(Default)]
    struct Acc {
        calls: u64,
        error_calls: u64,
        p50_sum: f64,
        p95_sum: f64,
        max_ms: f64,
        buckets: u64,
    }

    let mut groups: HashMap<(String, String), Acc> = HashMap::new();
    for e in edges {
        let acc = groups
            .entry((e.caller_service.clone(), e.callee_service.clone()))
            .or_default();
        acc.calls += e.calls;
        acc.error_calls += e.error_calls;
        acc.p50_sum += e.p50_ms;
        acc.p95_sum += e.p95_ms;
        acc.max_ms = acc.max_ms.max(e.max_ms);
        acc.buckets += 1;
    }

    let mut out: Vec<DependencyEdgeSummary> = groups
        .into_iter()
        .map(|((caller, callee), acc)| {
            let buckets = acc.buckets.max(1) as f64;
            let avg_p50 = acc.p50_sum / buckets;
            let avg_p95 = acc.p95_sum / buckets;
            DependencyEdgeSummary {
                caller_service: caller,
                callee_service: callee,
                calls: acc.calls,
                error_calls: acc.error_calls,
                avg_latency_ms: (avg_p50 + avg_p95) / 2.0,
                avg_p95_ms: avg_p95,
                max_ms: acc.max_ms,
                error_rate: if acc.calls > 0 {
                    acc.error_calls as f64 / acc.calls as f64
                } else {
                    0.0
                },
            }
        })
        .collect();
    out.sort_by(|a, b| b.calls.cmp(&a.calls));
    out
}

#[derive(Debug, Deserialize)]
pub struct DependencyDiffQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub base: String,
    pub cand: String,
}

#[derive(Debug, Serialize)]
pub struct DependencyDiffEdge {
    pub caller_service: String,
    pub callee_service: String,
    pub status: String,
    pub base_calls: u64,
    pub cand_calls: u64,
    pub call_diff: i64,
    pub call_diff_pct: f64,
    pub p95_diff_ms: f64,
    pub error_rate_diff: f64,
    pub is_new_edge: bool,
    pub is_removed_edge: bool,
    pub is_high_call_increase: bool,
}

pub async fn get_dependency_diff<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<DependencyDiffQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());
    let sql = format!(
        "SELECT * FROM dependency_edges_minute WHERE bucket_ts >= {} AND bucket_ts < {}",
        window.from.timestamp_millis(),
        window.to.timestamp_millis()
    );
    let rows = state.store.query(&sql).await?;
    let all = rows_to::<DependencyEdgeMinute>(rows)?;

    let base_edges: Vec<&DependencyEdgeMinute> = all
        .iter()
        .filter(|e| e.caller_version == q.base || e.callee_version == q.base)
        .collect();
    let cand_edges: Vec<&DependencyEdgeMinute> = all
        .iter()
        .filter(|e| e.caller_version == q.cand || e.callee_version == q.cand)
        .collect();

    let base_summary: HashMap<(String, String), DependencyEdgeSummary> = aggregate(
        &base_edges.into_iter().cloned().collect::<Vec<_>>(),
    )
    .into_iter()
    .map(|s| ((s.caller_service.clone(), s.callee_service.clone()), s))
    .collect();
    let cand_summary: HashMap<(String, String), DependencyEdgeSummary> = aggregate(
        &cand_edges.into_iter().cloned().collect::<Vec<_>>(),
    )
    .into_iter()
    .map(|s| ((s.caller_service.clone(), s.callee_service.clone()), s))
    .collect();

    let mut keys: Vec<(String, String)> = base_summary.keys().chain(cand_summary.keys()).cloned().collect();
    keys.sort();
    keys.dedup();

    let mut diffs = Vec::new();
    let mut new_count = 0u32;
    let mut removed_count = 0u32;
    let mut changed_count = 0u32;

    for key in keys {
        let base = base_summary.get(&key);
        let cand = cand_summary.get(&key);
        let status = match (base, cand) {
            (None, Some(_)) => {
                new_count += 1;
                "new"
            }
            (Some(_), None) => {
                removed_count += 1;
                "removed"
            }
            _ => {
                changed_count += 1;
                "changed"
            }
        };

        let base_calls = base.map(|s| s.calls).unwrap_or(0);
        let cand_calls = cand.map(|s| s.calls).unwrap_or(0);
        let call_diff_pct = pct_delta(base_calls as f64, cand_calls as f64);

        diffs.push(DependencyDiffEdge {
            caller_service: key.0,
            callee_service: key.1,
            status: status.to_string(),
            base_calls,
            cand_calls,
            call_diff: cand_calls as i64 - base_calls as i64,
            call_diff_pct,
            p95_diff_ms: cand.map(|s| s.avg_p95_ms).unwrap_or(0.0) - base.map(|s| s.avg_p95_ms).unwrap_or(0.0),
            error_rate_diff: cand.map(|s| s.error_rate).unwrap_or(0.0) - base.map(|s| s.error_rate).unwrap_or(0.0),
            is_new_edge: status == "new",
            is_removed_edge: status == "removed",
            is_high_call_increase: call_diff_pct >= 100.0,
        });
    }

    diffs.sort_by(|a, b| b.call_diff_pct.partial_cmp(&a.call_diff_pct).unwrap());

    Ok(Json(json!({
        "edges": diffs,
        "summary": {
            "new_edges": new_count,
            "removed_edges": removed_count,
            "changed_edges": changed_count,
        }
    })))
}

/// `pctDelta`: 0 when both are 0, 100 when base is 0 and cand isn't,
/// otherwise the signed percentage change from base to cand.
pub fn pct_delta(base: f64, cand: f64) -> f64 {
    if base == 0.0 && cand == 0.0 {
        0.0
    } else if base == 0.0 {
        100.0
    } else {
        (cand - base) / base.abs() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_delta_both_zero() {
        assert_eq!(pct_delta(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_pct_delta_base_zero_cand_nonzero() {
        assert_eq!(pct_delta(0.0, 5.0), 100.0);
    }

    #[test]
    fn test_pct_delta_normal_increase() {
        assert_eq!(pct_delta(50.0, 100.0), 100.0);
    }

    #[test]
    fn test_aggregate_merges_by_service_pair() {
        let edges = vec![
            DependencyEdgeMinute {
                bucket_ts: 0,
                env: "prod".to_string(),
                caller_service: "a".to_string(),
                callee_service: "b".to_string(),
                caller_version: "1".to_string(),
                callee_version: "1".to_string(),
                calls: 10,
                error_calls: 1,
                p50_ms: 10.0,
                p95_ms: 20.0,
                max_ms: 30.0,
            },
            DependencyEdgeMinute {
                bucket_ts: 60_000,
                env: "prod".to_string(),
                caller_service: "a".to_string(),
                callee_service: "b".to_string(),
                caller_version: "1".to_string(),
                callee_version: "1".to_string(),
                calls: 10,
                error_calls: 0,
                p50_ms: 30.0,
                p95_ms: 40.0,
                max_ms: 50.0,
            },
        ];
        let summary = aggregate(&edges);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].calls, 20);
        assert_eq!(summary[0].error_calls, 1);
        assert_eq!(summary[0].max_ms, 50.0);
    }
}
