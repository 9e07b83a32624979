use crate::error::Result;
use crate::model::Span;
use crate::sanitize::{resolve_window, sanitize_token};
use crate::store::StorageGateway;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::dependency::pct_delta;
use super::util::rows_to;
use super::QueryState;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub service: String,
    pub base: String,
    pub cand: String,
}

#[derive(Debug, Serialize, Default, Clone)]
pub struct VersionMetrics {
    pub spans: u64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct OperationDiff {
    pub operation: String,
    pub base_p95: f64,
    pub cand_p95: f64,
    pub delta: f64,
    pub base_calls: u64,
    pub cand_calls: u64,
}

#[derive(Debug, Serialize)]
pub struct RootCause {
    pub service: String,
    pub score: f64,
    pub base: ServiceSnapshot,
    pub cand: ServiceSnapshot,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct ServiceSnapshot {
    pub calls: u64,
    pub p95: f64,
    pub error_rate: f64,
    pub blocking_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct Anomaly {
    pub label: String,
    pub color: &'static str,
    pub deviation_score: f64,
}

pub async fn get_compare<G: StorageGateway + 'static>(
    State(state): State<Arc<QueryState<G>>>,
    Query(q): Query<CompareQuery>,
) -> Result<Json<Value>> {
    let window = resolve_window(q.from.as_deref(), q.to.as_deref());
    let service = sanitize_token(&q.service);
    let base = sanitize_token(&q.base);
    let cand = sanitize_token(&q.cand);

    let sql = format!(
        "SELECT s.* FROM spans s INNER JOIN traces t ON s.trace_id = t.trace_id \
         WHERE t.root_service = '{service}' AND s.version IN ('{base}', '{cand}') \
         AND s.start_ts >= {} AND s.start_ts < {}",
        window.from.timestamp_millis(),
        window.to.timestamp_millis()
    );
    let rows = state.store.query(&sql).await?;
    let spans = rows_to::<Span>(rows)?;

    let base_spans: Vec<&Span> = spans.iter().filter(|s| s.version == base).collect();
    let cand_spans: Vec<&Span> = spans.iter().filter(|s| s.version == cand).collect();

    let base_metrics = version_metrics(&base_spans);
    let cand_metrics = version_metrics(&cand_spans);

    let operation_diff = operation_diffs(&base_spans, &cand_spans);
    let root_causes = root_causes(&base_spans, &cand_spans);
    let anomalies = anomalies(&base_metrics, &cand_metrics);

    Ok(Json(json!({
        "metrics": { "base": base_metrics, "cand": cand_metrics },
        "operation_diff": operation_diff,
        "root_causes": root_causes,
        "anomalies": anomalies,
    })))
}

fn version_metrics(spans: &[&Span]) -> VersionMetrics {
    if spans.is_empty() {
        return VersionMetrics::default();
    }
    let mut durations: Vec<f64> = spans.iter().map(|s| s.duration_ms as f64).collect();
    durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let errors = spans.iter().filter(|s| s.is_error).count();

    VersionMetrics {
        spans: spans.len() as u64,
        p50: percentile(&durations, 0.50),
        p95: percentile(&durations, 0.95),
        p99: percentile(&durations, 0.99),
        error_rate: errors as f64 / spans.len() as f64,
    }
}

/// Linear-interpolation percentile, as used throughout the analytics layer.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

fn operation_diffs(base: &[&Span], cand: &[&Span]) -> Vec<OperationDiff> {
    let base_by_op = group_by_operation(base);
    let cand_by_op = group_by_operation(cand);

    let mut ops: Vec<String> = base_by_op.keys().chain(cand_by_op.keys()).cloned().collect();
    ops.sort();
    ops.dedup();

    let mut diffs: Vec<OperationDiff> = ops
        .into_iter()
        .filter_map(|op| {
            let b = base_by_op.get(&op)?;
            let c = cand_by_op.get(&op)?;
            if b.is_empty() || c.is_empty() {
                return None;
            }
            let base_durations: Vec<f64> = b.iter().map(|s| s.duration_ms as f64).collect();
            let cand_durations: Vec<f64> = c.iter().map(|s| s.duration_ms as f64).collect();
            let mut base_sorted = base_durations.clone();
            base_sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mut cand_sorted = cand_durations.clone();
            cand_sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let base_p95 = percentile(&base_sorted, 0.95);
            let cand_p95 = percentile(&cand_sorted, 0.95);
            Some(OperationDiff {
                operation: op,
                base_p95,
                cand_p95,
                delta: cand_p95 - base_p95,
                base_calls: b.len() as u64,
                cand_calls: c.len() as u64,
            })
        })
        .collect();

    diffs.sort_by(|a, b| b.delta.partial_cmp(&a.delta).unwrap());
    diffs.truncate(200);
    diffs
}

fn group_by_operation<'a>(spans: &[&'a Span]) -> HashMap<String, Vec<&'a Span>> {
    let mut map: HashMap<String, Vec<&Span>> = HashMap::new();
    for s in spans {
        map.entry(s.operation.clone()).or_default().push(s);
    }
    map
}

fn root_causes(base: &[&Span], cand: &[&Span]) -> Vec<RootCause> {
    let base_by_svc = snapshot_by_service(base);
    let cand_by_svc = snapshot_by_service(cand);

    let mut services: Vec<String> = base_by_svc.keys().chain(cand_by_svc.keys()).cloned().collect();
    services.sort();
    services.dedup();

    let mut causes: Vec<RootCause> = services
        .into_iter()
        .map(|svc| {
            let base = base_by_svc.get(&svc).cloned().unwrap_or_default();
            let cand = cand_by_svc.get(&svc).cloned().unwrap_or_default();
            let lat_pct = pct_delta(base.p95, cand.p95);
            let err_pct = pct_delta(base.error_rate, cand.error_rate);
            let call_pct = pct_delta(base.calls as f64, cand.calls as f64);
            let score = 0.50 * clamp01(lat_pct / 300.0)
                + 0.25 * clamp01(err_pct / 300.0)
                + 0.15 * clamp01(call_pct / 300.0)
                + 0.10 * clamp01(cand.blocking_ratio);
            RootCause {
                service: svc,
                score,
                base,
                cand,
            }
        })
        .collect();

    causes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    causes.truncate(10);
    causes
}

fn snapshot_by_service(spans: &[&Span]) -> HashMap<String, ServiceSnapshot> {
    let mut by_svc: HashMap<String, Vec<&Span>> = HashMap::new();
    for s in spans {
        by_svc.entry(s.service.clone()).or_default().push(s);
    }

    by_svc
        .into_iter()
        .map(|(svc, group)| {
            let mut durations: Vec<f64> = group.iter().map(|s| s.duration_ms as f64).collect();
            durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let errors = group.iter().filter(|s| s.is_error).count();
            let blocking_sum: f64 = group
                .iter()
                .map(|s| {
                    if s.duration_ms > 0 {
                        (s.duration_ms - s.self_time_ms) as f64 / s.duration_ms as f64
                    } else {
                        0.0
                    }
                })
                .sum();

            (
                svc,
                ServiceSnapshot {
                    calls: group.len() as u64,
                    p95: percentile(&durations, 0.95),
                    error_rate: errors as f64 / group.len().max(1) as f64,
                    blocking_ratio: blocking_sum / group.len().max(1) as f64,
                },
            )
        })
        .collect()
}

fn anomalies(base: &VersionMetrics, cand: &VersionMetrics) -> Vec<Anomaly> {
    let lat_pct = pct_delta(base.p95, cand.p95);
    let err_pct = pct_delta(base.error_rate, cand.error_rate);
    let call_pct = pct_delta(base.spans as f64, cand.spans as f64);

    let mut out = Vec::new();
    if lat_pct >= 100.0 {
        out.push(badge("Latency spike", "orange", lat_pct, err_pct, call_pct));
    }
    if err_pct >= 50.0 {
        out.push(badge("Error anomaly", "red", lat_pct, err_pct, call_pct));
    }
    if call_pct >= 100.0 {
        out.push(badge("Traffic spike", "yellow", lat_pct, err_pct, call_pct));
    }
    out
}

fn badge(label: &str, color: &'static str, lat_pct: f64, err_pct: f64, call_pct: f64) -> Anomaly {
    let deviation = lat_pct.abs().max(err_pct.abs()).max(call_pct.abs()) / 300.0;
    Anomaly {
        label: label.to_string(),
        color,
        deviation_score: clamp01(deviation),
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
