use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single event as received on the wire, before normalization.
///
/// Field names mirror the ingest contract exactly (camelCase), not the
/// persisted column names used once a `RawLog` has been derived from it.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    pub timestamp: Option<String>,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "correlationId", default)]
    pub correlation_id: String,
    #[serde(rename = "spanId", default)]
    pub span_id: String,
    #[serde(rename = "parentSpanId", default)]
    pub parent_span_id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub method: String,
    #[serde(rename = "statusCode", default)]
    pub status_code: u32,
    #[serde(rename = "durationMs", default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A normalized, persisted log row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub ts: i64,
    pub ingest_ts: i64,
    pub service: String,
    pub env: String,
    pub host: String,
    pub version: String,
    pub level: String,
    pub message: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub event: String,
    pub route: String,
    pub method: String,
    pub status_code: u32,
    pub duration_ms: i64,
    pub attrs: HashMap<String, String>,
    pub raw_json: String,
}

/// The provenance of a span's timing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanSource {
    Explicit,
    Inferred,
}

impl SpanSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SpanSource::Explicit => "explicit",
            SpanSource::Inferred => "inferred",
        }
    }
}

/// A finalized, upsertable span record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub service: String,
    pub env: String,
    pub host: String,
    pub version: String,
    pub operation: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub self_time_ms: i64,
    pub status_code: u32,
    pub is_error: bool,
    pub source: String,
    pub updated_at: i64,
}

/// A finalized, upsertable trace rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub env: String,
    pub root_service: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub span_count: u32,
    pub service_count: u32,
    pub error_count: u32,
    pub critical_path_ms: i64,
    pub versions: Vec<String>,
}

/// Aggregated per-minute caller->callee statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdgeMinute {
    pub bucket_ts: i64,
    pub env: String,
    pub caller_service: String,
    pub callee_service: String,
    pub caller_version: String,
    pub callee_version: String,
    pub calls: u64,
    pub error_calls: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// Per-minute, per-host rollup, materialized by the store from `RawLog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatsMinute {
    pub bucket_ts: i64,
    pub env: String,
    pub host: String,
    pub logs: u64,
    pub errors: u64,
    pub distinct_services: u32,
    pub last_seen_ts: i64,
}
