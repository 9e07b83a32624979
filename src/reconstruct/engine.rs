use super::{critical_path_ms, finalize_span, EdgeAccumulator, SpanState, TraceState};
use crate::error::Result;
use crate::metrics::{FLUSH_DURATION_SECONDS, TRACES_FLUSHED_TOTAL};
use crate::model::{DependencyEdgeMinute, RawLog, Span, Trace};
use crate::store::{insert_rows, StorageGateway};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Windowed, in-memory trace assembler. Folds normalized log rows into
/// per-trace span state keyed by correlation id, then periodically flushes
/// traces that have gone quiet into the columnar store as spans, a trace
/// rollup, and dependency-edge-minute buckets.
pub struct Reconstructor<G: StorageGateway> {
    store: Arc<G>,
    traces: Arc<DashMap<String, TraceState>>,
    window: Duration,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<AtomicBool>,
}

impl<G: StorageGateway + 'static> Reconstructor<G> {
    pub fn new(store: Arc<G>, window: Duration) -> Self {
        Self {
            store,
            traces: Arc::new(DashMap::new()),
            window,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Folds a batch of (row, event-timestamp) pairs into the in-memory map.
    /// Events within the batch are applied in order; callers decide ordering
    /// across batches.
    pub fn add(&self, rows: &[(RawLog, DateTime<Utc>)]) {
        for (row, ts) in rows {
            self.fold_one(row, ts.timestamp_millis());
        }
    }

    fn fold_one(&self, row: &RawLog, ts_ms: i64) {
        let mut trace = self
            .traces
            .entry(row.trace_id.clone())
            .or_insert_with(|| TraceState::new(row.env.clone(), ts_ms));
        trace.updated_at = trace.updated_at.max(ts_ms);

        let span_id = if row.span_id.is_empty() {
            format!("implicit-{ts_ms}")
        } else {
            row.span_id.clone()
        };

        let span = trace.spans.entry(span_id.clone()).or_insert_with(|| SpanState {
            span_id: span_id.clone(),
            service: row.service.clone(),
            env: row.env.clone(),
            host: row.host.clone(),
            version: row.version.clone(),
            operation: operation_for(row),
            parent_span_id: row.parent_span_id.clone(),
            ..Default::default()
        });

        if span.parent_span_id.is_empty() && !row.parent_span_id.is_empty() {
            span.parent_span_id = row.parent_span_id.clone();
        }
        if span.service.is_empty() {
            span.service = row.service.clone();
        }
        if span.env.is_empty() {
            span.env = row.env.clone();
        }
        if span.host.is_empty() {
            span.host = row.host.clone();
        }
        if span.version.is_empty() {
            span.version = row.version.clone();
        }

        if row.status_code >= 400 {
            span.is_error = true;
        }
        if row.status_code != 0 {
            span.status_code = row.status_code;
        }

        match row.event.as_str() {
            "start" => {
                span.start_ts = if span.start_ts == 0 {
                    ts_ms
                } else {
                    span.start_ts.min(ts_ms)
                };
            }
            "end" => {
                span.end_ts = span.end_ts.max(ts_ms);
                if row.duration_ms > 0 {
                    span.duration_ms = row.duration_ms;
                }
            }
            _ => {
                if row.duration_ms > 0 {
                    span.end_ts = span.end_ts.max(ts_ms);
                    let candidate_start = ts_ms - row.duration_ms;
                    span.start_ts = if span.start_ts == 0 {
                        candidate_start
                    } else {
                        span.start_ts.min(candidate_start)
                    };
                    span.duration_ms = row.duration_ms;
                }
            }
        }
    }

    /// Flushes every trace idle for at least `window`. Called on each tick of
    /// `run` and once, unconditionally against the same age rule, on shutdown.
    pub async fn flush_aged(&self, now: DateTime<Utc>) -> Result<usize> {
        let tick_started = Instant::now();
        let result = self.flush_aged_inner(now).await;
        let outcome = if result.is_ok() { "ok" } else { "err" };
        FLUSH_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(tick_started.elapsed().as_secs_f64());
        result
    }

    async fn flush_aged_inner(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        let window_ms = self.window.as_millis() as i64;

        let aged: Vec<String> = self
            .traces
            .iter()
            .filter(|entry| now_ms - entry.value().updated_at >= window_ms)
            .map(|entry| entry.key().clone())
            .collect();

        let mut flushed = 0;
        for trace_id in aged {
            if let Some((_, state)) = self.traces.remove(&trace_id) {
                match self.flush_one(&trace_id, state, now_ms).await {
                    Ok(()) => {
                        TRACES_FLUSHED_TOTAL.with_label_values(&["ok"]).inc();
                        flushed += 1;
                    }
                    Err(e) => {
                        TRACES_FLUSHED_TOTAL.with_label_values(&["err"]).inc();
                        return Err(e);
                    }
                }
            }
        }
        Ok(flushed)
    }

    async fn flush_one(&self, trace_id: &str, state: TraceState, now_ms: i64) -> Result<()> {
        let mut children_total: std::collections::HashMap<String, i64> = std::collections::HashMap::new();

        let spans: Vec<Span> = state
            .spans
            .into_values()
            .map(|s| finalize_span(s, trace_id, now_ms, 0, now_ms))
            .collect();

        for span in &spans {
            if !span.parent_span_id.is_empty() {
                *children_total.entry(span.parent_span_id.clone()).or_insert(0) += span.duration_ms;
            }
        }

        // Re-finalize self_time now that children totals are known.
        let spans: Vec<Span> = spans
            .into_iter()
            .map(|mut span| {
                let children_ms = children_total.get(&span.span_id).copied().unwrap_or(0);
                span.self_time_ms = if children_ms > span.duration_ms {
                    span.duration_ms
                } else {
                    (span.duration_ms - children_ms).max(0)
                };
                span
            })
            .collect();

        if spans.is_empty() {
            return Ok(());
        }

        let trace = build_trace(trace_id, &state.env, &spans);

        let mut edges = EdgeAccumulator::new();
        edges.add_trace(&spans);
        let edge_rows: Vec<DependencyEdgeMinute> = edges.finish();

        insert_rows(self.store.as_ref(), "spans", &spans).await?;
        insert_rows(self.store.as_ref(), "traces", &[trace]).await?;
        insert_rows(self.store.as_ref(), "dependency_edges_minute", &edge_rows).await?;

        Ok(())
    }

    /// Drives the periodic flush loop until `stop` is called or the process
    /// shutdown signal fires.
    pub async fn run(&self) {
        *self.running.write().await = true;
        let mut ticker = tokio::time::interval(self.window.min(Duration::from_secs(10)).max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !self.is_running().await {
                break;
            }
            if let Err(e) = self.flush_aged(Utc::now()).await {
                tracing::error!(error = %e, "flush tick failed");
            }
        }
        *self.running.write().await = false;
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn operation_for(row: &RawLog) -> String {
    if !row.route.is_empty() {
        row.route.clone()
    } else if !row.message.is_empty() {
        row.message.clone()
    } else {
        "unknown-op".to_string()
    }
}

fn build_trace(trace_id: &str, env: &str, spans: &[Span]) -> Trace {
    let start_ts = spans.iter().map(|s| s.start_ts).min().unwrap_or(0);
    let end_ts = spans.iter().map(|s| s.end_ts).max().unwrap_or(0);
    let root_service = spans
        .iter()
        .min_by_key(|s| s.start_ts)
        .map(|s| s.service.clone())
        .unwrap_or_default();

    let mut services: HashSet<&str> = HashSet::new();
    let mut versions: Vec<String> = Vec::new();
    let mut error_count = 0u32;
    for span in spans {
        services.insert(span.service.as_str());
        if !versions.contains(&span.version) {
            versions.push(span.version.clone());
        }
        if span.is_error {
            error_count += 1;
        }
    }
    versions.sort();

    Trace {
        trace_id: trace_id.to_string(),
        env: env.to_string(),
        root_service,
        start_ts,
        end_ts,
        duration_ms: (end_ts - start_ts).max(0),
        span_count: spans.len() as u32,
        service_count: services.len() as u32,
        error_count,
        critical_path_ms: critical_path_ms(spans),
        versions,
    }
}
