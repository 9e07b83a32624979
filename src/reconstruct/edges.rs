use crate::model::{DependencyEdgeMinute, Span};
use std::collections::HashMap;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct EdgeKey {
    bucket_ts: i64,
    env: String,
    caller_service: String,
    callee_service: String,
    caller_version: String,
    callee_version: String,
}

#[derive(Debug, Default)]
struct EdgeBucket {
    durations_ms: Vec<f64>,
    error_calls: u64,
}

/// Accumulates parent->child span pairs that cross a service boundary into
/// per-minute dependency edge buckets, then collapses them into percentile
/// summaries on demand.
#[derive(Debug, Default)]
pub struct EdgeAccumulator {
    buckets: HashMap<EdgeKey, EdgeBucket>,
}

impl EdgeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds all parent->child pairs in `spans` (one trace's finalized spans).
    pub fn add_trace(&mut self, spans: &[Span]) {
        let by_id: HashMap<&str, &Span> = spans.iter().map(|s| (s.span_id.as_str(), s)).collect();

        for child in spans {
            if child.parent_span_id.is_empty() {
                continue;
            }
            let Some(parent) = by_id.get(child.parent_span_id.as_str()) else {
                continue;
            };
            if parent.service == child.service {
                continue;
            }

            let bucket_ts = minute_floor(child.start_ts);
            let key = EdgeKey {
                bucket_ts,
                env: child.env.clone(),
                caller_service: parent.service.clone(),
                callee_service: child.service.clone(),
                caller_version: parent.version.clone(),
                callee_version: child.version.clone(),
            };

            let bucket = self.buckets.entry(key).or_default();
            bucket.durations_ms.push(child.duration_ms as f64);
            if child.is_error {
                bucket.error_calls += 1;
            }
        }
    }

    /// Collapses all buckets into immutable `DependencyEdgeMinute` rows.
    pub fn finish(self) -> Vec<DependencyEdgeMinute> {
        self.buckets
            .into_iter()
            .map(|(key, bucket)| {
                let mut sorted = bucket.durations_ms;
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let calls = sorted.len() as u64;
                DependencyEdgeMinute {
                    bucket_ts: key.bucket_ts,
                    env: key.env,
                    caller_service: key.caller_service,
                    callee_service: key.callee_service,
                    caller_version: key.caller_version,
                    callee_version: key.callee_version,
                    calls,
                    error_calls: bucket.error_calls,
                    p50_ms: percentile_of_index(&sorted, 0.50),
                    p95_ms: percentile_of_index(&sorted, 0.95),
                    max_ms: sorted.last().copied().unwrap_or(0.0),
                }
            })
            .collect()
    }
}

fn minute_floor(ts_ms: i64) -> i64 {
    (ts_ms / 60_000) * 60_000
}

/// Index-based percentile: `index = floor((n-1)*p)` on the sorted slice.
fn percentile_of_index(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (((sorted.len() - 1) as f64) * p).floor() as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: &str, service: &str, duration_ms: i64, is_error: bool) -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            service: service.to_string(),
            env: "prod".to_string(),
            host: "h".to_string(),
            version: "1.0".to_string(),
            operation: "op".to_string(),
            start_ts: 0,
            end_ts: duration_ms,
            duration_ms,
            self_time_ms: duration_ms,
            status_code: if is_error { 503 } else { 200 },
            is_error,
            source: "explicit".to_string(),
            updated_at: 0,
        }
    }

    #[test]
    fn test_same_service_edge_is_ignored() {
        let mut acc = EdgeAccumulator::new();
        acc.add_trace(&[span("s1", "", "svc-a", 100, false), span("s2", "s1", "svc-a", 50, false)]);
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn test_cross_service_edge_aggregates() {
        let mut acc = EdgeAccumulator::new();
        acc.add_trace(&[
            span("s1", "", "svc-a", 100, false),
            span("s2", "s1", "svc-b", 60, true),
        ]);
        let edges = acc.finish();
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.caller_service, "svc-a");
        assert_eq!(edge.callee_service, "svc-b");
        assert_eq!(edge.calls, 1);
        assert_eq!(edge.error_calls, 1);
        assert_eq!(edge.p50_ms, 60.0);
    }

    #[test]
    fn test_percentile_of_index() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile_of_index(&sorted, 0.50), 30.0);
        assert_eq!(percentile_of_index(&sorted, 0.95), 50.0);
    }
}
