use super::SpanState;
use crate::model::{Span, SpanSource};
use std::collections::{HashMap, HashSet};

/// Fills in missing timing fields for one span and converts it into the
/// persisted `Span` shape. `children_duration_ms` is the sum of the span's
/// direct children's finalized durations, used to derive self-time.
pub fn finalize_span(
    mut state: SpanState,
    trace_id: &str,
    now_ms: i64,
    children_duration_ms: i64,
    updated_at: i64,
) -> Span {
    if state.start_ts == 0 && state.end_ts != 0 && state.duration_ms > 0 {
        state.start_ts = state.end_ts - state.duration_ms;
        state.inferred = true;
    } else if state.end_ts == 0 && state.start_ts != 0 {
        state.end_ts = if state.duration_ms > 0 {
            state.start_ts + state.duration_ms
        } else {
            state.start_ts
        };
        state.inferred = true;
    } else if state.start_ts == 0 && state.end_ts == 0 {
        state.start_ts = now_ms;
        state.end_ts = now_ms;
        state.inferred = true;
    }

    if state.duration_ms <= 0 {
        state.duration_ms = (state.end_ts - state.start_ts).max(0);
    }

    let self_time_ms = if children_duration_ms > state.duration_ms {
        state.duration_ms
    } else {
        (state.duration_ms - children_duration_ms).max(0)
    };

    Span {
        trace_id: trace_id.to_string(),
        span_id: state.span_id,
        parent_span_id: state.parent_span_id,
        service: state.service,
        env: state.env,
        host: state.host,
        version: state.version,
        operation: state.operation,
        start_ts: state.start_ts,
        end_ts: state.end_ts,
        duration_ms: state.duration_ms,
        self_time_ms,
        status_code: state.status_code,
        is_error: state.is_error,
        source: if state.inferred {
            SpanSource::Inferred.as_str().to_string()
        } else {
            SpanSource::Explicit.as_str().to_string()
        },
        updated_at,
    }
}

/// Computes the trace's critical path length: the longest root-to-leaf sum of
/// span durations over the parent->children DAG. Guards against cycles with a
/// visiting set so malformed input (e.g. two spans listing each other as
/// parent) still terminates.
pub fn critical_path_ms(spans: &[Span]) -> i64 {
    if spans.is_empty() {
        return 0;
    }

    let ids: HashSet<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&Span>> = HashMap::new();
    for s in spans {
        children.entry(s.parent_span_id.as_str()).or_default().push(s);
    }

    let mut roots: Vec<&Span> = spans
        .iter()
        .filter(|s| s.parent_span_id.is_empty() || !ids.contains(s.parent_span_id.as_str()))
        .collect();
    if roots.is_empty() {
        roots = spans.iter().collect();
    }

    let mut memo: HashMap<&str, i64> = HashMap::new();
    roots
        .iter()
        .map(|root| dfs(root, &children, &mut memo, &mut HashSet::new()))
        .max()
        .unwrap_or(0)
}

fn dfs<'a>(
    span: &'a Span,
    children: &HashMap<&'a str, Vec<&'a Span>>,
    memo: &mut HashMap<&'a str, i64>,
    visiting: &mut HashSet<&'a str>,
) -> i64 {
    if let Some(&cached) = memo.get(span.span_id.as_str()) {
        return cached;
    }
    if !visiting.insert(span.span_id.as_str()) {
        return 0;
    }

    let best_child = children
        .get(span.span_id.as_str())
        .into_iter()
        .flatten()
        .map(|child| dfs(child, children, memo, visiting))
        .max()
        .unwrap_or(0);

    visiting.remove(span.span_id.as_str());
    let total = span.duration_ms + best_child;
    memo.insert(span.span_id.as_str(), total);
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: &str, duration_ms: i64) -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            service: "svc".to_string(),
            env: "prod".to_string(),
            host: "h".to_string(),
            version: "1".to_string(),
            operation: "op".to_string(),
            start_ts: 0,
            end_ts: duration_ms,
            duration_ms,
            self_time_ms: duration_ms,
            status_code: 200,
            is_error: false,
            source: "explicit".to_string(),
            updated_at: 0,
        }
    }

    #[test]
    fn test_finalize_infers_start_from_end_and_duration() {
        let state = SpanState {
            span_id: "s1".to_string(),
            end_ts: 1_100,
            duration_ms: 100,
            ..Default::default()
        };
        let span = finalize_span(state, "t1", 2_000, 0, 2_000);
        assert_eq!(span.start_ts, 1_000);
        assert!(span.source == "inferred");
    }

    #[test]
    fn test_finalize_defaults_both_zero_to_now() {
        let state = SpanState {
            span_id: "s1".to_string(),
            ..Default::default()
        };
        let span = finalize_span(state, "t1", 5_000, 0, 5_000);
        assert_eq!(span.start_ts, 5_000);
        assert_eq!(span.end_ts, 5_000);
    }

    #[test]
    fn test_self_time_clamped_when_children_exceed_duration() {
        let state = SpanState {
            span_id: "s1".to_string(),
            start_ts: 0,
            end_ts: 100,
            duration_ms: 100,
            ..Default::default()
        };
        let span = finalize_span(state, "t1", 0, 150, 0);
        assert_eq!(span.self_time_ms, 100);
    }

    #[test]
    fn test_critical_path_single_chain() {
        let spans = vec![span("s1", "", 100), span("s2", "s1", 60)];
        assert_eq!(critical_path_ms(&spans), 160);
    }

    #[test]
    fn test_critical_path_picks_longest_branch() {
        let spans = vec![
            span("s1", "", 100),
            span("s2", "s1", 10),
            span("s3", "s1", 90),
        ];
        assert_eq!(critical_path_ms(&spans), 190);
    }

    #[test]
    fn test_critical_path_handles_cycle() {
        let spans = vec![span("s1", "s2", 40), span("s2", "s1", 30)];
        assert_eq!(critical_path_ms(&spans), 70);
    }
}
