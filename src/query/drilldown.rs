use crate::model::{Span, Trace};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct DrilldownSpan {
    pub span_id: String,
    pub parent_span_id: String,
    pub service: String,
    pub operation: String,
    pub depth: u32,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub self_time_ms: i64,
    pub wait_ms: i64,
    pub blocking_ratio: f64,
    pub left_pct: f64,
    pub width_pct: f64,
    pub is_error: bool,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowSpot {
    pub span_id: String,
    pub service: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Drilldown {
    pub spans: Vec<DrilldownSpan>,
    pub critical_path: Vec<String>,
    pub error_chains: Vec<Vec<String>>,
    pub slow_spots: Vec<SlowSpot>,
    pub explanations: Vec<String>,
}

/// Builds the waterfall/drill-down view of one trace's spans: depth, position
/// percentages, the critical path, error ancestor chains, and ranked slow
/// spots.
pub fn build_drilldown(trace: &Trace, spans: &[Span]) -> Drilldown {
    if spans.is_empty() {
        return Drilldown {
            spans: Vec::new(),
            critical_path: Vec::new(),
            error_chains: Vec::new(),
            slow_spots: Vec::new(),
            explanations: Vec::new(),
        };
    }

    let by_id: HashMap<&str, &Span> = spans.iter().map(|s| (s.span_id.as_str(), s)).collect();
    let mut children: HashMap<&str, Vec<&Span>> = HashMap::new();
    for s in spans {
        children.entry(s.parent_span_id.as_str()).or_default().push(s);
    }
    for list in children.values_mut() {
        list.sort_by_key(|s| s.start_ts);
    }

    let ids: std::collections::HashSet<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
    let mut roots: Vec<&Span> = spans
        .iter()
        .filter(|s| s.parent_span_id.is_empty() || !ids.contains(s.parent_span_id.as_str()))
        .collect();
    roots.sort_by_key(|s| s.start_ts);
    if roots.is_empty() {
        roots = spans.iter().collect();
    }

    let total_ms = (trace.end_ts - trace.start_ts).max(1) as f64;
    let mut depths: HashMap<&str, u32> = HashMap::new();
    let mut order: Vec<&Span> = Vec::new();
    for root in &roots {
        walk_preorder(root, &children, 0, &mut depths, &mut order);
    }

    let mut spans_out = Vec::with_capacity(order.len());
    for span in &order {
        let wait_ms = (span.duration_ms - span.self_time_ms).max(0);
        let blocking_ratio = if span.duration_ms > 0 {
            wait_ms as f64 / span.duration_ms as f64
        } else {
            0.0
        };

        spans_out.push(DrilldownSpan {
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            service: span.service.clone(),
            operation: span.operation.clone(),
            depth: depths.get(span.span_id.as_str()).copied().unwrap_or(0),
            start_ts: span.start_ts,
            end_ts: span.end_ts,
            duration_ms: span.duration_ms,
            self_time_ms: span.self_time_ms,
            wait_ms,
            blocking_ratio,
            left_pct: (span.start_ts - trace.start_ts) as f64 / total_ms * 100.0,
            width_pct: ((span.duration_ms as f64 / total_ms) * 100.0).max(0.8),
            is_error: span.is_error,
            is_critical: false,
        });
    }

    let critical_path = critical_path_ids(&roots, &children);
    let critical_set: std::collections::HashSet<&str> = critical_path.iter().map(|s| s.as_str()).collect();
    for span in spans_out.iter_mut() {
        span.is_critical = critical_set.contains(span.span_id.as_str());
    }

    let error_chains = spans
        .iter()
        .filter(|s| s.is_error)
        .map(|s| ancestor_chain(s, &by_id))
        .collect();

    let max_wait = spans_out.iter().map(|s| s.wait_ms).max().unwrap_or(0).max(1) as f64;
    let mut slow_spots: Vec<SlowSpot> = spans_out
        .iter()
        .map(|s| SlowSpot {
            span_id: s.span_id.clone(),
            service: s.service.clone(),
            score: 0.6 * (s.wait_ms as f64 / max_wait) + 0.4 * s.blocking_ratio,
        })
        .collect();
    slow_spots.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    slow_spots.truncate(10);

    let explanations = spans
        .iter()
        .map(|s| explain_span(s, &children))
        .collect();

    Drilldown {
        spans: spans_out,
        critical_path,
        error_chains,
        slow_spots,
        explanations,
    }
}

fn walk_preorder<'a>(
    span: &'a Span,
    children: &HashMap<&'a str, Vec<&'a Span>>,
    depth: u32,
    depths: &mut HashMap<&'a str, u32>,
    order: &mut Vec<&'a Span>,
) {
    depths.insert(span.span_id.as_str(), depth);
    order.push(span);
    if let Some(kids) = children.get(span.span_id.as_str()) {
        for child in kids {
            walk_preorder(child, children, depth + 1, depths, order);
        }
    }
}

/// Descends from the root with the earliest start, repeatedly choosing the
/// child with the latest end time, until a leaf is reached.
fn critical_path_ids<'a>(roots: &[&'a Span], children: &HashMap<&'a str, Vec<&'a Span>>) -> Vec<String> {
    let Some(mut current) = roots.iter().min_by_key(|s| s.start_ts).copied() else {
        return Vec::new();
    };

    let mut path = vec![current.span_id.clone()];
    let mut visited = std::collections::HashSet::new();
    visited.insert(current.span_id.as_str());

    loop {
        let next = children
            .get(current.span_id.as_str())
            .into_iter()
            .flatten()
            .filter(|c| !visited.contains(c.span_id.as_str()))
            .max_by_key(|c| c.end_ts);
        match next {
            Some(next) => {
                path.push(next.span_id.clone());
                visited.insert(next.span_id.as_str());
                current = next;
            }
            None => break,
        }
    }
    path
}

fn ancestor_chain(span: &Span, by_id: &HashMap<&str, &Span>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = Some(span);
    let mut visited = std::collections::HashSet::new();
    while let Some(s) = current {
        if !visited.insert(s.span_id.as_str()) {
            break;
        }
        chain.push(format!("{}({})", s.service, s.span_id));
        current = by_id.get(s.parent_span_id.as_str()).copied();
    }
    chain.reverse();
    chain
}

fn explain_span(span: &Span, children: &HashMap<&str, Vec<&Span>>) -> String {
    let waiting = (span.duration_ms - span.self_time_ms).max(0);
    let longest_child = children
        .get(span.span_id.as_str())
        .into_iter()
        .flatten()
        .max_by_key(|c| c.duration_ms);

    match longest_child {
        Some(child) => format!(
            "{} total:{}ms self:{}ms waiting:{}ms [on {}({}ms)]",
            span.service, span.duration_ms, span.self_time_ms, waiting, child.service, child.duration_ms
        ),
        None => format!(
            "{} total:{}ms self:{}ms waiting:{}ms",
            span.service, span.duration_ms, span.self_time_ms, waiting
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: &str, service: &str, start: i64, end: i64, is_error: bool) -> Span {
        let duration = end - start;
        Span {
            trace_id: "t1".to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            service: service.to_string(),
            env: "prod".to_string(),
            host: "h".to_string(),
            version: "1.0".to_string(),
            operation: "op".to_string(),
            start_ts: start,
            end_ts: end,
            duration_ms: duration,
            self_time_ms: duration / 2,
            status_code: if is_error { 500 } else { 200 },
            is_error,
            source: "explicit".to_string(),
            updated_at: 0,
        }
    }

    fn trace(start: i64, end: i64) -> Trace {
        Trace {
            trace_id: "t1".to_string(),
            env: "prod".to_string(),
            root_service: "svc-a".to_string(),
            start_ts: start,
            end_ts: end,
            duration_ms: end - start,
            span_count: 0,
            service_count: 0,
            error_count: 0,
            critical_path_ms: 0,
            versions: vec![],
        }
    }

    #[test]
    fn test_drilldown_assigns_depth() {
        let spans = vec![
            span("s1", "", "svc-a", 0, 100, false),
            span("s2", "s1", "svc-b", 10, 80, false),
        ];
        let d = build_drilldown(&trace(0, 100), &spans);
        assert_eq!(d.spans.iter().find(|s| s.span_id == "s1").unwrap().depth, 0);
        assert_eq!(d.spans.iter().find(|s| s.span_id == "s2").unwrap().depth, 1);
    }

    #[test]
    fn test_critical_path_follows_latest_end() {
        let spans = vec![
            span("s1", "", "svc-a", 0, 100, false),
            span("s2", "s1", "svc-b", 0, 40, false),
            span("s3", "s1", "svc-c", 0, 90, false),
        ];
        let d = build_drilldown(&trace(0, 100), &spans);
        assert_eq!(d.critical_path, vec!["s1".to_string(), "s3".to_string()]);
    }

    #[test]
    fn test_error_chain_includes_ancestors() {
        let spans = vec![
            span("s1", "", "svc-a", 0, 100, false),
            span("s2", "s1", "svc-b", 0, 40, true),
        ];
        let d = build_drilldown(&trace(0, 100), &spans);
        assert_eq!(d.error_chains, vec![vec!["svc-a(s1)".to_string(), "svc-b(s2)".to_string()]]);
    }
}
