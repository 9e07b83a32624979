//! Criterion benchmarks for the trace reconstruction hot path: per-span
//! finalization and critical-path computation over a reconstructed trace.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trace_lite::model::{Span, SpanSource};
use trace_lite::reconstruct::critical_path_ms;

fn make_chain(depth: usize) -> Vec<Span> {
    (0..depth)
        .map(|i| Span {
            trace_id: "bench-trace".to_string(),
            span_id: format!("span-{i}"),
            parent_span_id: if i == 0 {
                String::new()
            } else {
                format!("span-{}", i - 1)
            },
            service: "checkout".to_string(),
            env: "prod".to_string(),
            host: "host-1".to_string(),
            version: "1.4.2".to_string(),
            operation: "handle".to_string(),
            start_ts: (i as i64) * 10,
            end_ts: (i as i64) * 10 + 10,
            duration_ms: 10,
            self_time_ms: 10,
            status_code: 200,
            is_error: false,
            source: SpanSource::Explicit.as_str().to_string(),
            updated_at: 0,
        })
        .collect()
}

fn make_fanout(width: usize) -> Vec<Span> {
    let mut spans = vec![Span {
        trace_id: "bench-trace".to_string(),
        span_id: "root".to_string(),
        parent_span_id: String::new(),
        service: "gateway".to_string(),
        env: "prod".to_string(),
        host: "host-1".to_string(),
        version: "1.4.2".to_string(),
        operation: "route".to_string(),
        start_ts: 0,
        end_ts: 5,
        duration_ms: 5,
        self_time_ms: 5,
        status_code: 200,
        is_error: false,
        source: SpanSource::Explicit.as_str().to_string(),
        updated_at: 0,
    }];
    spans.extend((0..width).map(|i| Span {
        trace_id: "bench-trace".to_string(),
        span_id: format!("child-{i}"),
        parent_span_id: "root".to_string(),
        service: "downstream".to_string(),
        env: "prod".to_string(),
        host: "host-1".to_string(),
        version: "1.4.2".to_string(),
        operation: "call".to_string(),
        start_ts: 5,
        end_ts: 5 + (i as i64 % 50),
        duration_ms: i as i64 % 50,
        self_time_ms: i as i64 % 50,
        status_code: 200,
        is_error: false,
        source: SpanSource::Explicit.as_str().to_string(),
        updated_at: 0,
    }));
    spans
}

fn bench_critical_path_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("critical_path_chain");
    for depth in [10usize, 100, 1_000] {
        let spans = make_chain(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &spans, |b, spans| {
            b.iter(|| black_box(critical_path_ms(spans)));
        });
    }
    group.finish();
}

fn bench_critical_path_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("critical_path_fanout");
    for width in [10usize, 100, 1_000] {
        let spans = make_fanout(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &spans, |b, spans| {
            b.iter(|| black_box(critical_path_ms(spans)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_critical_path_chain, bench_critical_path_fanout);
criterion_main!(benches);
