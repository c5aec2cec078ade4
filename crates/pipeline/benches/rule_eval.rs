use criterion::{Criterion, black_box, criterion_group, criterion_main};
use logbridge_core::types::{Connection, ProviderKind, RawRecord};
use logbridge_pipeline::dedup::DedupTracker;
use logbridge_pipeline::normalize::normalize_record;
use serde_json::json;

fn bench_normalize(c: &mut Criterion) {
    let connection = Connection::new("proj-bench", ProviderKind::Aws, "blob", 30);
    let record = RawRecord::new(json!({
        "timestamp": 1700000000000i64,
        "message": r#"{"level":"error","msg":"db timeout","service":"checkout"}"#
    }))
    .with_native_id("e-1");

    c.bench_function("normalize_aws_structured", |b| {
        b.iter(|| normalize_record(black_box(&connection), black_box(record.clone())))
    });
}

fn bench_dedup(c: &mut Criterion) {
    let connection = Connection::new("proj-bench", ProviderKind::Gcp, "blob", 30);
    let entries: Vec<_> = (0..1024)
        .map(|i| {
            let record = RawRecord::new(json!({
                "timestamp": "2026-08-01T10:00:00Z",
                "severity": "ERROR",
                "textPayload": format!("message {i}")
            }));
            normalize_record(&connection, record)
        })
        .collect();

    c.bench_function("dedup_insert_1024", |b| {
        b.iter(|| {
            let mut tracker = DedupTracker::new(4096);
            for entry in &entries {
                black_box(tracker.insert(entry));
            }
        })
    });
}

criterion_group!(benches, bench_normalize, bench_dedup);
criterion_main!(benches);
