use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use materialflow_core::{AccountId, RecordId};
use materialflow_feeds::{Collection, RawDocument};
use materialflow_infra::{PublishedState, Session};
use materialflow_usage::{aggregate, MaterialRecord, RecordDecoder, SourceRecord};
use serde_json::json;

const MATERIALS: [&str; 12] = [
    "Paint", "Tape", "Brush", "Roller", "Drywall Screws", "Joint Compound",
    "Caulk", "Grout", "Tile", "Lag Bolt", "Stain", "Primer",
];
const CATEGORIES: [&str; 4] = ["Kitchen Remodel", "Bath", "Deck", "Garage"];

/// Deterministic work orders with 3-5 materials each.
fn generate_records(count: usize) -> Vec<SourceRecord> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    (0..count)
        .map(|i| {
            let lines = 3 + i % 3;
            let materials = (0..lines)
                .map(|j| {
                    let name = MATERIALS[(i * 7 + j * 5) % MATERIALS.len()];
                    MaterialRecord::new(name, (j + 1) as f64, 2.5 * (i % 10) as f64).with_unit("each")
                })
                .collect();
            SourceRecord::work_order(
                RecordId::new(format!("wo-{i}")).unwrap(),
                CATEGORIES[i % CATEGORIES.len()],
                Some(base + Duration::hours(i as i64)),
                materials,
            )
        })
        .collect()
}

fn generate_documents(count: usize) -> Vec<RawDocument> {
    (0..count)
        .map(|i| {
            let materials: Vec<_> = (0..4)
                .map(|j| {
                    json!({
                        "name": MATERIALS[(i + j) % MATERIALS.len()],
                        "quantity": j + 1,
                        "unitCost": "12.5",
                        "unit": "box"
                    })
                })
                .collect();
            // Every 50th document is malformed.
            let category = if i % 50 == 0 { json!(42) } else { json!(CATEGORIES[i % 4]) };
            RawDocument::from_value(
                RecordId::new(format!("wo-{i}")).unwrap(),
                json!({
                    "category": category,
                    "dateCreated": "2024-05-01T08:00:00Z",
                    "materials": materials
                }),
            )
        })
        .collect()
}

fn bench_aggregation_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation_pass");

    for record_count in [100, 1000, 10000].iter() {
        let work_orders = generate_records(*record_count);
        let billing: Vec<SourceRecord> = generate_records(*record_count / 4);

        group.throughput(Throughput::Elements((work_orders.len() + billing.len()) as u64));
        group.bench_with_input(
            BenchmarkId::new("aggregate", record_count),
            record_count,
            |b, _| {
                b.iter(|| black_box(aggregate(black_box(&work_orders), black_box(&billing))));
            },
        );
    }

    group.finish();
}

fn bench_snapshot_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_decode");

    for doc_count in [100, 1000].iter() {
        let documents = generate_documents(*doc_count);

        group.throughput(Throughput::Elements(*doc_count as u64));
        group.bench_with_input(
            BenchmarkId::new("first_delivery", doc_count),
            doc_count,
            |b, _| {
                b.iter(|| {
                    let mut decoder = RecordDecoder::new();
                    black_box(decoder.decode_snapshot(Collection::WorkOrders, &documents, Utc::now()))
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("repeat_delivery_with_quarantine", doc_count),
            doc_count,
            |b, _| {
                let mut decoder = RecordDecoder::new();
                decoder.decode_snapshot(Collection::WorkOrders, &documents, Utc::now());
                b.iter(|| {
                    black_box(decoder.decode_snapshot(Collection::WorkOrders, &documents, Utc::now()))
                });
            },
        );
    }

    group.finish();
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.sample_size(1000);

    let snapshot = aggregate(&generate_records(1000), &[]);

    group.bench_function("publish_and_read_latest", |b| {
        let state = PublishedState::new();
        let session = Session::start(AccountId::new("bench").unwrap());
        state.activate(&session);
        let mut sequence = 0u64;

        b.iter(|| {
            sequence += 1;
            state.publish(session.id(), sequence, snapshot.clone()).unwrap();
            black_box(state.latest());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_aggregation_pass,
    bench_snapshot_decode,
    bench_publish
);
criterion_main!(benches);
