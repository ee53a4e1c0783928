use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cypher_pipeline::consumer::{
    DeadLetterRecord, DeadLetterStore, Message, MessageProcessor, RetryPolicy, TopicRouter,
    UnknownTopicPolicy,
};
use cypher_pipeline::monitor::{
    AnomalyDetector, ServiceCheckResult, ServiceStatus, StatusSnapshot, StatusWindow,
    DEFAULT_WINDOW_CAPACITY,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const SERVICES: [&str; 5] = ["Elasticsearch", "Kafka", "MongoDB", "PostgreSQL", "Redis"];

struct NullStore;

#[async_trait::async_trait]
impl DeadLetterStore for NullStore {
    async fn append(&self, _record: &DeadLetterRecord) -> cypher_pipeline::Result<()> {
        Ok(())
    }
}

// A full window where every fourth cycle spikes and Kafka is down
fn full_window(services: usize) -> StatusWindow {
    let mut window = StatusWindow::new(DEFAULT_WINDOW_CAPACITY);
    for cycle in 0..DEFAULT_WINDOW_CAPACITY {
        let mut status = BTreeMap::new();
        for i in 0..services {
            let name = format!("{}-{}", SERVICES[i % SERVICES.len()], i);
            let result = if name.starts_with("Kafka") {
                ServiceCheckResult::down("no brokers", None)
            } else {
                let latency = if cycle % 4 == 3 { 120.0 } else { 10.0 + i as f64 };
                ServiceCheckResult::completed(ServiceStatus::Healthy, latency, None)
            };
            status.insert(name, result);
        }
        window.push(StatusSnapshot::new(status));
    }
    window
}

fn benchmark_anomaly_detection(c: &mut Criterion) {
    let detector = AnomalyDetector::default();
    let mut group = c.benchmark_group("anomaly_detection");

    for services in [5, 50, 500] {
        let window = full_window(services);
        group.throughput(Throughput::Elements(services as u64));
        group.bench_with_input(BenchmarkId::new("detect", services), &window, |b, window| {
            b.iter(|| black_box(detector.detect(black_box(window))));
        });
    }
    group.finish();
}

fn benchmark_window_push(c: &mut Criterion) {
    let snapshot = full_window(5).latest().cloned().expect("window is full");
    c.bench_function("window_push_evict", |b| {
        let mut window = full_window(5);
        b.iter(|| window.push(black_box(snapshot.clone())));
    });
}

fn benchmark_message_processing(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let processor = MessageProcessor::new(
        TopicRouter::with_default_handlers(UnknownTopicPolicy::Ignore),
        Arc::new(NullStore),
    )
    .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));
    let message = Message::new(
        "user-actions",
        0,
        0,
        json!({"type": "click", "data": {"user_id": 42, "item": "sku-1"}}),
        chrono::Utc::now(),
    );

    c.bench_function("process_with_retry", |b| {
        b.iter(|| black_box(runtime.block_on(processor.process_with_retry(&message))));
    });
}

criterion_group!(
    benches,
    benchmark_anomaly_detection,
    benchmark_window_push,
    benchmark_message_processing
);
criterion_main!(benches);
