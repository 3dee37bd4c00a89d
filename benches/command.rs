//! Performance benchmarks for a3s-link
//!
//! Run with: cargo bench

use a3s_link::command::{Command, DEFAULT_PREFIX};
use a3s_link::types::MessageBatch;
use a3s_link::{CredentialSnapshot, LinkConfig, LinkService, MemoryCredentialStore, MemoryProvider};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn bench_command_parse(c: &mut Criterion) {
    c.bench_function("Command::parse pair", |b| {
        b.iter(|| Command::parse(DEFAULT_PREFIX, "!pair +1 (555) 123-4567"));
    });

    c.bench_function("Command::parse plain text", |b| {
        b.iter(|| Command::parse(DEFAULT_PREFIX, "good morning, how is everyone today?"));
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let batch = MessageBatch::notify_text("15551234567@s.whatsapp.net", "!status");
    let bytes = serde_json::to_vec(&batch).unwrap();

    c.bench_function("MessageBatch deserialize", |b| {
        b.iter(|| serde_json::from_slice::<MessageBatch>(&bytes).unwrap());
    });
}

fn bench_credential_summary(c: &mut Criterion) {
    let raw = serde_json::to_vec(&serde_json::json!({
        "me": {"id": "15551234567:12@s.whatsapp.net", "name": "Support"},
        "platform": "web",
        "account": {"accountExpiry": 1700000000},
        "noiseKey": {"private": "AAAA", "public": "BBBB"}
    }))
    .unwrap();

    c.bench_function("CredentialSnapshot parse", |b| {
        b.iter(|| CredentialSnapshot::from_bytes(raw.clone()).unwrap());
    });

    let snapshot = CredentialSnapshot::from_bytes(raw.clone()).unwrap();
    c.bench_function("CredentialSnapshot summary", |b| {
        b.iter(|| snapshot.summary("support"));
    });
}

fn bench_session_start(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("session_start");
    for count in [10, 100] {
        group.bench_function(format!("{} sessions", count), |b| {
            b.to_async(&rt).iter(|| async {
                let service = LinkService::from_config(
                    &LinkConfig::default(),
                    Arc::new(MemoryProvider::default()),
                    Arc::new(MemoryCredentialStore::default()),
                );
                for i in 0..count {
                    service
                        .start_session(Some(&format!("session-{}", i)))
                        .await
                        .unwrap();
                }
                service.shutdown().await;
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_command_parse,
    bench_message_decode,
    bench_credential_summary,
    bench_session_start,
);
criterion_main!(benches);
