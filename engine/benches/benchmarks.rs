//! Performance benchmarks for converge-engine

use chrono::{DateTime, Utc};
use converge_engine::{
    Document, Entity, LastWriteWins, MergeAlgorithm, ShallowMerge, TypeRegistry, Version,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    id: String,
    name: String,
    email: Option<String>,
    age: Option<i64>,
}

impl Entity for Account {
    const KIND: &'static str = "account";

    fn identity(&self) -> &str {
        &self.id
    }
}

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

fn stored_version(id: &str, side: &str, millis: i64, entity: serde_json::Value) -> Version {
    Version::stored(
        Document::new(id, "account", entity, side, at(millis)),
        format!("1-{side}"),
    )
}

fn conflict_set(count: i64) -> (Version, Vec<Version>) {
    let latest = stored_version("account-1", "side-0", 0, json!({"id": "account-1", "n": 0}));
    let conflicts = (1..=count)
        .map(|i| {
            stored_version(
                "account-1",
                &format!("side-{i}"),
                i * 1_000,
                json!({"id": "account-1", "n": i, (format!("field{i}")): i}),
            )
        })
        .collect();
    (latest, conflicts)
}

fn bench_version_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("version_operations");

    let account = Account {
        id: "account-1".to_string(),
        name: "Test Account".to_string(),
        email: Some("test@example.com".to_string()),
        age: Some(30),
    };

    group.bench_function("candidate_from_entity", |b| {
        b.iter(|| Version::candidate(black_box(&account), black_box("side-a"), at(1_000)))
    });

    group.bench_function("to_document", |b| {
        let version = Version::candidate(&account, "side-a", at(1_000)).unwrap();
        b.iter(|| black_box(&version).to_document())
    });

    group.bench_function("entity_decode", |b| {
        let version = Version::candidate(&account, "side-a", at(1_000)).unwrap();
        b.iter(|| black_box(&version).entity_as::<Account>())
    });

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [2i64, 8, 32].iter() {
        group.bench_with_input(
            BenchmarkId::new("last_write_wins", size),
            size,
            |b, &size| {
                let (latest, conflicts) = conflict_set(size);
                b.iter(|| LastWriteWins.merge(black_box(&latest), black_box(&conflicts)))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("shallow_merge", size),
            size,
            |b, &size| {
                let (latest, conflicts) = conflict_set(size);
                b.iter(|| ShallowMerge.merge(black_box(&latest), black_box(&conflicts)))
            },
        );
    }

    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let registry = TypeRegistry::new().with_kind::<Account>();
    let payload = json!({
        "id": "account-1",
        "name": "Test Account",
        "email": "test@example.com",
        "age": 30,
    });

    group.bench_function("decode_typed", |b| {
        b.iter(|| registry.decode(black_box("account"), black_box(&payload)))
    });

    group.bench_function("lookup", |b| {
        b.iter(|| registry.get(black_box("account")))
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    group.bench_function("document_to_json", |b| {
        let document = Document::new(
            "account-1",
            "account",
            json!({"id": "account-1", "name": "Test Account", "age": 30}),
            "side-a",
            at(1_000),
        );

        b.iter(|| serde_json::to_string(black_box(&document)))
    });

    group.bench_function("document_from_json", |b| {
        let json = r#"{"id":"account-1","kind":"account","entity":{"id":"account-1","name":"Test Account"},"side":"side-a","modified":"2024-01-01T00:00:00Z"}"#;

        b.iter(|| serde_json::from_str::<Document>(black_box(json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_version_operations,
    bench_merge,
    bench_registry,
    bench_serialization,
);
criterion_main!(benches);
