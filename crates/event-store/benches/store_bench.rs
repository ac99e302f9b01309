use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, AggregateUpdate, CommandParamsRecord, DomainEventRecord, DurableStore,
    InMemoryDurableStore, NewAggregate, RecordQuery, StoreTransaction, Version,
};

fn make_record(aggregate_id: AggregateId, version: i64, command_id: &str) -> DomainEventRecord {
    DomainEventRecord::builder()
        .aggregate_type("Counter")
        .aggregate_id(aggregate_id)
        .aggregate_version(Version::new(version))
        .command_type("IncrementCounter")
        .command_params(CommandParamsRecord::new(command_id))
        .event_type("Incremented")
        .event_data_raw(serde_json::json!({"by": 1}))
        .try_build()
        .unwrap()
}

async fn seed(store: &InMemoryDurableStore, records_per_aggregate: i64) -> AggregateId {
    let mut tx = store.begin().await.unwrap();
    let id = tx
        .add_aggregate(
            NewAggregate::from_state("Counter", Version::first(), &serde_json::json!({"value": 0}))
                .unwrap(),
        )
        .await
        .unwrap();
    let records: Vec<_> = (1..=records_per_aggregate)
        .map(|v| make_record(id, v, &format!("cmd-{v}")))
        .collect();
    tx.add_records(&records).await.unwrap();
    tx.commit().await.unwrap();
    id
}

fn bench_commit_new_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_new_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryDurableStore::new();
                seed(&store, 1).await;
            });
        });
    });
}

fn bench_commit_guarded_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_guarded_update", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryDurableStore::new();
                let id = seed(&store, 1).await;

                let mut tx = store.begin().await.unwrap();
                tx.update_aggregate(
                    AggregateUpdate::from_state(
                        "Counter",
                        id,
                        Version::first(),
                        Version::new(2),
                        &serde_json::json!({"value": 1}),
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
                tx.add_records(&[make_record(id, 2, "inc")]).await.unwrap();
                tx.commit().await.unwrap();
            });
        });
    });
}

fn bench_idempotency_lookup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryDurableStore::new();

    // 10 aggregates with 100 records each
    rt.block_on(async {
        for _ in 0..10 {
            seed(&store, 100).await;
        }
    });

    let query = RecordQuery::idempotency_key("Counter", None, "IncrementCounter", "missing");

    c.bench_function("store/record_exists_miss_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                assert!(!store.record_exists(&query).await.unwrap());
            });
        });
    });
}

fn bench_unpublished_scan(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryDurableStore::new();

    rt.block_on(async {
        for _ in 0..10 {
            seed(&store, 100).await;
        }
    });

    c.bench_function("store/unpublished_scan_limit_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let records = store
                    .query_records(&RecordQuery::unpublished().limit(100))
                    .await
                    .unwrap();
                assert_eq!(records.len(), 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_commit_new_aggregate,
    bench_commit_guarded_update,
    bench_idempotency_lookup,
    bench_unpublished_scan,
);
criterion_main!(benches);
