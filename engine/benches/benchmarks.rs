//! Performance benchmarks for keyshelf-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keyshelf_engine::{
    inner_join, left_join, sort_records, DbService, IndexSpec, MergePolicy, OrderBy, Record,
    SelectOptions, SortField, StoreSpec,
};
use serde_json::json;
use tokio::runtime::Runtime;

fn customers(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            json!({
                "CustomerID": i,
                "CustomerName": format!("Customer {}", count - i),
                "Region": i % 7,
            })
        })
        .collect()
}

fn policies(count: usize, customers: usize) -> Vec<Record> {
    (0..count)
        .map(|i| json!({"PolicyID": i, "CustomerID": (i * 31) % customers}))
        .collect()
}

fn store_specs() -> Vec<StoreSpec> {
    vec![StoreSpec::new(
        "Customer",
        vec![
            IndexSpec::unique("CustomerID"),
            IndexSpec::non_unique("CustomerName"),
        ],
    )]
}

fn bench_service(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("service");

    for size in [100, 1000] {
        let svc = rt.block_on(async {
            let svc = DbService::in_memory("bench");
            svc.create_database(1, &store_specs()).await.unwrap();
            svc.store("Customer", json!(customers(size))).await.unwrap();
            svc
        });

        group.bench_with_input(BenchmarkId::new("select_filter_sort", size), &svc, |b, svc| {
            let options = SelectOptions::new()
                .filter(|c| c["Region"] == 3)
                .order_by("CustomerName");
            let options = &options;
            b.to_async(&rt).iter(|| async move {
                black_box(svc.select("Customer", options).await.unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("store_batch", size), &svc, |b, svc| {
            let batch = json!(customers(size));
            let batch = &batch;
            b.to_async(&rt).iter(|| async move {
                black_box(svc.store("Customer", batch.clone()).await.unwrap())
            })
        });
    }

    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");

    for size in [100, 1000, 10000] {
        let records = customers(size);

        group.bench_with_input(BenchmarkId::new("field", size), &records, |b, records| {
            let order = OrderBy::from("CustomerName");
            b.iter(|| {
                let mut records = records.clone();
                sort_records(&mut records, &order, true);
                black_box(records)
            })
        });

        group.bench_with_input(BenchmarkId::new("fields", size), &records, |b, records| {
            let order = OrderBy::Fields(vec![SortField::asc("Region"), SortField::desc("CustomerID")]);
            b.iter(|| {
                let mut records = records.clone();
                sort_records(&mut records, &order, true);
                black_box(records)
            })
        });
    }

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    for size in [100, 1000, 10000] {
        let left = customers(size);
        let right = policies(size * 2, size);

        group.bench_with_input(BenchmarkId::new("inner", size), &size, |b, _| {
            b.iter(|| {
                black_box(inner_join(
                    &left,
                    &right,
                    "CustomerID",
                    Some("CustomerID"),
                    &MergePolicy::Merge,
                ))
            })
        });

        group.bench_with_input(BenchmarkId::new("left", size), &size, |b, _| {
            b.iter(|| {
                black_box(left_join(
                    &left,
                    &right,
                    "CustomerID",
                    Some("CustomerID"),
                    &MergePolicy::LeftOnly,
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_service, bench_sort, bench_join);
criterion_main!(benches);
