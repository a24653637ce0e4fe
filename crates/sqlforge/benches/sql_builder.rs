use std::sync::Arc;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sqlforge::{builder, Executor, MutateResult, QueryResult, SqlforgeResult, Value};

/// An executor whose methods are never actually called — these benches only
/// exercise `to_sql()`/`get_parameters()`, which compile the AST without
/// dispatching.
struct NullExecutor;

#[async_trait]
impl Executor for NullExecutor {
    async fn query(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<QueryResult> {
        unreachable!("benches only call to_sql()/get_parameters()")
    }

    async fn mutate(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<MutateResult> {
        unreachable!("benches only call to_sql()/get_parameters()")
    }
}

fn executor() -> Arc<dyn Executor> {
    Arc::new(NullExecutor)
}

/// `SELECT col0, col1, ... FROM t WHERE col0 = ? AND col1 = ? ...`
fn build_select(n: usize) -> sqlforge::QueryBuilder {
    let names: Vec<String> = (0..n).map(|i| format!("col{i}")).collect();
    let columns: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut qb = builder("t", executor()).unwrap().select(&columns).unwrap();
    for (i, col) in columns.iter().enumerate() {
        qb = if i == 0 { qb.where_eq(col, i as i64).unwrap() } else { qb.where_(col, "=", i as i64).unwrap() };
    }
    qb
}

fn bench_to_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/to_sql");
    for n in [1, 5, 10, 50, 100] {
        let qb = build_select(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &qb, |b, qb| {
            b.iter(|| black_box(qb.to_sql().unwrap()));
        });
    }
    group.finish();
}

fn bench_build_and_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/build_and_render");
    for n in [1, 5, 10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let qb = build_select(n);
                black_box(qb.to_sql().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_where_in_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/where_in");
    for n in [5, 20, 100, 500] {
        let values: Vec<i64> = (0..n).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &values, |b, values| {
            b.iter(|| {
                let qb = builder("t", executor()).unwrap().where_in("id", values.clone()).unwrap();
                black_box(qb.to_sql().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_grouped_predicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/grouped_predicates");
    for n in [1, 5, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut qb = builder("t", executor()).unwrap();
                for i in 0..n {
                    let col = format!("col{i}");
                    qb = qb.group(move |q| q.where_eq(&col, i as i64)).unwrap();
                }
                black_box(qb.to_sql().unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_to_sql, bench_build_and_render, bench_where_in_list, bench_grouped_predicates);
criterion_main!(benches);
