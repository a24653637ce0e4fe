//! End-to-end tests against the public API using an in-memory executor —
//! no live MySQL connection required.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlforge::{builder, ChunkControl, Executor, MutateResult, QueryResult, Row, SqlforgeResult, Value};

struct FakeExecutor {
    pages: Mutex<VecDeque<Vec<Row>>>,
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn query(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<QueryResult> {
        let mut pages = self.pages.lock().unwrap();
        Ok(QueryResult { rows: pages.pop_front().unwrap_or_default(), fields: Vec::new() })
    }

    async fn mutate(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<MutateResult> {
        Ok(MutateResult { insert_id: Some(42), affected_rows: 1 })
    }
}

fn row(id: i64, name: &str) -> Row {
    let mut r = Row::new();
    r.insert("id", Value::I64(id));
    r.insert("name", Value::Str(name.to_string()));
    r
}

fn executor_with(pages: Vec<Vec<Row>>) -> Arc<dyn Executor> {
    Arc::new(FakeExecutor { pages: Mutex::new(pages.into()) })
}

#[tokio::test]
async fn get_returns_rows_from_the_executor() {
    let exec = executor_with(vec![vec![row(1, "Ada"), row(2, "Grace")]]);
    let rows = builder("users", exec).unwrap().where_eq("status", "active").unwrap().get().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::Str("Ada".to_string())));
}

#[tokio::test]
async fn first_applies_limit_one_and_returns_single_row() {
    let exec = executor_with(vec![vec![row(1, "Ada")]]);
    let row = builder("users", exec).unwrap().first().await.unwrap();
    assert!(row.is_some());
    assert_eq!(row.unwrap().get("id"), Some(&Value::I64(1)));
}

#[tokio::test]
async fn first_on_empty_result_is_none() {
    let exec = executor_with(vec![vec![]]);
    let row = builder("users", exec).unwrap().first().await.unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn execute_returns_mutate_result() {
    let exec = executor_with(vec![]);
    let result = builder("users", exec)
        .unwrap()
        .insert(vec![("name", sqlforge::ast::MutationValue::val("Ada"))])
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(result.affected_rows, 1);
    assert_eq!(result.insert_id, Some(42));
}

#[tokio::test]
async fn chunk_stops_on_short_page() {
    let exec = executor_with(vec![vec![row(1, "a"), row(2, "b")], vec![row(3, "c")]]);
    let mut calls = 0usize;
    builder("users", exec)
        .unwrap()
        .chunk(2, |rows, _page| {
            calls += 1;
            assert!(!rows.is_empty());
            ChunkControl::Continue
        })
        .await
        .unwrap();
    assert_eq!(calls, 2);
}

#[tokio::test]
async fn chunk_by_id_honors_stop_control() {
    let exec = executor_with(vec![vec![row(1, "a"), row(2, "b")], vec![row(3, "c"), row(4, "d")]]);
    let mut calls = 0usize;
    builder("users", exec)
        .unwrap()
        .chunk_by_id(2, "id", |_rows| {
            calls += 1;
            ChunkControl::Stop
        })
        .await
        .unwrap();
    assert_eq!(calls, 1);
}
