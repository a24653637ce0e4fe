//! Mock [`Executor`] (C16) for exercising the builder, hydrator, and chunk
//! driver without a live MySQL connection. Test-only; not part of the
//! public API.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SqlforgeResult;
use crate::executor::{Executor, MutateResult, QueryResult, Row};
use crate::value::Value;

/// One canned response to the next `query()` call.
pub struct MockPage {
    rows: Vec<Row>,
}

impl MockPage {
    /// Builds one single-column row per `(column, value)` pair.
    pub fn rows(pairs: Vec<(&str, Value)>) -> Self {
        MockPage {
            rows: pairs
                .into_iter()
                .map(|(col, val)| {
                    let mut row = Row::new();
                    row.insert(col, val);
                    row
                })
                .collect(),
        }
    }

    pub fn multi_column(rows: Vec<Vec<(&str, Value)>>) -> Self {
        MockPage {
            rows: rows
                .into_iter()
                .map(|cols| {
                    let mut row = Row::new();
                    for (c, v) in cols {
                        row.insert(c, v);
                    }
                    row
                })
                .collect(),
        }
    }

    pub fn empty() -> Self {
        MockPage { rows: Vec::new() }
    }
}

struct MockExecutor {
    pages: Mutex<VecDeque<MockPage>>,
}

#[async_trait]
impl Executor for MockExecutor {
    async fn query(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<QueryResult> {
        let mut pages = self.pages.lock().await;
        let page = pages.pop_front().unwrap_or_else(MockPage::empty);
        Ok(QueryResult { rows: page.rows, fields: Vec::new() })
    }

    async fn mutate(&self, _sql: &str, _params: Vec<Value>) -> SqlforgeResult<MutateResult> {
        Ok(MutateResult { insert_id: Some(1), affected_rows: 1 })
    }
}

/// An executor that always returns an empty result set — enough for tests
/// that only inspect `to_sql()`/`get_parameters()`.
pub fn mock_executor() -> Arc<dyn Executor> {
    Arc::new(MockExecutor { pages: Mutex::new(VecDeque::new()) })
}

/// An executor that returns `pages` in order, one per `query()` call, then
/// empty results once exhausted.
pub fn mock_executor_with_pages(pages: Vec<MockPage>) -> Arc<dyn Executor> {
    Arc::new(MockExecutor { pages: Mutex::new(pages.into()) })
}
