//! Executor Adapter (C7): the abstract boundary the compiler dispatches
//! compiled SQL through. Two concrete modes exist — pool-backed (autocommit,
//! a connection acquired and released per call) and transaction-bound (a
//! single pinned connection shared by every statement issued through a
//! [`crate::transaction`] scope).
//!
//! The compiler never touches a connection pool directly; it only ever
//! holds an `Arc<dyn Executor>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SqlforgeResult;
use crate::value::Value;

/// The hydrated value of a registered relation: a single row for
/// `hasOne` (or `None` when no match exists), or a list for `hasMany`
/// (empty when no matches exist — `hasOne`/`hasMany` differ precisely in
/// this null-vs-empty-list convention).
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Option<Row>),
    Many(Vec<Row>),
}

/// A single result row: an order-preserving map from column name to
/// [`Value`], plus a side map of hydrated relations keyed by relation
/// name. Relations are kept separate from scalar columns because their
/// values are structured (nested rows), not bindable scalars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: HashMap<String, Value>,
    relations: HashMap<String, RelationValue>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        if !self.values.contains_key(&column) {
            self.columns.push(column.clone());
        }
        self.values.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.retain(|c| c != column);
        self.values.remove(column)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), value);
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Result of a SELECT dispatch.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub fields: Vec<String>,
}

/// Result of an INSERT/UPDATE/UPSERT/DELETE dispatch.
#[derive(Debug, Clone, Default)]
pub struct MutateResult {
    pub insert_id: Option<u64>,
    pub affected_rows: u64,
}

/// The abstraction the SQL compiler depends on. Implementors own nothing
/// about SQL semantics — they receive fully-compiled text and a positional
/// parameter list and dispatch it to a concrete MySQL connection.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn query(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<QueryResult>;
    async fn mutate(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<MutateResult>;
}

/// Pool-backed executor: acquires a connection per call, releases it on
/// completion.
#[cfg(feature = "pool")]
pub struct PoolExecutor {
    pool: sqlx::MySqlPool,
}

#[cfg(feature = "pool")]
impl PoolExecutor {
    pub fn new(pool: sqlx::MySqlPool) -> Arc<dyn Executor> {
        Arc::new(PoolExecutor { pool })
    }
}

#[cfg(feature = "pool")]
#[async_trait]
impl Executor for PoolExecutor {
    async fn query(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<QueryResult> {
        pool_query(&self.pool, sql, params).await
    }

    async fn mutate(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<MutateResult> {
        pool_mutate(&self.pool, sql, params).await
    }
}

/// Transaction-bound executor: every statement dispatched through it shares
/// the single pinned connection acquired by the Transaction Coordinator
/// (C11), and is therefore strictly serialized — hence the mutex rather
/// than a pool.
#[cfg(feature = "pool")]
pub struct TxExecutor {
    pub(crate) tx: tokio::sync::Mutex<sqlx::Transaction<'static, sqlx::MySql>>,
}

#[cfg(feature = "pool")]
#[async_trait]
impl Executor for TxExecutor {
    async fn query(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<QueryResult> {
        let mut guard = self.tx.lock().await;
        tx_query(&mut guard, sql, params).await
    }

    async fn mutate(&self, sql: &str, params: Vec<Value>) -> SqlforgeResult<MutateResult> {
        let mut guard = self.tx.lock().await;
        tx_mutate(&mut guard, sql, params).await
    }
}

#[cfg(feature = "pool")]
fn bind_args(params: Vec<Value>) -> SqlforgeResult<sqlx::mysql::MySqlArguments> {
    let mut args = sqlx::mysql::MySqlArguments::default();
    for p in params {
        p.bind(&mut args)
            .map_err(|e| crate::error::SqlforgeError::emission(e.to_string()))?;
    }
    Ok(args)
}

#[cfg(feature = "pool")]
fn row_from_mysql(row: &sqlx::mysql::MySqlRow) -> SqlforgeResult<Row> {
    use sqlx::{Column, Row as _, TypeInfo, ValueRef};

    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(|e| crate::error::SqlforgeError::Execution(
            crate::error::ExecutionError::Decode(e.to_string()),
        ))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    Value::I64(row.try_get::<i64, _>(i).unwrap_or_default())
                }
                "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED"
                | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
                    Value::U64(row.try_get::<u64, _>(i).unwrap_or_default())
                }
                "FLOAT" | "DOUBLE" | "DECIMAL" => {
                    Value::F64(row.try_get::<f64, _>(i).unwrap_or_default())
                }
                "BOOLEAN" | "BOOL" => Value::Bool(row.try_get::<bool, _>(i).unwrap_or_default()),
                "BLOB" | "VARBINARY" | "BINARY" => {
                    Value::Bytes(row.try_get::<Vec<u8>, _>(i).unwrap_or_default())
                }
                _ => Value::Str(row.try_get::<String, _>(i).unwrap_or_default()),
            }
        };
        out.insert(col.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(feature = "pool")]
async fn pool_query(
    pool: &sqlx::MySqlPool,
    sql: &str,
    params: Vec<Value>,
) -> SqlforgeResult<QueryResult> {
    use sqlx::Executor as _;
    let args = bind_args(params)?;
    let query = sqlx::query_with(sql, args);
    let mysql_rows = pool.fetch_all(query).await?;
    let mut fields = Vec::new();
    let mut rows = Vec::with_capacity(mysql_rows.len());
    for r in &mysql_rows {
        let row = row_from_mysql(r)?;
        if fields.is_empty() {
            fields = row.columns().to_vec();
        }
        rows.push(row);
    }
    Ok(QueryResult { rows, fields })
}

#[cfg(feature = "pool")]
async fn pool_mutate(
    pool: &sqlx::MySqlPool,
    sql: &str,
    params: Vec<Value>,
) -> SqlforgeResult<MutateResult> {
    use sqlx::Executor as _;
    let args = bind_args(params)?;
    let query = sqlx::query_with(sql, args);
    let result = pool.execute(query).await?;
    Ok(MutateResult { insert_id: Some(result.last_insert_id()), affected_rows: result.rows_affected() })
}

#[cfg(feature = "pool")]
async fn tx_query(
    tx: &mut sqlx::Transaction<'static, sqlx::MySql>,
    sql: &str,
    params: Vec<Value>,
) -> SqlforgeResult<QueryResult> {
    let args = bind_args(params)?;
    let query = sqlx::query_with(sql, args);
    let mysql_rows = query.fetch_all(&mut **tx).await?;
    let mut fields = Vec::new();
    let mut rows = Vec::with_capacity(mysql_rows.len());
    for r in &mysql_rows {
        let row = row_from_mysql(r)?;
        if fields.is_empty() {
            fields = row.columns().to_vec();
        }
        rows.push(row);
    }
    Ok(QueryResult { rows, fields })
}

#[cfg(feature = "pool")]
async fn tx_mutate(
    tx: &mut sqlx::Transaction<'static, sqlx::MySql>,
    sql: &str,
    params: Vec<Value>,
) -> SqlforgeResult<MutateResult> {
    let args = bind_args(params)?;
    let query = sqlx::query_with(sql, args);
    let result = query.execute(&mut **tx).await?;
    Ok(MutateResult { insert_id: Some(result.last_insert_id()), affected_rows: result.rows_affected() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_insert_tracks_column_order() {
        let mut row = Row::new();
        row.insert("b", Value::I64(2));
        row.insert("a", Value::I64(1));
        assert_eq!(row.columns(), &["b".to_string(), "a".to_string()]);
        assert_eq!(row.get("a"), Some(&Value::I64(1)));
    }

    #[test]
    fn row_remove_drops_from_columns() {
        let mut row = Row::new();
        row.insert("a", Value::I64(1));
        row.remove("a");
        assert!(!row.contains_column("a"));
        assert!(row.columns().is_empty());
    }
}
