//! Transaction Coordinator (C11).
//!
//! `transaction(pool, cb)` acquires a connection, begins a transaction,
//! and hands the callback a factory closure that mints [`QueryBuilder`]s
//! bound to that single transaction-pinned connection. Every statement
//! issued through those builders is therefore strictly serialized — see
//! [`crate::executor::TxExecutor`]. The transaction commits if `cb`
//! returns `Ok`, and rolls back otherwise; the connection is released on
//! every exit path.

use std::future::Future;
use std::sync::Arc;

use crate::builder::{builder, QueryBuilder};
use crate::error::SqlforgeResult;
use crate::executor::{Executor, TxExecutor};

/// Hands out fresh builders bound to the in-flight transaction.
pub struct TxBuilderFactory {
    executor: Arc<dyn Executor>,
}

impl TxBuilderFactory {
    pub fn table(&self, table: &str) -> SqlforgeResult<QueryBuilder> {
        builder(table, self.executor.clone())
    }
}

/// Runs `cb` inside a single MySQL transaction. Commits on `Ok`, rolls
/// back on `Err`. `cb` receives a [`TxBuilderFactory`], not a raw
/// `sqlx::Transaction` — the spec's data model only ever talks in terms
/// of builders and executors, never driver-level connection types.
pub async fn transaction<F, Fut, T>(pool: &sqlx::MySqlPool, cb: F) -> SqlforgeResult<T>
where
    F: FnOnce(TxBuilderFactory) -> Fut,
    Fut: Future<Output = SqlforgeResult<T>>,
{
    let tx = pool.begin().await.map_err(crate::error::SqlforgeError::from)?;
    #[cfg(feature = "tracing")]
    tracing::info!("sqlforge: transaction begin");

    let executor: Arc<dyn Executor> = Arc::new(TxExecutor { tx: tokio::sync::Mutex::new(tx) });
    let factory = TxBuilderFactory { executor: executor.clone() };

    let result = cb(factory).await;

    let tx_executor = Arc::into_inner(executor)
        .expect("no QueryBuilder may outlive the transaction closure");
    let guard = tx_executor.tx.into_inner();

    match result {
        Ok(value) => {
            guard.commit().await.map_err(crate::error::SqlforgeError::from)?;
            #[cfg(feature = "tracing")]
            tracing::info!("sqlforge: transaction commit");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = guard.rollback().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %rollback_err, "sqlforge: transaction rollback failed");
            } else {
                #[cfg(feature = "tracing")]
                tracing::warn!("sqlforge: transaction rollback");
            }
            Err(err)
        }
    }
}
