//! Chunk Driver (C10): iterates a SELECT in bounded-size pages without
//! loading the full result set into memory at once.
//!
//! Both strategies repeatedly re-run the underlying query with a
//! narrower WHERE/ORDER BY/LIMIT — the driver owns no cursor or
//! server-side state, matching the "plain repeated SELECT" execution
//! model the rest of the compiler assumes.

use crate::ast::QueryAst;
use crate::builder::QueryBuilder;
use crate::error::SqlforgeResult;
use crate::executor::Row;
use crate::value::Value;

/// Returned from a chunk callback to continue or stop iteration early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Stop,
}

fn reissue(base: &QueryAst, executor: &std::sync::Arc<dyn crate::executor::Executor>) -> QueryBuilder {
    QueryBuilder::from_parts(base.clone(), executor.clone())
}

/// Offset-based chunking: page `n` is `LIMIT size OFFSET n * size`.
/// Stops when a page returns fewer than `size` rows (including zero), or
/// when the callback returns [`ChunkControl::Stop`]. A result set whose
/// size is an exact multiple of `size` issues one extra, empty-result
/// query to detect the boundary.
pub async fn chunk<F>(builder: QueryBuilder, size: u64, mut cb: F) -> SqlforgeResult<()>
where
    F: FnMut(Vec<Row>, u64) -> ChunkControl + Send,
{
    let base = builder.ast.clone();
    let executor = builder.executor.clone();
    let mut page: u64 = 0;

    loop {
        let offset = page * size;
        let mut qb = reissue(&base, &executor);
        qb = qb.limit(size as i64)?.offset(offset as i64)?;
        let rows = qb.get().await?;
        let returned = rows.len() as u64;
        if returned == 0 {
            break;
        }
        if cb(rows, page) == ChunkControl::Stop {
            break;
        }
        if returned < size {
            break;
        }
        page += 1;
    }
    Ok(())
}

/// Key-based chunking: pages are bounded by a strictly-increasing key
/// column rather than an offset, so rows inserted between pages cannot
/// shift an unseen row past the cursor. The key column must be present
/// in every returned row.
pub async fn chunk_by_id<F>(builder: QueryBuilder, size: u64, key_column: &str, mut cb: F) -> SqlforgeResult<()>
where
    F: FnMut(Vec<Row>) -> ChunkControl + Send,
{
    let mut base = builder.ast.clone();
    let executor = builder.executor.clone();
    let mut last_key: Option<Value> = None;

    // §4.7: ensure `ORDER BY key_column ASC` exists as the (sole) sort —
    // the cursor below only corresponds to row order if `key_column ASC`
    // is what actually determines it, so any caller-supplied ordering is
    // replaced rather than appended to.
    base.order_by = vec![(crate::ident::Ident::validate(key_column, "CHUNK BY ID")?, "ASC")];

    loop {
        let mut qb = reissue(&base, &executor).limit(size as i64)?;
        if let Some(key) = last_key.clone() {
            qb = qb.where_(key_column, ">", key)?;
        }
        let rows = qb.get().await?;
        let returned = rows.len() as u64;
        if returned == 0 {
            break;
        }
        last_key = rows.last().and_then(|r| r.get(key_column).cloned());
        let should_stop = cb(rows) == ChunkControl::Stop;
        if should_stop || returned < size || last_key.is_none() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_executor_with_pages, MockPage};

    #[tokio::test]
    async fn offset_chunk_stops_on_short_page() {
        let pages = vec![
            MockPage::rows(vec![("id", Value::I64(1)), ("id", Value::I64(2))]),
            MockPage::rows(vec![("id", Value::I64(3))]),
        ];
        let executor = mock_executor_with_pages(pages);
        let qb = crate::builder::builder("items", executor).unwrap();
        let mut seen = Vec::new();
        qb.chunk(2, |rows, page| {
            seen.push((page, rows.len()));
            ChunkControl::Continue
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![(0, 2), (1, 1)]);
    }

    #[tokio::test]
    async fn offset_chunk_exact_multiple_issues_trailing_empty_query() {
        let pages = vec![
            MockPage::rows(vec![("id", Value::I64(1)), ("id", Value::I64(2))]),
            MockPage::empty(),
        ];
        let executor = mock_executor_with_pages(pages);
        let qb = crate::builder::builder("items", executor).unwrap();
        let mut pages_seen = 0;
        qb.chunk(2, |_, _| {
            pages_seen += 1;
            ChunkControl::Continue
        })
        .await
        .unwrap();
        assert_eq!(pages_seen, 1);
    }

    #[tokio::test]
    async fn chunk_by_id_honors_stop_sentinel() {
        let pages = vec![
            MockPage::rows(vec![("id", Value::I64(1)), ("id", Value::I64(2))]),
            MockPage::rows(vec![("id", Value::I64(3)), ("id", Value::I64(4))]),
        ];
        let executor = mock_executor_with_pages(pages);
        let qb = crate::builder::builder("items", executor).unwrap();
        let mut batches = 0;
        qb.chunk_by_id(2, "id", |_rows| {
            batches += 1;
            ChunkControl::Stop
        })
        .await
        .unwrap();
        assert_eq!(batches, 1);
    }
}
