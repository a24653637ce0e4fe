//! Post-Processor (C8): runs after every SELECT dispatch, before rows
//! reach the caller. Casts aggregate scalars, invokes the relation
//! hydrator (C9), then strips any bookkeeping columns the compiler
//! added to support hydration but the caller never asked to see.

use std::sync::Arc;

use crate::ast::{AggregateKind, AggregateSpec, RelationSpec};
use crate::error::SqlforgeResult;
use crate::executor::{Executor, Row};
use crate::value::Value;

/// `SUM`/`COUNT` come back `NULL` from a correlated subquery with no
/// matching rows; both are coerced to zero. `AVG`/`MIN`/`MAX`/`CUSTOM`
/// are left as `NULL` — there is no well-defined zero for them.
fn cast_aggregate(kind: AggregateKind, value: Value) -> Value {
    match (kind, value) {
        (AggregateKind::Sum | AggregateKind::Count, Value::Null) => Value::I64(0),
        (_, other) => other,
    }
}

pub async fn post_process(
    mut rows: Vec<Row>,
    aggregates: &[AggregateSpec],
    auto_added_columns: &[String],
    relations: &[RelationSpec],
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<Vec<Row>> {
    for row in &mut rows {
        for agg in aggregates {
            if let Some(value) = row.get(&agg.alias).cloned() {
                row.insert(agg.alias.clone(), cast_aggregate(agg.kind, value));
            }
        }
    }

    if !relations.is_empty() {
        crate::hydrate::hydrate_relations(&mut rows, relations, executor).await?;
    }

    if !auto_added_columns.is_empty() {
        for row in &mut rows {
            for col in auto_added_columns {
                row.remove(col);
            }
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AggregateExpr, KeySpec};
    use crate::ident::Ident;
    use crate::test_support::mock_executor;

    fn sum_spec() -> AggregateSpec {
        AggregateSpec {
            kind: AggregateKind::Sum,
            related_table: Ident::validate("transactions", "TABLE").unwrap(),
            foreign_key: KeySpec::Single(Ident::validate("user_id", "AGGREGATE").unwrap()),
            local_key: KeySpec::Single(Ident::validate("id", "AGGREGATE").unwrap()),
            expr: AggregateExpr::Column(Ident::validate("amount", "AGGREGATE").unwrap()),
            alias: "total".to_string(),
            filter: None,
        }
    }

    #[tokio::test]
    async fn null_sum_is_cast_to_zero() {
        let mut row = Row::new();
        row.insert("total", Value::Null);
        let executor = mock_executor();
        let out = post_process(vec![row], &[sum_spec()], &[], &[], &executor).await.unwrap();
        assert_eq!(out[0].get("total"), Some(&Value::I64(0)));
    }

    #[tokio::test]
    async fn auto_added_columns_are_stripped() {
        let mut row = Row::new();
        row.insert("id", Value::I64(1));
        row.insert("user_id", Value::I64(7));
        let executor = mock_executor();
        let out = post_process(vec![row], &[], &["user_id".to_string()], &[], &executor).await.unwrap();
        assert!(!out[0].contains_column("user_id"));
        assert!(out[0].contains_column("id"));
    }
}
