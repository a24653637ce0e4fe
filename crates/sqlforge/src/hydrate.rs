//! Relation Hydrator (C9): two-query eager loading.
//!
//! For each registered relation, one follow-up query fetches every
//! related row whose foreign key matches any parent row's local key —
//! never one query per parent row. Composite keys are matched with an
//! OR-of-AND-tuples fragment instead of a single-column `IN (...)`.

use std::sync::Arc;

use crate::ast::{Conn, PredicateNode, RelationKind, RelationSpec};
use crate::error::SqlforgeResult;
use crate::executor::{Executor, RelationValue, Row};
use crate::value::Value;

pub async fn hydrate_relations(
    rows: &mut [Row],
    relations: &[RelationSpec],
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<()> {
    for spec in relations {
        hydrate_one(rows, spec, executor).await?;
    }
    Ok(())
}

fn key_tuple(row: &Row, columns: &[&crate::ident::Ident]) -> Option<Vec<Value>> {
    let mut tuple = Vec::with_capacity(columns.len());
    for c in columns {
        match row.get(c.as_str()) {
            Some(Value::Null) | None => return None,
            Some(v) => tuple.push(v.clone()),
        }
    }
    Some(tuple)
}

async fn hydrate_one(rows: &mut [Row], spec: &RelationSpec, executor: &Arc<dyn Executor>) -> SqlforgeResult<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let local_cols = spec.local_key.columns();
    let fk_cols = spec.foreign_key.columns();

    let mut key_tuples: Vec<Vec<Value>> = Vec::new();
    for row in rows.iter() {
        if let Some(tuple) = key_tuple(row, &local_cols) {
            if !key_tuples.contains(&tuple) {
                key_tuples.push(tuple);
            }
        }
    }

    let default_empty = |row: &mut Row| match spec.kind {
        RelationKind::HasOne => row.set_relation(&spec.relation_name, RelationValue::One(None)),
        RelationKind::HasMany => row.set_relation(&spec.relation_name, RelationValue::Many(Vec::new())),
    };

    if key_tuples.is_empty() {
        for row in rows.iter_mut() {
            default_empty(row);
        }
        return Ok(());
    }

    let mut qb = crate::builder::builder(spec.related_table.as_str(), executor.clone())?;
    if fk_cols.len() == 1 {
        let values = key_tuples.iter().map(|t| t[0].clone()).collect();
        qb = qb.where_in(fk_cols[0].as_str(), values)?;
    } else {
        let mut fragment = String::new();
        let mut params = Vec::new();
        for (i, tuple) in key_tuples.iter().enumerate() {
            if i > 0 {
                fragment.push_str(" OR ");
            }
            fragment.push('(');
            for (j, col) in fk_cols.iter().enumerate() {
                if j > 0 {
                    fragment.push_str(" AND ");
                }
                fragment.push_str(col.as_str());
                fragment.push_str(" = ?");
                params.push(tuple[j].clone());
            }
            fragment.push(')');
        }
        qb.ast.where_nodes.push(PredicateNode::Raw { sql_fragment: fragment, params, conn: Conn::And });
    }
    if let Some(filter) = &spec.filter {
        qb = filter(qb)?;
    }

    let related_rows = qb.get().await?;

    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for r in related_rows {
        let Some(tuple) = key_tuple(&r, &fk_cols) else { continue };
        if let Some(entry) = groups.iter_mut().find(|(t, _)| *t == tuple) {
            entry.1.push(r);
        } else {
            groups.push((tuple, vec![r]));
        }
    }

    for row in rows.iter_mut() {
        let Some(tuple) = key_tuple(row, &local_cols) else {
            default_empty(row);
            continue;
        };
        let matched = groups
            .iter()
            .find(|(t, _)| *t == tuple)
            .map(|(_, rs)| rs.clone())
            .unwrap_or_default();
        match spec.kind {
            RelationKind::HasOne => row.set_relation(&spec.relation_name, RelationValue::One(matched.into_iter().next())),
            RelationKind::HasMany => row.set_relation(&spec.relation_name, RelationValue::Many(matched)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{KeySpec, RelationKind};
    use crate::ident::Ident;
    use crate::test_support::{mock_executor_with_pages, MockPage};

    fn spec(kind: RelationKind) -> RelationSpec {
        RelationSpec {
            kind,
            related_table: Ident::validate("order_items", "TABLE").unwrap(),
            relation_name: "items".to_string(),
            foreign_key: KeySpec::Single(Ident::validate("order_id", "RELATION").unwrap()),
            local_key: KeySpec::Single(Ident::validate("id", "RELATION").unwrap()),
            filter: None,
        }
    }

    #[tokio::test]
    async fn has_many_groups_related_rows_by_foreign_key() {
        let page = MockPage::multi_column(vec![
            vec![("order_id", Value::I64(1)), ("sku", Value::Str("a".into()))],
            vec![("order_id", Value::I64(1)), ("sku", Value::Str("b".into()))],
            vec![("order_id", Value::I64(2)), ("sku", Value::Str("c".into()))],
        ]);
        let executor = mock_executor_with_pages(vec![page]);

        let mut parent = Row::new();
        parent.insert("id", Value::I64(1));
        let mut other = Row::new();
        other.insert("id", Value::I64(2));
        let mut rows = vec![parent, other];

        hydrate_relations(&mut rows, &[spec(RelationKind::HasMany)], &executor).await.unwrap();

        match rows[0].relation("items").unwrap() {
            RelationValue::Many(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected Many"),
        }
        match rows[1].relation("items").unwrap() {
            RelationValue::Many(items) => assert_eq!(items.len(), 1),
            _ => panic!("expected Many"),
        }
    }

    #[tokio::test]
    async fn has_one_with_no_match_is_none_not_empty() {
        let executor = mock_executor_with_pages(vec![MockPage::empty()]);
        let mut parent = Row::new();
        parent.insert("id", Value::I64(9));
        let mut rows = vec![parent];

        hydrate_relations(&mut rows, &[spec(RelationKind::HasOne)], &executor).await.unwrap();

        assert_eq!(rows[0].relation("items"), Some(&RelationValue::One(None)));
    }
}
