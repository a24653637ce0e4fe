//! SQL Compiler (C6): walks a [`QueryAst`] and emits SQL text plus an
//! ordered parameter vector.
//!
//! Parameter ordering is strictly textual: parameters contributed by the
//! projection (aggregate subqueries) come first, then WHERE, then HAVING,
//! matching the left-to-right order their `?` placeholders appear in the
//! emitted SQL. `LIMIT`/`OFFSET` are rendered as literal integers, never
//! parameterized (see the end-to-end scenarios in the testable properties).

use std::sync::Arc;

use crate::ast::{
    AggregateExpr, AggregateKind, AggregateSpec, CmpValue, Conn, JoinSpec, MutationValue,
    PredicateNode, ProjectionItem, QueryAst, QueryKind,
};
use crate::error::{SqlforgeError, SqlforgeResult};
use crate::executor::Executor;
use crate::ident::Ident;
use crate::raw::Raw;
use crate::value::Value;

/// The result of compiling a [`QueryAst`]: SQL text, its ordered parameter
/// vector, and (for SELECT) the list of columns the projection expansion
/// added so the post-processor (C8) can strip them before returning rows
/// to the caller.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
    pub auto_added_columns: Vec<String>,
}

pub fn compile(ast: &QueryAst, executor: &Arc<dyn Executor>) -> SqlforgeResult<Compiled> {
    match ast.kind {
        QueryKind::Select => compile_select(ast, executor),
        QueryKind::Insert => compile_insert(ast),
        QueryKind::Update => compile_update(ast, executor),
        QueryKind::Upsert => compile_upsert(ast),
        QueryKind::Delete => compile_delete(ast, executor),
    }
}

fn require_table<'a>(ast: &'a QueryAst) -> SqlforgeResult<&'a Ident> {
    ast.table.as_ref().ok_or_else(|| SqlforgeError::validation("TABLE", "no target table set"))
}

// ───────────────────────────── SELECT ──────────────────────────────────

fn compile_select(ast: &QueryAst, executor: &Arc<dyn Executor>) -> SqlforgeResult<Compiled> {
    let table = require_table(ast)?;

    let rewritten_where =
        rewrite_aggregate_alias_filters(&ast.where_nodes, &ast.aggregates, table, executor)?;

    let (projection, auto_added) = expand_relation_columns(&ast.projection, &ast.relations, table)?;
    let (mut projection, mut params) =
        append_aggregate_projections(projection, &ast.aggregates, table, executor)?;
    if projection.is_empty() {
        projection.push(ProjectionItem::Star);
    }

    let mut sql = String::from("SELECT ");
    if ast.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&render_projection(&projection));
    sql.push_str(" FROM ");
    sql.push_str(table.as_str());
    render_joins(&ast.joins, &mut sql);

    if !rewritten_where.is_empty() {
        let (where_sql, where_params) = emit_predicates(&rewritten_where, executor)?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
        params.extend(where_params);
    }

    if !ast.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&join_idents(&ast.group_by));
    }

    if !ast.having.is_empty() {
        let (having_sql, having_params) = emit_predicates(&ast.having, executor)?;
        sql.push_str(" HAVING ");
        sql.push_str(&having_sql);
        params.extend(having_params);
    }

    if !ast.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        let rendered: Vec<String> =
            ast.order_by.iter().map(|(c, d)| format!("{} {}", c.as_str(), d)).collect();
        sql.push_str(&rendered.join(", "));
    }

    if let Some(limit) = ast.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = ast.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    Ok(Compiled { sql, params, auto_added_columns: auto_added })
}

fn render_joins(joins: &[JoinSpec], sql: &mut String) {
    for j in joins {
        sql.push(' ');
        sql.push_str(j.kind.as_sql());
        sql.push(' ');
        sql.push_str(j.table.as_str());
        sql.push_str(" ON ");
        sql.push_str(&j.on_expression);
    }
}

fn join_idents(idents: &[Ident]) -> String {
    idents.iter().map(Ident::as_str).collect::<Vec<_>>().join(", ")
}

fn render_projection(items: &[ProjectionItem]) -> String {
    items
        .iter()
        .map(|it| match it {
            ProjectionItem::Star => "*".to_string(),
            ProjectionItem::TableStar(t) => format!("{}.*", t.as_str()),
            ProjectionItem::Column(c) => c.as_str().to_string(),
            ProjectionItem::Raw(r) => r.as_str().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_plain_star(items: &[ProjectionItem]) -> bool {
    matches!(items, [ProjectionItem::Star])
}

fn projection_has_column(items: &[ProjectionItem], bare: &str, qualified: &str) -> bool {
    items.iter().any(|it| match it {
        ProjectionItem::Column(c) => c.as_str() == bare || c.as_str() == qualified,
        ProjectionItem::Star | ProjectionItem::TableStar(_) => true,
        ProjectionItem::Raw(_) => false,
    })
}

/// Projection Expansion step 2 (§4.4.2): when relations are registered and
/// the projection isn't the default `*`, append each relation key absent
/// from the projection and record it as auto-added so the post-processor
/// can strip it.
fn expand_relation_columns(
    projection: &[ProjectionItem],
    relations: &[crate::ast::RelationSpec],
    table: &Ident,
) -> SqlforgeResult<(Vec<ProjectionItem>, Vec<String>)> {
    let mut projection = projection.to_vec();
    let mut auto_added = Vec::new();
    if relations.is_empty() || is_plain_star(&projection) {
        return Ok((projection, auto_added));
    }
    for rel in relations {
        for col in rel.local_key.columns() {
            let bare = col.as_str().to_string();
            let qualified = format!("{}.{}", table.as_str(), bare);
            if !projection_has_column(&projection, &bare, &qualified) {
                let qualified_ident = Ident::validate(&qualified, "SELECT")?;
                projection.push(ProjectionItem::Column(qualified_ident));
                auto_added.push(bare);
            }
        }
    }
    Ok((projection, auto_added))
}

/// Projection Expansion step 3 (§4.4.2): materialize each registered
/// aggregate as a correlated scalar subquery appended to the projection.
fn append_aggregate_projections(
    mut projection: Vec<ProjectionItem>,
    aggregates: &[AggregateSpec],
    table: &Ident,
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<(Vec<ProjectionItem>, Vec<Value>)> {
    let mut params = Vec::new();
    if aggregates.is_empty() {
        return Ok((projection, params));
    }
    if is_plain_star(&projection) {
        projection = vec![ProjectionItem::TableStar(table.clone())];
    }
    for agg in aggregates {
        let sub_ast = build_aggregate_subquery_ast(agg, table, executor)?;
        let compiled_sub = compile_select(&sub_ast, executor)?;
        params.extend(compiled_sub.params);
        let frag = format!("({}) AS {}", compiled_sub.sql, agg.alias);
        projection.push(ProjectionItem::Raw(Raw::new(frag)?));
    }
    Ok((projection, params))
}

/// §4.3.3 Aggregate-Alias Filter Rewriting, run as a compile-time pass so
/// it doesn't depend on call order between `withSum`/`where`.
fn rewrite_aggregate_alias_filters(
    nodes: &[PredicateNode],
    aggregates: &[AggregateSpec],
    table: &Ident,
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<Vec<PredicateNode>> {
    if aggregates.is_empty() {
        return Ok(nodes.to_vec());
    }
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let PredicateNode::Cmp { column, op, value: CmpValue::Value(v), conn } = node {
            if let Some(agg) = aggregates.iter().find(|a| a.alias == column.as_str()) {
                let sub_ast = build_aggregate_subquery_ast(agg, table, executor)?;
                out.push(PredicateNode::AggregateSubquery {
                    subquery: Box::new(sub_ast),
                    op: op.clone(),
                    value: v.clone(),
                    conn: *conn,
                });
                continue;
            }
        }
        out.push(node.clone());
    }
    Ok(out)
}

fn build_aggregate_subquery_ast(
    agg: &AggregateSpec,
    outer_table: &Ident,
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<QueryAst> {
    let mut sub = QueryAst::new(QueryKind::Select);
    sub.table = Some(agg.related_table.clone());

    let fks = agg.foreign_key.columns();
    let lks = agg.local_key.columns();
    if fks.len() != lks.len() {
        return Err(SqlforgeError::validation(
            "AGGREGATE",
            "foreign_key/local_key length mismatch",
        ));
    }
    for (fk, lk) in fks.iter().zip(lks.iter()) {
        let raw = Raw::new(format!("{}.{}", outer_table.as_str(), lk.as_str()))?;
        sub.where_nodes.push(PredicateNode::Cmp {
            column: (*fk).clone(),
            op: "=".to_string(),
            value: CmpValue::Raw(raw),
            conn: Conn::And,
        });
    }

    if let Some(filter) = &agg.filter {
        let sub_builder = crate::builder::QueryBuilder::from_parts(sub, executor.clone());
        sub = filter(sub_builder)?.into_ast();
    }

    let expr_sql = match &agg.expr {
        AggregateExpr::Star => "*".to_string(),
        AggregateExpr::Column(c) => c.as_str().to_string(),
        AggregateExpr::Raw(r) => r.as_str().to_string(),
    };
    let agg_sql = match agg.kind {
        AggregateKind::Count => "COUNT(*)".to_string(),
        AggregateKind::Custom => expr_sql,
        other => format!("{}({})", other.as_sql_fn(), expr_sql),
    };
    sub.projection = vec![ProjectionItem::Raw(Raw::new(agg_sql)?)];
    Ok(sub)
}

// ────────────────────────── WHERE / HAVING ─────────────────────────────

fn node_conn(node: &PredicateNode) -> Conn {
    match node {
        PredicateNode::Cmp { conn, .. }
        | PredicateNode::In { conn, .. }
        | PredicateNode::Between { conn, .. }
        | PredicateNode::Like { conn, .. }
        | PredicateNode::Exists { conn, .. }
        | PredicateNode::AggregateSubquery { conn, .. }
        | PredicateNode::Raw { conn, .. } => *conn,
        PredicateNode::GroupStart { conn } => *conn,
        PredicateNode::GroupEnd => Conn::And,
    }
}

/// §4.4.3: maintains a stack of per-scope "nodes already emitted" counters,
/// pushed on `GroupStart` and popped on `GroupEnd`. Before emitting any
/// node whose scope counter is non-zero, the node's own connective is
/// prepended. This is the authoritative parenthesization/connective rule;
/// a naive "join by AND" would be wrong once groups are present.
pub(crate) fn emit_predicates(
    nodes: &[PredicateNode],
    executor: &Arc<dyn Executor>,
) -> SqlforgeResult<(String, Vec<Value>)> {
    let mut sql = String::new();
    let mut params = Vec::new();
    let mut counters: Vec<usize> = vec![0];

    for node in nodes {
        match node {
            PredicateNode::GroupStart { conn } => {
                if *counters.last().expect("scope stack never empty") > 0 {
                    sql.push(' ');
                    sql.push_str(conn.as_sql());
                    sql.push(' ');
                }
                sql.push('(');
                *counters.last_mut().expect("scope stack never empty") += 1;
                counters.push(0);
            }
            PredicateNode::GroupEnd => {
                sql.push(')');
                counters.pop();
                if counters.is_empty() {
                    return Err(SqlforgeError::emission("unbalanced GroupEnd"));
                }
            }
            other => {
                if *counters.last().expect("scope stack never empty") > 0 {
                    sql.push(' ');
                    sql.push_str(node_conn(other).as_sql());
                    sql.push(' ');
                }
                emit_single_node(other, executor, &mut sql, &mut params)?;
                *counters.last_mut().expect("scope stack never empty") += 1;
            }
        }
    }

    if counters.len() != 1 {
        return Err(SqlforgeError::emission("unbalanced GroupStart"));
    }

    Ok((sql, params))
}

fn emit_single_node(
    node: &PredicateNode,
    executor: &Arc<dyn Executor>,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> SqlforgeResult<()> {
    match node {
        PredicateNode::Cmp { column, op, value, .. } => match value {
            CmpValue::Raw(raw) => {
                sql.push_str(&format!("{} {} {}", column.as_str(), op, raw.as_str()));
            }
            CmpValue::Null => {
                let suffix = if op == "IS NOT" { "IS NOT NULL" } else { "IS NULL" };
                sql.push_str(&format!("{} {}", column.as_str(), suffix));
            }
            CmpValue::Value(v) => {
                sql.push_str(&format!("{} {} ?", column.as_str(), op));
                params.push(v.clone());
            }
        },
        PredicateNode::In { column, values, negated, .. } => {
            if values.is_empty() {
                // whereIn([]) is always-false; whereNotIn([]) never reaches
                // here because the builder doesn't push a node for it.
                sql.push_str("1 = 0");
            } else {
                let placeholders = vec!["?"; values.len()].join(", ");
                let kw = if *negated { "NOT IN" } else { "IN" };
                sql.push_str(&format!("{} {} ({})", column.as_str(), kw, placeholders));
                params.extend(values.iter().cloned());
            }
        }
        PredicateNode::Between { column, lo, hi, negated, .. } => {
            let kw = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
            sql.push_str(&format!("{} {} ? AND ?", column.as_str(), kw));
            params.push(lo.clone());
            params.push(hi.clone());
        }
        PredicateNode::Like { column, pattern, .. } => {
            sql.push_str(&format!("{} LIKE ?", column.as_str()));
            params.push(Value::Str(pattern.clone()));
        }
        PredicateNode::Exists { negated, subquery, .. } => {
            let compiled = compile_select(subquery, executor)?;
            let kw = if *negated { "NOT EXISTS" } else { "EXISTS" };
            sql.push_str(&format!("{kw} ({})", compiled.sql));
            params.extend(compiled.params);
        }
        PredicateNode::AggregateSubquery { subquery, op, value, .. } => {
            let compiled = compile_select(subquery, executor)?;
            sql.push_str(&format!("({}) {} ?", compiled.sql, op));
            params.extend(compiled.params);
            params.push(value.clone());
        }
        PredicateNode::Raw { sql_fragment, params: raw_params, .. } => {
            sql.push_str(sql_fragment);
            params.extend(raw_params.iter().cloned());
        }
        PredicateNode::GroupStart { .. } | PredicateNode::GroupEnd => unreachable!(
            "GroupStart/GroupEnd are handled by emit_predicates before reaching emit_single_node"
        ),
    }
    Ok(())
}

// ───────────────────────────── INSERT ──────────────────────────────────

fn render_mutation_value(v: &MutationValue, params: &mut Vec<Value>) -> String {
    match v {
        MutationValue::Value(val) => {
            params.push(val.clone());
            "?".to_string()
        }
        MutationValue::Raw(raw) => raw.as_str().to_string(),
    }
}

fn compile_insert(ast: &QueryAst) -> SqlforgeResult<Compiled> {
    let table = require_table(ast)?;

    if let Some(rows) = &ast.bulk_values {
        if rows.is_empty() {
            return Err(SqlforgeError::validation("INSERT", "bulk insert requires at least one row"));
        }
        let columns: Vec<&str> = rows[0].iter().map(|(c, _)| c.as_str()).collect();
        for row in rows.iter() {
            let row_cols: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
            if row_cols != columns {
                return Err(SqlforgeError::validation(
                    "INSERT",
                    "every row in a bulk insert must share the same column set",
                ));
            }
        }
        let mut params = Vec::new();
        let mut rows_sql = Vec::with_capacity(rows.len());
        for row in rows {
            let values: Vec<String> =
                row.iter().map(|(_, v)| render_mutation_value(v, &mut params)).collect();
            rows_sql.push(format!("({})", values.join(", ")));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table.as_str(),
            columns.join(", "),
            rows_sql.join(", ")
        );
        return Ok(Compiled { sql, params, auto_added_columns: Vec::new() });
    }

    let payload = ast
        .mutation_payload
        .as_ref()
        .ok_or_else(|| SqlforgeError::validation("INSERT", "insert requires a payload"))?;
    if payload.is_empty() {
        return Err(SqlforgeError::validation("INSERT", "insert payload must not be empty"));
    }
    let mut params = Vec::new();
    let columns: Vec<&str> = payload.iter().map(|(c, _)| c.as_str()).collect();
    let values: Vec<String> =
        payload.iter().map(|(_, v)| render_mutation_value(v, &mut params)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.as_str(),
        columns.join(", "),
        values.join(", ")
    );
    Ok(Compiled { sql, params, auto_added_columns: Vec::new() })
}

// ───────────────────────────── UPDATE ──────────────────────────────────

fn compile_update(ast: &QueryAst, executor: &Arc<dyn Executor>) -> SqlforgeResult<Compiled> {
    let table = require_table(ast)?;
    let payload = ast
        .mutation_payload
        .as_ref()
        .ok_or_else(|| SqlforgeError::validation("UPDATE", "update requires a SET payload"))?;
    if payload.is_empty() {
        return Err(SqlforgeError::validation("UPDATE", "update SET payload must not be empty"));
    }

    let mut params = Vec::new();
    let assignments: Vec<String> = payload
        .iter()
        .map(|(c, v)| format!("{} = {}", c.as_str(), render_mutation_value(v, &mut params)))
        .collect();

    let mut sql = format!("UPDATE {} SET {}", table.as_str(), assignments.join(", "));

    if !ast.where_nodes.is_empty() {
        let (where_sql, where_params) = emit_predicates(&ast.where_nodes, executor)?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
        params.extend(where_params);
    }

    Ok(Compiled { sql, params, auto_added_columns: Vec::new() })
}

// ───────────────────────────── UPSERT ──────────────────────────────────

fn compile_upsert(ast: &QueryAst) -> SqlforgeResult<Compiled> {
    let table = require_table(ast)?;
    let insert_payload = ast
        .mutation_payload
        .as_ref()
        .ok_or_else(|| SqlforgeError::validation("UPSERT", "upsert requires an insert payload"))?;
    let update_payload = ast.upsert_update.as_ref().ok_or_else(|| {
        SqlforgeError::validation("UPSERT", "upsert requires a non-empty update payload")
    })?;
    if insert_payload.is_empty() || update_payload.is_empty() {
        return Err(SqlforgeError::validation(
            "UPSERT",
            "upsert requires both a non-empty insert and update payload",
        ));
    }

    let mut params = Vec::new();
    let columns: Vec<&str> = insert_payload.iter().map(|(c, _)| c.as_str()).collect();
    let values: Vec<String> =
        insert_payload.iter().map(|(_, v)| render_mutation_value(v, &mut params)).collect();

    // Update-clause entries whose value is a Raw Marker are rendered
    // literally and contribute no `?` (e.g. `col = col + 1`).
    let assignments: Vec<String> = update_payload
        .iter()
        .map(|(c, v)| format!("{} = {}", c.as_str(), render_mutation_value(v, &mut params)))
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        table.as_str(),
        columns.join(", "),
        values.join(", "),
        assignments.join(", ")
    );
    Ok(Compiled { sql, params, auto_added_columns: Vec::new() })
}

// ───────────────────────────── DELETE ──────────────────────────────────

fn compile_delete(ast: &QueryAst, executor: &Arc<dyn Executor>) -> SqlforgeResult<Compiled> {
    let table = require_table(ast)?;
    let mut sql = format!("DELETE FROM {}", table.as_str());
    let mut params = Vec::new();
    if !ast.where_nodes.is_empty() {
        let (where_sql, where_params) = emit_predicates(&ast.where_nodes, executor)?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
        params.extend(where_params);
    }
    Ok(Compiled { sql, params, auto_added_columns: Vec::new() })
}
