//! The fluent query builder: C4 Predicate DSL, C5 Relation Spec Registry,
//! and the terminal operations that route through C6/C7/C8.
//!
//! A builder owns exactly one [`QueryAst`]. Every predicate-appending or
//! clause-appending method takes `self` by value and returns
//! `SqlforgeResult<Self>`, so a chain short-circuits on the first
//! validation failure (§4.10) and a builder consumed by a terminal
//! operation cannot be reused — Rust's ownership model enforces the "a
//! terminal operation always resets the AST" invariant (§3.2) at compile
//! time rather than at runtime.

use std::sync::Arc;

use crate::ast::{
    AggregateExpr, AggregateKind, AggregateSpec, CmpValue, Conn, JoinKind, JoinSpec, KeySpec,
    MutationValue, PredicateNode, ProjectionItem, QueryAst, QueryKind, RelationKind, RelationSpec,
};
use crate::chunk::ChunkControl;
use crate::compiler::{self, Compiled};
use crate::error::{SqlforgeError, SqlforgeResult};
use crate::executor::{Executor, MutateResult, Row};
use crate::ident::{self, Ident, COLUMN_OPERATORS, WHERE_OPERATORS};
use crate::raw::Raw;
use crate::value::{IntoValue, Value};

/// Callback narrowing an EXISTS/aggregate-existence subquery, run exactly
/// once against a scratch builder targeting the related table.
pub type SubqueryFilter = Box<dyn FnOnce(QueryBuilder) -> SqlforgeResult<QueryBuilder>>;

/// Either a bare table name or a `{table: alias}` pairing, the two shapes
/// a caller may use to register a relation or aggregate. See Design Notes
/// in SPEC_FULL.md: a dynamic either-shape call becomes an explicit
/// two-variant sum type.
pub enum RelationTarget {
    Table(String),
    TableWithAlias(String, String),
}

impl From<&str> for RelationTarget {
    fn from(t: &str) -> Self {
        RelationTarget::Table(t.to_string())
    }
}

impl From<(&str, &str)> for RelationTarget {
    fn from((t, a): (&str, &str)) -> Self {
        RelationTarget::TableWithAlias(t.to_string(), a.to_string())
    }
}

impl RelationTarget {
    fn table(&self) -> &str {
        match self {
            RelationTarget::Table(t) => t,
            RelationTarget::TableWithAlias(t, _) => t,
        }
    }

    fn alias(&self) -> Option<&str> {
        match self {
            RelationTarget::Table(_) => None,
            RelationTarget::TableWithAlias(_, a) => Some(a),
        }
    }
}

/// Side to wrap a LIKE pattern on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeSide {
    Both,
    Before,
    After,
}

fn escape_like(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            other => out.push(other),
        }
    }
    out
}

fn wrap_like(escaped: &str, side: LikeSide) -> String {
    match side {
        LikeSide::Both => format!("%{escaped}%"),
        LikeSide::Before => format!("%{escaped}"),
        LikeSide::After => format!("{escaped}%"),
    }
}

/// §4.10: an array-length mismatch between a foreign key and a local key
/// must fail synchronously before any SQL is emitted, for every call site
/// that pairs the two (relations, aggregates, EXISTS subqueries).
fn validate_key_lengths(fk: &[&str], lk: &[&str], context: &'static str) -> SqlforgeResult<()> {
    if fk.is_empty() || fk.len() != lk.len() {
        return Err(SqlforgeError::validation(
            context,
            "foreign_key and local_key must be equal-length, non-empty arrays",
        ));
    }
    Ok(())
}

fn key_spec(cols: &[&str], context: &'static str) -> SqlforgeResult<KeySpec> {
    if cols.is_empty() {
        return Err(SqlforgeError::validation(context, "key must have at least one column"));
    }
    let idents: Vec<Ident> =
        cols.iter().map(|c| Ident::validate(c, context)).collect::<Result<_, _>>()?;
    Ok(if idents.len() == 1 { KeySpec::Single(idents.into_iter().next().unwrap()) } else { KeySpec::Composite(idents) })
}

pub struct QueryBuilder {
    pub(crate) ast: QueryAst,
    pub(crate) executor: Arc<dyn Executor>,
}

/// Constructs a builder targeting `table`, bound to `executor` — either the
/// default pool-backed adapter or a transaction-bound one handed out by
/// [`crate::transaction::transaction`].
pub fn builder(table: &str, executor: Arc<dyn Executor>) -> SqlforgeResult<QueryBuilder> {
    let ident = Ident::validate(table, "TABLE")?;
    let mut ast = QueryAst::new(QueryKind::Select);
    ast.table = Some(ident);
    Ok(QueryBuilder { ast, executor })
}

impl QueryBuilder {
    pub(crate) fn from_parts(ast: QueryAst, executor: Arc<dyn Executor>) -> Self {
        QueryBuilder { ast, executor }
    }

    pub(crate) fn into_ast(self) -> QueryAst {
        self.ast
    }

    fn table_ident(&self) -> SqlforgeResult<Ident> {
        self.ast.table.clone().ok_or_else(|| SqlforgeError::validation("TABLE", "no target table set"))
    }

    fn push_where(&mut self, node: PredicateNode) {
        self.ast.where_nodes.push(node);
    }

    fn push_having(&mut self, node: PredicateNode) {
        self.ast.having.push(node);
    }

    // ───────────────────────── projection / joins ──────────────────────

    pub fn select(mut self, columns: &[&str]) -> SqlforgeResult<Self> {
        self.ast.projection =
            columns.iter().map(|c| Ident::validate(c, "SELECT").map(ProjectionItem::Column)).collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn distinct(mut self) -> Self {
        self.ast.distinct = true;
        self
    }

    pub fn join(mut self, table: &str, on_expression: &str, kind: JoinKind) -> SqlforgeResult<Self> {
        let table = Ident::validate(table, "JOIN")?;
        if on_expression.is_empty() {
            return Err(SqlforgeError::validation("JOIN", "on_expression must not be empty"));
        }
        self.ast.joins.push(JoinSpec { table, on_expression: on_expression.to_string(), kind });
        Ok(self)
    }

    pub fn inner_join(self, table: &str, on_expression: &str) -> SqlforgeResult<Self> {
        self.join(table, on_expression, JoinKind::Inner)
    }

    pub fn left_join(self, table: &str, on_expression: &str) -> SqlforgeResult<Self> {
        self.join(table, on_expression, JoinKind::Left)
    }

    pub fn right_join(self, table: &str, on_expression: &str) -> SqlforgeResult<Self> {
        self.join(table, on_expression, JoinKind::Right)
    }

    // ───────────────────────────── WHERE ───────────────────────────────

    /// `where_(col, op, value)`. The overloaded two-argument form from the
    /// source (`where(col, value)`, equivalent to `where(col, "=", value)`)
    /// is `where_eq` below — an explicit two-arity choice rather than a
    /// sentinel-null collapse (see SPEC_FULL.md Design Notes).
    pub fn where_(mut self, column: &str, op: &str, value: impl IntoValue) -> SqlforgeResult<Self> {
        self.push_cmp(column, op, value, Conn::And)?;
        Ok(self)
    }

    pub fn or_where_(mut self, column: &str, op: &str, value: impl IntoValue) -> SqlforgeResult<Self> {
        self.push_cmp(column, op, value, Conn::Or)?;
        Ok(self)
    }

    pub fn where_eq(self, column: &str, value: impl IntoValue) -> SqlforgeResult<Self> {
        self.where_(column, "=", value)
    }

    pub fn or_where_eq(self, column: &str, value: impl IntoValue) -> SqlforgeResult<Self> {
        self.or_where_(column, "=", value)
    }

    fn push_cmp(&mut self, column: &str, op: &str, value: impl IntoValue, conn: Conn) -> SqlforgeResult<()> {
        let column = Ident::validate(column, "WHERE")?;
        let op = ident::validate_op(op, WHERE_OPERATORS)?;
        let value = CmpValue::Value(value.into_value());
        self.push_where(PredicateNode::Cmp { column, op, value, conn });
        Ok(())
    }

    pub fn where_null(mut self, column: &str) -> SqlforgeResult<Self> {
        self.push_null(column, false, Conn::And)?;
        Ok(self)
    }

    pub fn where_not_null(mut self, column: &str) -> SqlforgeResult<Self> {
        self.push_null(column, true, Conn::And)?;
        Ok(self)
    }

    pub fn or_where_null(mut self, column: &str) -> SqlforgeResult<Self> {
        self.push_null(column, false, Conn::Or)?;
        Ok(self)
    }

    pub fn or_where_not_null(mut self, column: &str) -> SqlforgeResult<Self> {
        self.push_null(column, true, Conn::Or)?;
        Ok(self)
    }

    fn push_null(&mut self, column: &str, negated: bool, conn: Conn) -> SqlforgeResult<()> {
        let column = Ident::validate(column, "WHERE")?;
        let op = if negated { "IS NOT" } else { "IS" }.to_string();
        self.push_where(PredicateNode::Cmp { column, op, value: CmpValue::Null, conn });
        Ok(())
    }

    /// `whereColumn(lhs, op, rhs)` is `Cmp{lhs, op, Raw(rhs), AND}`.
    pub fn where_column(mut self, lhs: &str, op: &str, rhs: &str) -> SqlforgeResult<Self> {
        let column = Ident::validate(lhs, "WHERE")?;
        let op = ident::validate_op(op, COLUMN_OPERATORS)?;
        let rhs = Ident::validate(rhs, "WHERE")?;
        self.push_where(PredicateNode::Cmp {
            column,
            op,
            value: CmpValue::Raw(Raw::new(rhs.into_string())?),
            conn: Conn::And,
        });
        Ok(self)
    }

    pub fn or_where_column(mut self, lhs: &str, op: &str, rhs: &str) -> SqlforgeResult<Self> {
        let column = Ident::validate(lhs, "WHERE")?;
        let op = ident::validate_op(op, COLUMN_OPERATORS)?;
        let rhs = Ident::validate(rhs, "WHERE")?;
        self.push_where(PredicateNode::Cmp {
            column,
            op,
            value: CmpValue::Raw(Raw::new(rhs.into_string())?),
            conn: Conn::Or,
        });
        Ok(self)
    }

    /// `whereIn(col, [])` inserts the always-false sentinel `1 = 0`;
    /// `whereNotIn(col, [])` inserts nothing (always true).
    pub fn where_in(self, column: &str, values: Vec<impl IntoValue>) -> SqlforgeResult<Self> {
        self.push_in(column, values, false, Conn::And)
    }

    pub fn where_not_in(self, column: &str, values: Vec<impl IntoValue>) -> SqlforgeResult<Self> {
        self.push_in(column, values, true, Conn::And)
    }

    pub fn or_where_in(self, column: &str, values: Vec<impl IntoValue>) -> SqlforgeResult<Self> {
        self.push_in(column, values, false, Conn::Or)
    }

    pub fn or_where_not_in(self, column: &str, values: Vec<impl IntoValue>) -> SqlforgeResult<Self> {
        self.push_in(column, values, true, Conn::Or)
    }

    fn push_in(mut self, column: &str, values: Vec<impl IntoValue>, negated: bool, conn: Conn) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "WHERE")?;
        if negated && values.is_empty() {
            // "whereNotIn(col, []) must behave as if the call were absent."
            return Ok(self);
        }
        let values: Vec<Value> = values.into_iter().map(IntoValue::into_value).collect();
        self.push_where(PredicateNode::In { column, values, negated, conn });
        Ok(self)
    }

    pub fn where_between(self, column: &str, lo: impl IntoValue, hi: impl IntoValue) -> SqlforgeResult<Self> {
        self.push_between(column, lo, hi, false, Conn::And)
    }

    pub fn where_not_between(self, column: &str, lo: impl IntoValue, hi: impl IntoValue) -> SqlforgeResult<Self> {
        self.push_between(column, lo, hi, true, Conn::And)
    }

    pub fn or_where_between(self, column: &str, lo: impl IntoValue, hi: impl IntoValue) -> SqlforgeResult<Self> {
        self.push_between(column, lo, hi, false, Conn::Or)
    }

    fn push_between(
        mut self,
        column: &str,
        lo: impl IntoValue,
        hi: impl IntoValue,
        negated: bool,
        conn: Conn,
    ) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "WHERE")?;
        self.push_where(PredicateNode::Between {
            column,
            lo: lo.into_value(),
            hi: hi.into_value(),
            negated,
            conn,
        });
        Ok(self)
    }

    /// Starts a scratch builder for a `group`/`orGroup`/`whereHas` callback:
    /// same table and executor as the parent, empty predicate lists. Only
    /// its `where_nodes` are spliced back into the parent.
    fn scratch(&self) -> QueryBuilder {
        QueryBuilder::from_parts(QueryAst::new(self.ast.kind), self.executor.clone())
    }

    /// `group(cb)` / `orGroup(cb)`: runs `cb` against a scratch builder and
    /// splices its accumulated WHERE nodes back in between a paired
    /// `GroupStart`/`GroupEnd`. Groups nest to arbitrary depth since `cb`
    /// may itself call `group`.
    pub fn group(mut self, cb: impl FnOnce(QueryBuilder) -> SqlforgeResult<QueryBuilder>) -> SqlforgeResult<Self> {
        let scratch = cb(self.scratch())?;
        self.push_where(PredicateNode::GroupStart { conn: Conn::And });
        self.ast.where_nodes.extend(scratch.into_ast().where_nodes);
        self.push_where(PredicateNode::GroupEnd);
        Ok(self)
    }

    pub fn or_group(mut self, cb: impl FnOnce(QueryBuilder) -> SqlforgeResult<QueryBuilder>) -> SqlforgeResult<Self> {
        let scratch = cb(self.scratch())?;
        self.push_where(PredicateNode::GroupStart { conn: Conn::Or });
        self.ast.where_nodes.extend(scratch.into_ast().where_nodes);
        self.push_where(PredicateNode::GroupEnd);
        Ok(self)
    }

    pub fn like(mut self, column: &str, value: &str, side: LikeSide) -> SqlforgeResult<Self> {
        self.push_like(column, value, side, Conn::And)?;
        Ok(self)
    }

    pub fn or_like(mut self, column: &str, value: &str, side: LikeSide) -> SqlforgeResult<Self> {
        self.push_like(column, value, side, Conn::Or)?;
        Ok(self)
    }

    fn push_like(&mut self, column: &str, value: &str, side: LikeSide, conn: Conn) -> SqlforgeResult<()> {
        let column = Ident::validate(column, "WHERE")?;
        let pattern = wrap_like(&escape_like(value), side);
        self.push_where(PredicateNode::Like { column, pattern, conn });
        Ok(())
    }

    /// `search(cols, v)`: one `LIKE` per column, OR-joined among themselves
    /// and AND-joined as a group to whatever preceded it.
    pub fn search(self, columns: &[&str], value: &str) -> SqlforgeResult<Self> {
        self.push_search(columns, value, Conn::And)
    }

    pub fn or_search(self, columns: &[&str], value: &str) -> SqlforgeResult<Self> {
        self.push_search(columns, value, Conn::Or)
    }

    fn push_search(mut self, columns: &[&str], value: &str, outer_conn: Conn) -> SqlforgeResult<Self> {
        if columns.is_empty() {
            return Err(SqlforgeError::validation("SEARCH", "search requires at least one column"));
        }
        self.push_where(PredicateNode::GroupStart { conn: outer_conn });
        for (i, col) in columns.iter().enumerate() {
            let conn = if i == 0 { Conn::And } else { Conn::Or };
            self.push_like(col, value, LikeSide::Both, conn)?;
        }
        self.push_where(PredicateNode::GroupEnd);
        Ok(self)
    }

    // ───────────────────── relationship existence predicates ───────────

    fn build_exists_subquery(
        &self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        projection: ProjectionItem,
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<QueryAst> {
        validate_key_lengths(fk, lk, "WHERE HAS")?;
        let parent_table = self.table_ident()?;
        let related = Ident::validate(related_table, "WHERE HAS")?;

        let mut sub = QueryAst::new(QueryKind::Select);
        sub.table = Some(related.clone());
        sub.projection = vec![projection];

        for (f, l) in fk.iter().zip(lk.iter()) {
            let qualified_fk = Ident::validate(&format!("{}.{f}", related.as_str()), "WHERE HAS")?;
            let raw = Raw::new(format!("{}.{l}", parent_table.as_str()))?;
            sub.where_nodes.push(PredicateNode::Cmp {
                column: qualified_fk,
                op: "=".to_string(),
                value: CmpValue::Raw(raw),
                conn: Conn::And,
            });
        }

        let sub_builder = QueryBuilder::from_parts(sub, self.executor.clone());
        let sub_builder = match cb {
            Some(cb) => cb(sub_builder)?,
            None => sub_builder,
        };
        Ok(sub_builder.into_ast())
    }

    fn push_exists(
        mut self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        negated: bool,
        conn: Conn,
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        let sub = self.build_exists_subquery(related_table, fk, lk, ProjectionItem::Raw(Raw::new("1")?), cb)?;
        self.push_where(PredicateNode::Exists { negated, conn, subquery: Box::new(sub) });
        Ok(self)
    }

    pub fn where_has(
        self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        self.push_exists(related_table, fk, lk, false, Conn::And, cb)
    }

    pub fn or_where_has(
        self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        self.push_exists(related_table, fk, lk, false, Conn::Or, cb)
    }

    pub fn where_doesnt_have(
        self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        self.push_exists(related_table, fk, lk, true, Conn::And, cb)
    }

    pub fn or_where_doesnt_have(
        self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        self.push_exists(related_table, fk, lk, true, Conn::Or, cb)
    }

    /// `has(table, fk, lk, op?, n?, cb?)`: when `op = ">="` and `n = 1`
    /// with no callback, degenerates to a plain `EXISTS`; otherwise builds
    /// an `AggregateSubquery` comparing `COUNT(*)` to `n`.
    pub fn has(
        self,
        related_table: &str,
        fk: &[&str],
        lk: &[&str],
        op: Option<&str>,
        n: Option<i64>,
        cb: Option<SubqueryFilter>,
    ) -> SqlforgeResult<Self> {
        let op = op.unwrap_or(">=");
        let n = n.unwrap_or(1);
        if op == ">=" && n == 1 && cb.is_none() {
            return self.where_has(related_table, fk, lk, None);
        }
        let op = ident::validate_op(op, COLUMN_OPERATORS)?;
        let mut this = self;
        let sub = this.build_exists_subquery(
            related_table,
            fk,
            lk,
            ProjectionItem::Raw(Raw::new("COUNT(*)")?),
            cb,
        )?;
        this.push_where(PredicateNode::AggregateSubquery {
            subquery: Box::new(sub),
            op,
            value: Value::I64(n),
            conn: Conn::And,
        });
        Ok(this)
    }

    // ───────────────────────── aggregate registration ──────────────────

    fn register_aggregate(
        mut self,
        kind: AggregateKind,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        expr: AggregateExpr,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        validate_key_lengths(fk, lk, "AGGREGATE")?;
        let target = target.into();
        let related_table = Ident::validate(target.table(), "AGGREGATE")?;
        let foreign_key = key_spec(fk, "AGGREGATE")?;
        let local_key = key_spec(lk, "AGGREGATE")?;
        let alias = match target.alias() {
            Some(a) => a.to_string(),
            None => match (&kind, &expr) {
                (AggregateKind::Count, _) => format!("{}_count", related_table.as_str()),
                (_, AggregateExpr::Column(c)) => {
                    format!("{}_{}_{}", related_table.as_str(), c.as_str(), kind.default_alias_suffix())
                }
                _ => format!("{}_{}", related_table.as_str(), kind.default_alias_suffix()),
            },
        };
        self.ast.aggregates.push(AggregateSpec {
            kind,
            related_table,
            foreign_key,
            local_key,
            expr,
            alias,
            filter,
        });
        Ok(self)
    }

    pub fn with_sum(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        column: &str,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "AGGREGATE")?;
        self.register_aggregate(AggregateKind::Sum, target, fk, lk, AggregateExpr::Column(column), filter)
    }

    pub fn with_avg(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        column: &str,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "AGGREGATE")?;
        self.register_aggregate(AggregateKind::Avg, target, fk, lk, AggregateExpr::Column(column), filter)
    }

    pub fn with_max(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        column: &str,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "AGGREGATE")?;
        self.register_aggregate(AggregateKind::Max, target, fk, lk, AggregateExpr::Column(column), filter)
    }

    pub fn with_min(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        column: &str,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "AGGREGATE")?;
        self.register_aggregate(AggregateKind::Min, target, fk, lk, AggregateExpr::Column(column), filter)
    }

    pub fn with_count(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        self.register_aggregate(AggregateKind::Count, target, fk, lk, AggregateExpr::Star, filter)
    }

    pub fn with_custom(
        self,
        target: impl Into<RelationTarget>,
        fk: &[&str],
        lk: &[&str],
        expression: &str,
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        let raw = Raw::new(expression)?;
        self.register_aggregate(AggregateKind::Custom, target, fk, lk, AggregateExpr::Raw(raw), filter)
    }

    // ───────────────────────── relation registration ────────────────────

    pub fn with_one(
        mut self,
        relation_name: &str,
        fk: &[&str],
        lk: &[&str],
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        validate_key_lengths(fk, lk, "RELATION")?;
        self.ast.relations.push(RelationSpec {
            kind: RelationKind::HasOne,
            related_table: Ident::validate(relation_name, "RELATION")?,
            relation_name: relation_name.to_string(),
            foreign_key: key_spec(fk, "RELATION")?,
            local_key: key_spec(lk, "RELATION")?,
            filter,
        });
        Ok(self)
    }

    pub fn with_many(
        mut self,
        relation_name: &str,
        fk: &[&str],
        lk: &[&str],
        filter: Option<crate::ast::FilterCallback>,
    ) -> SqlforgeResult<Self> {
        validate_key_lengths(fk, lk, "RELATION")?;
        self.ast.relations.push(RelationSpec {
            kind: RelationKind::HasMany,
            related_table: Ident::validate(relation_name, "RELATION")?,
            relation_name: relation_name.to_string(),
            foreign_key: key_spec(fk, "RELATION")?,
            local_key: key_spec(lk, "RELATION")?,
            filter,
        });
        Ok(self)
    }

    // ───────────────────────── other clauses ───────────────────────────

    pub fn group_by(mut self, columns: &[&str]) -> SqlforgeResult<Self> {
        for c in columns {
            self.ast.group_by.push(Ident::validate(c, "GROUP BY")?);
        }
        Ok(self)
    }

    pub fn having(mut self, column: &str, op: &str, value: impl IntoValue) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "HAVING")?;
        let op = ident::validate_op(op, WHERE_OPERATORS)?;
        self.push_having(PredicateNode::Cmp { column, op, value: CmpValue::Value(value.into_value()), conn: Conn::And });
        Ok(self)
    }

    pub fn order_by(mut self, column: &str, direction: &str) -> SqlforgeResult<Self> {
        let column = Ident::validate(column, "ORDER BY")?;
        let direction = ident::validate_direction(direction)?;
        self.ast.order_by.push((column, direction));
        Ok(self)
    }

    pub fn limit(mut self, n: i64) -> SqlforgeResult<Self> {
        self.ast.limit = Some(ident::validate_non_negative_int(n, "LIMIT")?);
        Ok(self)
    }

    pub fn offset(mut self, n: i64) -> SqlforgeResult<Self> {
        self.ast.offset = Some(ident::validate_non_negative_int(n, "OFFSET")?);
        Ok(self)
    }

    // ───────────────────────── mutation construction ───────────────────

    fn payload_from_pairs(pairs: Vec<(&str, MutationValue)>, context: &'static str) -> SqlforgeResult<Vec<(Ident, MutationValue)>> {
        pairs.into_iter().map(|(c, v)| Ok((Ident::validate(c, context)?, v))).collect()
    }

    pub fn insert(mut self, payload: Vec<(&str, MutationValue)>) -> SqlforgeResult<Self> {
        if payload.is_empty() {
            return Err(SqlforgeError::validation("INSERT", "insert payload must not be empty"));
        }
        self.ast.kind = QueryKind::Insert;
        self.ast.mutation_payload = Some(Self::payload_from_pairs(payload, "INSERT")?);
        Ok(self)
    }

    pub fn insert_many(mut self, rows: Vec<Vec<(&str, MutationValue)>>) -> SqlforgeResult<Self> {
        if rows.is_empty() {
            return Err(SqlforgeError::validation("INSERT", "bulk insert requires at least one row"));
        }
        self.ast.kind = QueryKind::Insert;
        let rows = rows
            .into_iter()
            .map(|row| Self::payload_from_pairs(row, "INSERT"))
            .collect::<SqlforgeResult<Vec<_>>>()?;
        self.ast.bulk_values = Some(rows);
        Ok(self)
    }

    pub fn update(mut self, payload: Vec<(&str, MutationValue)>) -> SqlforgeResult<Self> {
        if payload.is_empty() {
            return Err(SqlforgeError::validation("UPDATE", "update SET payload must not be empty"));
        }
        self.ast.kind = QueryKind::Update;
        self.ast.mutation_payload = Some(Self::payload_from_pairs(payload, "UPDATE")?);
        Ok(self)
    }

    /// `upsert` requires both an insert payload and a non-empty update
    /// payload (§3.2).
    pub fn upsert(
        mut self,
        insert_payload: Vec<(&str, MutationValue)>,
        update_payload: Vec<(&str, MutationValue)>,
    ) -> SqlforgeResult<Self> {
        if insert_payload.is_empty() || update_payload.is_empty() {
            return Err(SqlforgeError::validation(
                "UPSERT",
                "upsert requires both a non-empty insert and update payload",
            ));
        }
        self.ast.kind = QueryKind::Upsert;
        self.ast.mutation_payload = Some(Self::payload_from_pairs(insert_payload, "UPSERT")?);
        self.ast.upsert_update = Some(Self::payload_from_pairs(update_payload, "UPSERT")?);
        Ok(self)
    }

    pub fn delete(mut self) -> Self {
        self.ast.kind = QueryKind::Delete;
        self
    }

    // ───────────────────────── introspection ───────────────────────────

    /// Returns the compiled SQL without executing. Idempotent: does not
    /// mutate observable AST state.
    pub fn to_sql(&self) -> SqlforgeResult<String> {
        compiler::compile(&self.ast, &self.executor).map(|c| c.sql)
    }

    /// Returns the companion parameter list for [`Self::to_sql`].
    pub fn get_parameters(&self) -> SqlforgeResult<Vec<Value>> {
        compiler::compile(&self.ast, &self.executor).map(|c| c.params)
    }

    fn compile(&self) -> SqlforgeResult<Compiled> {
        compiler::compile(&self.ast, &self.executor)
    }

    // ───────────────────────────── terminals ────────────────────────────

    /// Runs C6→C7, and for SELECT, C8 (which invokes C9 for any
    /// registered relations).
    pub async fn get(self) -> SqlforgeResult<Vec<Row>> {
        let compiled = self.compile()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %compiled.sql, params = compiled.params.len(), "sqlforge: dispatching query");
        let result = self.executor.query(&compiled.sql, compiled.params).await?;
        crate::postprocess::post_process(
            result.rows,
            &self.ast.aggregates,
            &compiled.auto_added_columns,
            &self.ast.relations,
            &self.executor,
        )
        .await
    }

    pub async fn first(self) -> SqlforgeResult<Option<Row>> {
        let limited = self.limit(1)?;
        Ok(limited.get().await?.into_iter().next())
    }

    pub async fn value(self, column: &str) -> SqlforgeResult<Option<Value>> {
        let column = column.to_string();
        let row = self.first().await?;
        Ok(row.and_then(|r| r.get(&column).cloned()))
    }

    pub async fn count(self) -> SqlforgeResult<u64> {
        let mut this = self;
        this.ast.projection = vec![ProjectionItem::Raw(Raw::new("COUNT(*) AS sqlforge_count")?)];
        this.ast.limit = None;
        this.ast.offset = None;
        // Registered relations/aggregates would otherwise still be expanded
        // into the projection (§4.4.2 steps 2/3) alongside COUNT(*), which
        // is invalid under ONLY_FULL_GROUP_BY and is the wrong shape for a
        // scalar count regardless.
        this.ast.relations.clear();
        this.ast.aggregates.clear();
        let compiled = this.compile()?;
        let result = this.executor.query(&compiled.sql, compiled.params).await?;
        Ok(match result.rows.first().and_then(|r| r.get("sqlforge_count")) {
            Some(Value::I64(n)) => *n as u64,
            Some(Value::U64(n)) => *n,
            _ => 0,
        })
    }

    pub async fn execute(self) -> SqlforgeResult<MutateResult> {
        let compiled = self.compile()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %compiled.sql, params = compiled.params.len(), "sqlforge: dispatching mutation");
        self.executor.mutate(&compiled.sql, compiled.params).await
    }

    /// Offset-based chunking (C10). See [`crate::chunk::chunk`].
    pub async fn chunk<F>(self, size: u64, cb: F) -> SqlforgeResult<()>
    where
        F: FnMut(Vec<Row>, u64) -> ChunkControl + Send,
    {
        crate::chunk::chunk(self, size, cb).await
    }

    /// Key-based strictly-increasing chunking (C10). See
    /// [`crate::chunk::chunk_by_id`].
    pub async fn chunk_by_id<F>(self, size: u64, key_column: &str, cb: F) -> SqlforgeResult<()>
    where
        F: FnMut(Vec<Row>) -> ChunkControl + Send,
    {
        crate::chunk::chunk_by_id(self, size, key_column, cb).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_executor;

    fn users() -> QueryBuilder {
        builder("users", mock_executor()).unwrap()
    }

    #[test]
    fn simple_where_order_limit() {
        let qb = users().select(&["id", "name"]).unwrap().where_eq("status", "active").unwrap().order_by("name", "ASC").unwrap().limit(2).unwrap();
        assert_eq!(qb.to_sql().unwrap(), "SELECT id, name FROM users WHERE status = ? ORDER BY name ASC LIMIT 2");
        assert_eq!(qb.get_parameters().unwrap(), vec![Value::Str("active".into())]);
    }

    #[test]
    fn grouped_predicate() {
        let qb = users()
            .group(|q| q.where_eq("name", "John").unwrap().or_where_eq("name", "Jane"))
            .unwrap()
            .where_eq("status", "active")
            .unwrap();
        assert_eq!(qb.to_sql().unwrap(), "SELECT * FROM users WHERE (name = ? OR name = ?) AND status = ?");
        assert_eq!(
            qb.get_parameters().unwrap(),
            vec![Value::Str("John".into()), Value::Str("Jane".into()), Value::Str("active".into())]
        );
    }

    #[test]
    fn correlated_exists() {
        let qb = users()
            .where_has(
                "transactions",
                &["user_id"],
                &["id"],
                Some(Box::new(|q: QueryBuilder| q.where_eq("status", "completed"))),
            )
            .unwrap();
        let sql = qb.to_sql().unwrap();
        assert!(sql.contains("EXISTS (SELECT 1 FROM transactions WHERE transactions.user_id = users.id AND status = ?)"));
        assert_eq!(qb.get_parameters().unwrap(), vec![Value::Str("completed".into())]);
    }

    #[test]
    fn aggregate_alias_filter_rewrite() {
        let qb = users()
            .with_sum(("transactions", "total"), &["user_id"], &["id"], "amount", None)
            .unwrap()
            .where_("total", ">", 10000i64)
            .unwrap();
        let sql = qb.to_sql().unwrap();
        assert!(sql.contains("(SELECT SUM(amount) FROM transactions WHERE transactions.user_id = users.id) AS total"));
        assert!(sql.contains("(SELECT SUM(amount) FROM transactions WHERE transactions.user_id = users.id) > ?"));
        assert_eq!(qb.get_parameters().unwrap(), vec![Value::I64(10000)]);
    }

    #[test]
    fn where_in_empty_is_always_false_sentinel() {
        let qb = users().where_in("id", Vec::<i64>::new()).unwrap();
        assert_eq!(qb.to_sql().unwrap(), "SELECT * FROM users WHERE 1 = 0");
        assert!(qb.get_parameters().unwrap().is_empty());
    }

    #[test]
    fn where_not_in_empty_is_a_no_op() {
        let qb = users().where_not_in("id", Vec::<i64>::new()).unwrap();
        assert_eq!(qb.to_sql().unwrap(), "SELECT * FROM users");
    }

    #[test]
    fn limit_negative_fails_validation() {
        assert!(users().limit(-1).is_err());
    }

    #[test]
    fn limit_zero_is_accepted() {
        let qb = users().limit(0).unwrap();
        assert_eq!(qb.to_sql().unwrap(), "SELECT * FROM users LIMIT 0");
    }

    #[test]
    fn where_eq_matches_three_arg_where() {
        let a = users().where_eq("status", "active").unwrap();
        let b = users().where_("status", "=", "active").unwrap();
        assert_eq!(a.to_sql().unwrap(), b.to_sql().unwrap());
        assert_eq!(a.get_parameters().unwrap(), b.get_parameters().unwrap());
    }

    #[test]
    fn to_sql_is_idempotent() {
        let qb = users().where_eq("status", "active").unwrap();
        assert_eq!(qb.to_sql().unwrap(), qb.to_sql().unwrap());
    }
}
