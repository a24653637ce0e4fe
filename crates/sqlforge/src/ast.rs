//! Query AST (C3) and the types it is built from: predicate nodes, join
//! specs, relation specs, and aggregate specs (C5's Relation Spec Registry
//! is simply `QueryAst::relations` / `QueryAst::aggregates`).

use std::sync::Arc;

use crate::error::SqlforgeResult;
use crate::ident::Ident;
use crate::raw::Raw;
use crate::value::{IntoValue, Value};

/// Connective joining a predicate node to whatever was already emitted in
/// its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conn {
    And,
    Or,
}

impl Conn {
    pub fn as_sql(self) -> &'static str {
        match self {
            Conn::And => "AND",
            Conn::Or => "OR",
        }
    }
}

/// The right-hand side of a `Cmp` node: either a bound parameter, a raw
/// (unparameterized) expression, or the NULL sentinel used only with
/// `IS` / `IS NOT`.
#[derive(Debug, Clone)]
pub enum CmpValue {
    Value(Value),
    Raw(Raw),
    Null,
}

/// A single column or table-qualified key, or an equal-length tuple of them
/// for composite-key matching.
#[derive(Debug, Clone)]
pub enum KeySpec {
    Single(Ident),
    Composite(Vec<Ident>),
}

impl KeySpec {
    pub fn len(&self) -> usize {
        match self {
            KeySpec::Single(_) => 1,
            KeySpec::Composite(v) => v.len(),
        }
    }

    pub fn columns(&self) -> Vec<&Ident> {
        match self {
            KeySpec::Single(i) => vec![i],
            KeySpec::Composite(v) => v.iter().collect(),
        }
    }
}

/// A predicate node in the flat WHERE/HAVING node list. `GroupStart`/
/// `GroupEnd` delimit a nesting scope rather than forming a recursive tree;
/// the compiler tracks nesting with an explicit counter stack (see
/// `compiler::compile_predicates`).
#[derive(Debug, Clone)]
pub enum PredicateNode {
    Cmp { column: Ident, op: String, value: CmpValue, conn: Conn },
    In { column: Ident, values: Vec<Value>, negated: bool, conn: Conn },
    Between { column: Ident, lo: Value, hi: Value, negated: bool, conn: Conn },
    Like { column: Ident, pattern: String, conn: Conn },
    GroupStart { conn: Conn },
    GroupEnd,
    Exists { negated: bool, conn: Conn, subquery: Box<QueryAst> },
    AggregateSubquery { subquery: Box<QueryAst>, op: String, value: Value, conn: Conn },
    /// Internal use by the relation hydrator (C9) to emit composite-key
    /// tuple matches as `(fk_1 = ? AND ... ) OR (...)`. Never constructed
    /// from caller-facing builder methods.
    Raw { sql_fragment: String, params: Vec<Value>, conn: Conn },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// `on_expression` is accepted as an uninterpreted string: a deliberate
/// escape hatch (see DESIGN.md Open Question #2). Callers must not
/// interpolate external input into it.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub table: Ident,
    pub on_expression: String,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
}

/// Narrows a relation's query or an aggregate subquery's correlation.
/// Consumes and returns a builder (the DSL is all consuming-`self`, so a
/// `&mut QueryBuilder` callback could never call any of its own chaining
/// methods) and so must be `Fn`, not `FnOnce`: the same registration can be
/// replayed across multiple parent rows' follow-up queries. `Arc` keeps
/// `RelationSpec`/`AggregateSpec` cheaply `Clone`.
pub type FilterCallback = Arc<dyn Fn(crate::builder::QueryBuilder) -> SqlforgeResult<crate::builder::QueryBuilder> + Send + Sync>;

#[derive(Clone)]
pub struct RelationSpec {
    pub kind: RelationKind,
    pub related_table: Ident,
    pub relation_name: String,
    pub foreign_key: KeySpec,
    pub local_key: KeySpec,
    pub filter: Option<FilterCallback>,
}

impl std::fmt::Debug for RelationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationSpec")
            .field("kind", &self.kind)
            .field("related_table", &self.related_table)
            .field("relation_name", &self.relation_name)
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Sum,
    Count,
    Avg,
    Max,
    Min,
    Custom,
}

impl AggregateKind {
    pub fn as_sql_fn(self) -> &'static str {
        match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Count => "COUNT",
            AggregateKind::Avg => "AVG",
            AggregateKind::Max => "MAX",
            AggregateKind::Min => "MIN",
            AggregateKind::Custom => "",
        }
    }

    pub fn default_alias_suffix(self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Count => "count",
            AggregateKind::Avg => "avg",
            AggregateKind::Max => "max",
            AggregateKind::Min => "min",
            AggregateKind::Custom => "custom",
        }
    }
}

/// `COUNT` ignores `column_or_expression` (uses `*`). `CUSTOM` carries a
/// [`Raw`] expression.
#[derive(Debug, Clone)]
pub enum AggregateExpr {
    Column(Ident),
    Raw(Raw),
    Star,
}

#[derive(Clone)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    pub related_table: Ident,
    pub foreign_key: KeySpec,
    pub local_key: KeySpec,
    pub expr: AggregateExpr,
    pub alias: String,
    pub filter: Option<FilterCallback>,
}

impl std::fmt::Debug for AggregateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateSpec")
            .field("kind", &self.kind)
            .field("related_table", &self.related_table)
            .field("foreign_key", &self.foreign_key)
            .field("local_key", &self.local_key)
            .field("alias", &self.alias)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
}

/// A single projected item in a SELECT list.
#[derive(Debug, Clone)]
pub enum ProjectionItem {
    Star,
    TableStar(Ident),
    Column(Ident),
    Raw(Raw),
}

/// A value assigned to a column in an INSERT/UPDATE/UPSERT payload.
#[derive(Debug, Clone)]
pub enum MutationValue {
    Value(Value),
    Raw(Raw),
}

impl MutationValue {
    /// Wraps an ordinary bound value, e.g. `val("active")`.
    pub fn val(v: impl IntoValue) -> Self {
        MutationValue::Value(v.into_value())
    }

    /// Wraps a literal SQL fragment, e.g. `raw("balance + 1")` for an
    /// `ON DUPLICATE KEY UPDATE` clause.
    pub fn raw(fragment: impl Into<String>) -> SqlforgeResult<Self> {
        Ok(MutationValue::Raw(Raw::new(fragment)?))
    }
}

/// In-memory representation of a pending query. A builder owns exactly one
/// `QueryAst`; sub-builders created for EXISTS/aggregate subqueries and for
/// relation loading are owned transiently by the parent and destroyed
/// after compilation.
#[derive(Debug, Clone)]
pub struct QueryAst {
    pub kind: QueryKind,
    pub table: Option<Ident>,
    pub projection: Vec<ProjectionItem>,
    pub distinct: bool,
    pub joins: Vec<JoinSpec>,
    pub where_nodes: Vec<PredicateNode>,
    pub group_by: Vec<Ident>,
    pub having: Vec<PredicateNode>,
    pub order_by: Vec<(Ident, &'static str)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Single-row INSERT payload, or the SET list for UPDATE/UPSERT.
    pub mutation_payload: Option<Vec<(Ident, MutationValue)>>,
    /// Multi-row INSERT payload; every row must share the same column set.
    pub bulk_values: Option<Vec<Vec<(Ident, MutationValue)>>>,
    /// `ON DUPLICATE KEY UPDATE` clause for UPSERT.
    pub upsert_update: Option<Vec<(Ident, MutationValue)>>,
    pub relations: Vec<RelationSpec>,
    pub aggregates: Vec<AggregateSpec>,
    pub auto_added_columns: Vec<String>,
}

impl QueryAst {
    pub fn new(kind: QueryKind) -> Self {
        QueryAst {
            kind,
            table: None,
            projection: vec![ProjectionItem::Star],
            distinct: false,
            joins: Vec::new(),
            where_nodes: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            mutation_payload: None,
            bulk_values: None,
            upsert_update: None,
            relations: Vec::new(),
            aggregates: Vec::new(),
            auto_added_columns: Vec::new(),
        }
    }
}
