//! # sqlforge
//!
//! A fluent SQL query builder and relation hydrator for MySQL-compatible
//! databases.
//!
//! ## Features
//!
//! - **Parameterized by construction**: every scalar value reaches SQL
//!   text through a `?` placeholder; the only opt-out is the explicit
//!   [`raw::Raw`] marker.
//! - **Dynamic, not typed**: rows are maps (column name → [`value::Value`]),
//!   not generated structs — the compiled query shape is only known at
//!   runtime.
//! - **N+1-free eager loading**: registered relations and aggregates are
//!   resolved with one follow-up query each, not one per parent row.

pub mod ast;
pub mod builder;
pub mod chunk;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod hydrate;
pub mod ident;
pub mod postprocess;
pub mod raw;
pub mod value;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_support;

pub use ast::{JoinKind, RelationKind};
pub use builder::{builder, LikeSide, QueryBuilder, RelationTarget};
pub use chunk::ChunkControl;
pub use error::{SqlforgeError, SqlforgeResult};
pub use executor::{Executor, MutateResult, QueryResult, RelationValue, Row};
pub use raw::Raw;
pub use value::{IntoValue, Value};

#[cfg(feature = "pool")]
pub use executor::PoolExecutor;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_from_env, PoolConfig};

#[cfg(feature = "pool")]
pub use transaction::{transaction, TxBuilderFactory};
