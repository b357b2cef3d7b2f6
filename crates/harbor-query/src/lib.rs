//! Harbor Query — the query side of the repository.
//!
//! A [`query::Query`] is a plain value describing what a repository read
//! should return: predicates built from `column__operator` conditions,
//! ordering, pagination, an optional aggregate projection with grouping, and
//! the eager-loading plan produced by walking the model's declared
//! relationships. Models are described by an explicit [`schema`] registry
//! instead of runtime attribute lookup. The [`sql`] module renders a query as
//! a parameterised `PostgreSQL` statement.

pub mod filter;
pub mod query;
pub mod relationships;
pub mod schema;
pub mod sql;
pub mod value;
