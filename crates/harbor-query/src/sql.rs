//! Rendering of queries as parameterised `PostgreSQL` statements.
//!
//! Values are bound, never interpolated. Strings that parse as a UUID or an
//! RFC 3339 timestamp are bound with the matching column type so that they
//! compare against `uuid` and `timestamptz` columns.

use chrono::{DateTime, Utc};
use harbor_core::error::DomainError;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::filter::Predicate;
use crate::query::{Direction, Projection, Query};
use crate::relationships::LoadStep;
use crate::schema::SchemaRegistry;

/// Builder type produced by this module.
pub type PgQuery = QueryBuilder<'static, Postgres>;

/// Compiles a query into a `SELECT` statement.
///
/// Parent joins are `LEFT JOIN`s aliased by relationship path; under the
/// entity projection each joined row is returned as a JSON column named
/// after its alias.
///
/// # Errors
///
/// Returns `DomainError::UnknownModel` if a join targets an unregistered
/// model and `DomainError::InvalidQuery` if the limit or offset does not fit
/// in a `BIGINT`.
pub fn compile_select(query: &Query, registry: &SchemaRegistry) -> Result<PgQuery, DomainError> {
    let schema = query.schema();
    let root = quote(schema.table());

    let mut joins = Vec::with_capacity(query.joins().len());
    for join in query.joins() {
        let target = registry.get(join.relationship.target)?;
        let source = join.source_alias().map_or_else(|| root.clone(), |alias| quote(&alias));
        let alias = quote(&join.alias());
        joins.push(format!(
            " LEFT JOIN {} AS {alias} ON {source}.{} = {alias}.{}",
            quote(target.table()),
            quote(join.relationship.local_column),
            quote(join.relationship.remote_column),
        ));
    }

    let mut builder = PgQuery::new("SELECT ");
    match query.projection() {
        Projection::Entity => {
            builder.push(format!("{root}.*"));
            for join in query.joins() {
                let alias = quote(&join.alias());
                builder.push(format!(", row_to_json({alias}.*) AS {alias}"));
            }
        }
        Projection::Aggregate { column, func } => {
            let column = format!("{root}.{}", quote(column));
            builder.push(format!("{column}, {}({column})", func.as_sql()));
        }
    }
    builder.push(format!(" FROM {root}"));
    for join in joins {
        builder.push(join);
    }

    if !query.predicates().is_empty() {
        builder.push(" WHERE ");
        push_predicate(
            &mut builder,
            &root,
            &Predicate::All(query.predicates().to_vec()),
        );
    }

    if matches!(query.projection(), Projection::Aggregate { .. }) {
        let grouping: Vec<String> = query
            .effective_grouping()
            .iter()
            .map(|column| format!("{root}.{}", quote(column)))
            .collect();
        builder.push(format!(" GROUP BY {}", grouping.join(", ")));
    }

    if !query.order().is_empty() {
        let terms: Vec<String> = query
            .order()
            .iter()
            .map(|term| {
                let direction = match term.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{root}.{} {direction}", quote(term.column))
            })
            .collect();
        builder.push(format!(" ORDER BY {}", terms.join(", ")));
    }

    if let Some(limit) = query.limit() {
        builder.push(" LIMIT ");
        builder.push_bind(to_bigint("limit", limit)?);
    }
    if let Some(offset) = query.offset() {
        builder.push(" OFFSET ");
        builder.push_bind(to_bigint("offset", offset)?);
    }

    debug!(model = schema.name(), sql = builder.sql(), "compiled select");
    Ok(builder)
}

/// Compiles the secondary query for a batch-loaded child step: every target
/// row whose remote column is one of `keys`.
///
/// # Errors
///
/// Returns `DomainError::UnknownModel` if the step targets an unregistered
/// model.
pub fn compile_batch_load(
    registry: &SchemaRegistry,
    step: &LoadStep,
    keys: &[Value],
) -> Result<PgQuery, DomainError> {
    let target = registry.get(step.target())?;
    let table = quote(target.table());
    let mut builder = PgQuery::new(format!("SELECT {table}.* FROM {table} WHERE "));
    push_predicate(
        &mut builder,
        &table,
        &Predicate::In {
            column: step.relationship.remote_column,
            values: keys.to_vec(),
        },
    );
    Ok(builder)
}

fn to_bigint(clause: &str, n: u64) -> Result<i64, DomainError> {
    i64::try_from(n).map_err(|_| DomainError::InvalidQuery(format!("{clause} {n} is too large")))
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn push_predicate(builder: &mut PgQuery, table: &str, predicate: &Predicate) {
    let qualified = |column: &str| format!("{table}.{}", quote(column));
    match predicate {
        Predicate::Compare { column, value, .. } if value.is_null() => {
            builder.push(format!("{} IS NULL", qualified(column)));
        }
        Predicate::Compare { column, op, value } => {
            builder.push(format!("{} {} ", qualified(column), op.as_sql()));
            push_value(builder, value);
        }
        Predicate::In { values, .. } if values.is_empty() => {
            builder.push("FALSE");
        }
        Predicate::NotIn { values, .. } if values.is_empty() => {
            builder.push("TRUE");
        }
        Predicate::In { column, values } | Predicate::NotIn { column, values } => {
            let keyword = if matches!(predicate, Predicate::In { .. }) {
                "IN"
            } else {
                "NOT IN"
            };
            builder.push(format!("{} {keyword} (", qualified(column)));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, value);
            }
            builder.push(")");
        }
        Predicate::Between { column, low, high } => {
            builder.push(format!("{} BETWEEN ", qualified(column)));
            push_value(builder, low);
            builder.push(" AND ");
            push_value(builder, high);
        }
        Predicate::All(parts) if parts.is_empty() => {
            builder.push("TRUE");
        }
        Predicate::Any(parts) if parts.is_empty() => {
            builder.push("FALSE");
        }
        Predicate::All(parts) | Predicate::Any(parts) => {
            let joiner = if matches!(predicate, Predicate::All(_)) {
                " AND "
            } else {
                " OR "
            };
            builder.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    builder.push(joiner);
                }
                push_predicate(builder, table, part);
            }
            builder.push(")");
        }
    }
}

fn push_value(builder: &mut PgQuery, value: &Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                builder.push_bind(f);
            } else {
                builder.push_bind(n.to_string());
            }
        }
        Value::String(s) => {
            if let Ok(id) = Uuid::parse_str(s) {
                builder.push_bind(id);
            } else if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                builder.push_bind(at.with_timezone(&Utc));
            } else {
                builder.push_bind(s.clone());
            }
        }
        Value::Array(_) | Value::Object(_) => {
            builder.push_bind(sqlx::types::Json(value.clone()));
        }
    }
}
