//! The pending query a repository builds up between reads.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use harbor_core::error::DomainError;
use serde_json::{Number, Value};
use tracing::debug;

use crate::filter::{Condition, LogicalOperator, Predicate};
use crate::relationships::{self, JoinClause, LoadPath};
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::value;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort by.
    pub column: &'static str,
    /// Direction.
    pub direction: Direction,
}

impl OrderBy {
    /// Parses a field name, where a leading `-` means descending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` if the column is not declared.
    pub fn parse(field: &str, schema: &ModelSchema) -> Result<Self, DomainError> {
        let (name, direction) = match field.strip_prefix('-') {
            Some(name) => (name, Direction::Desc),
            None => (field, Direction::Asc),
        };
        Ok(Self {
            column: schema.column_named(name)?,
            direction,
        })
    }
}

/// Aggregate function for an aggregate projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// Number of non-null values.
    Count,
    /// Sum of the values.
    Sum,
    /// Arithmetic mean.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

impl FromStr for AggregateFunc {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(DomainError::InvalidQuery(format!(
                "unknown aggregate function: {other}"
            ))),
        }
    }
}

impl AggregateFunc {
    /// SQL function name.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Applies the function to one group's values. Nulls are ignored; every
    /// function except `count` returns null for a group with no values.
    #[must_use]
    pub fn apply(self, values: &[Value]) -> Value {
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        match self {
            Self::Count => Value::from(present.len()),
            Self::Sum => sum(&present).unwrap_or(Value::Null),
            Self::Avg => {
                let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
                if numbers.is_empty() {
                    return Value::Null;
                }
                #[allow(clippy::cast_precision_loss)]
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                Number::from_f64(mean).map_or(Value::Null, Value::Number)
            }
            Self::Min => extreme(&present, std::cmp::Ordering::Less),
            Self::Max => extreme(&present, std::cmp::Ordering::Greater),
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

fn sum(values: &[&Value]) -> Option<Value> {
    if values.is_empty() {
        return None;
    }
    let integers: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
    if let Some(integers) = integers {
        let total = integers.iter().try_fold(0_i64, |acc, n| acc.checked_add(*n));
        if let Some(total) = total {
            return Some(Value::from(total));
        }
    }
    let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
    Number::from_f64(total).map(Value::Number)
}

fn extreme(values: &[&Value], wanted: std::cmp::Ordering) -> Value {
    values
        .iter()
        .copied()
        .reduce(|best, candidate| {
            if value::compare(candidate, best) == Some(wanted) {
                candidate
            } else {
                best
            }
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// What each result row contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Whole aggregates.
    #[default]
    Entity,
    /// `(column, func(column))` per group.
    Aggregate {
        /// Aggregated column.
        column: &'static str,
        /// Aggregate function.
        func: AggregateFunc,
    },
}

/// A pending read against one model.
///
/// Successive `filter` calls are ANDed together; within one call the
/// conditions share a single [`LogicalOperator`].
#[derive(Debug, Clone)]
pub struct Query {
    schema: Arc<ModelSchema>,
    projection: Projection,
    predicates: Vec<Predicate>,
    order: Vec<OrderBy>,
    group_by: Vec<&'static str>,
    offset: Option<u64>,
    limit: Option<u64>,
    joins: Vec<JoinClause>,
    loads: Vec<LoadPath>,
}

impl Query {
    /// Creates an unfiltered query over `schema`.
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            projection: Projection::Entity,
            predicates: Vec::new(),
            order: Vec::new(),
            group_by: Vec::new(),
            offset: None,
            limit: None,
            joins: Vec::new(),
            loads: Vec::new(),
        }
    }

    /// Returns the query to its unfiltered state.
    pub fn reset(&mut self) {
        debug!(model = self.schema.name(), "query reset");
        *self = Self::new(Arc::clone(&self.schema));
    }

    /// Adds one group of conditions combined under `operator`.
    ///
    /// Every condition is validated before the query changes, so a failing
    /// call leaves the query untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCondition` for a malformed key, an
    /// unsupported operator or a badly shaped value, and
    /// `DomainError::AttributeNotFound` for an undeclared column.
    pub fn filter<I, K>(
        &mut self,
        operator: LogicalOperator,
        conditions: I,
    ) -> Result<&mut Self, DomainError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let predicates = conditions
            .into_iter()
            .map(|(key, value)| {
                Condition::parse(key.as_ref(), value)?.into_predicate(&self.schema)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !predicates.is_empty() {
            self.predicates
                .push(Predicate::combine(operator, predicates));
        }
        Ok(self)
    }

    /// Appends ordering terms. A leading `-` sorts descending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` for an undeclared column.
    pub fn order_by<I, S>(&mut self, fields: I) -> Result<&mut Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = fields
            .into_iter()
            .map(|field| OrderBy::parse(field.as_ref(), &self.schema))
            .collect::<Result<Vec<_>, _>>()?;
        self.order.extend(terms);
        Ok(self)
    }

    /// Selects page `page` (1-based) of `size` rows.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidQuery` if `page` or `size` is zero or the
    /// offset overflows.
    pub fn paginate(&mut self, page: u64, size: u64) -> Result<&mut Self, DomainError> {
        if page == 0 || size == 0 {
            return Err(DomainError::InvalidQuery(format!(
                "page and page size must be positive, got page={page} size={size}"
            )));
        }
        let offset = (page - 1)
            .checked_mul(size)
            .ok_or_else(|| DomainError::InvalidQuery(format!("page {page} is out of range")))?;
        self.offset = Some(offset);
        self.limit = Some(size);
        Ok(self)
    }

    /// Replaces the projection with `(attribute, func(attribute))`. Filters,
    /// ordering and pagination are kept.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` for an undeclared column and
    /// `DomainError::InvalidQuery` for an unknown function name.
    pub fn aggregate(&mut self, attribute: &str, func: &str) -> Result<&mut Self, DomainError> {
        let column = self.schema.column_named(attribute)?;
        let func = func.parse::<AggregateFunc>()?;
        self.projection = Projection::Aggregate { column, func };
        Ok(self)
    }

    /// Appends a grouping column.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` for an undeclared column.
    pub fn group_by(&mut self, attribute: &str) -> Result<&mut Self, DomainError> {
        let column = self.schema.column_named(attribute)?;
        if !self.group_by.contains(&column) {
            self.group_by.push(column);
        }
        Ok(self)
    }

    /// Plans eager loads. With no target every reachable relationship is
    /// planned and replaces earlier plans; with a target only the matching
    /// immediate relationship is added.
    ///
    /// # Errors
    ///
    /// Propagates planning errors from [`relationships::plan_all`] and
    /// [`relationships::plan_target`].
    pub fn load_relationships(
        &mut self,
        registry: &SchemaRegistry,
        target: Option<&str>,
    ) -> Result<&mut Self, DomainError> {
        let plan = match target {
            None => {
                let plan = relationships::plan_all(registry, self.schema.name())?;
                self.loads.clear();
                plan
            }
            Some(target) => relationships::plan_target(registry, self.schema.name(), target)?,
        };
        for path in plan.paths {
            if !self.loads.contains(&path) {
                self.loads.push(path);
            }
        }
        for join in plan.joins {
            if !self.joins.contains(&join) {
                self.joins.push(join);
            }
        }
        Ok(self)
    }

    /// A copy of this query limited to a single row.
    #[must_use]
    pub fn limit_one(&self) -> Self {
        let mut single = self.clone();
        single.limit = Some(1);
        single
    }

    /// Schema of the queried model.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Current projection.
    #[must_use]
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Filter groups, ANDed together.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Ordering terms in application order.
    #[must_use]
    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    /// Explicit grouping columns.
    #[must_use]
    pub fn group_by_columns(&self) -> &[&'static str] {
        &self.group_by
    }

    /// Columns rows are grouped by under an aggregate projection: the
    /// explicit grouping columns plus the aggregated column.
    #[must_use]
    pub fn effective_grouping(&self) -> Vec<&'static str> {
        let mut columns = self.group_by.clone();
        if let Projection::Aggregate { column, .. } = self.projection {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// Rows to skip.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Maximum rows to return.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Joins required by planned parent loads.
    #[must_use]
    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    /// Planned eager loads.
    #[must_use]
    pub fn loads(&self) -> &[LoadPath] {
        &self.loads
    }

    /// Returns `true` if nothing but the model has been set.
    #[must_use]
    pub fn is_base(&self) -> bool {
        self.projection == Projection::Entity
            && self.predicates.is_empty()
            && self.order.is_empty()
            && self.group_by.is_empty()
            && self.offset.is_none()
            && self.limit.is_none()
            && self.joins.is_empty()
            && self.loads.is_empty()
    }

    /// Returns `true` if a row satisfies every filter group.
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
        self.predicates.iter().all(|p| p.evaluate(lookup))
    }
}
