//! Filter conditions and the predicates they compile to.
//!
//! A condition is written as a `column__operator` key with a JSON value, e.g.
//! `("amount__gte", json!(100))`. Each `filter` call combines its conditions
//! under one [`LogicalOperator`]; the resulting [`Predicate`] tree can be
//! evaluated in memory or rendered as SQL.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use harbor_core::error::DomainError;
use serde_json::Value;

use crate::schema::ModelSchema;
use crate::value;

const SEPARATOR: &str = "__";

/// How the conditions of a single `filter` call are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogicalOperator {
    /// Every condition must hold.
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

impl FromStr for LogicalOperator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            other => Err(DomainError::InvalidCondition(format!(
                "unknown logical operator: {other}"
            ))),
        }
    }
}

/// Operator part of a condition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `eq`
    Eq,
    /// `gt`
    Gt,
    /// `gte`
    Gte,
    /// `lt`
    Lt,
    /// `lte`
    Lte,
    /// `in`, value is a list.
    In,
    /// `not_in`, value is a list.
    NotIn,
    /// `btw` or `between`, value is a `[low, high]` pair.
    Between,
    /// `range`, value is a list of `[low, high]` pairs, any of which may hold.
    Range,
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "in" => Ok(Self::In),
            "not_in" => Ok(Self::NotIn),
            "btw" | "between" => Ok(Self::Between),
            "range" => Ok(Self::Range),
            other => Err(DomainError::InvalidCondition(format!(
                "no such operation exists: {other}"
            ))),
        }
    }
}

/// Binary comparison between a column and a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl Comparison {
    /// SQL spelling of the comparison.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A parsed `column__operator = value` condition, not yet checked against a
/// schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column name.
    pub column: String,
    /// Operator.
    pub operator: Operator,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// Parses a condition key and pairs it with its value.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCondition` if the key is not exactly
    /// `column__operator` or names an unsupported operator.
    pub fn parse(key: &str, value: Value) -> Result<Self, DomainError> {
        let parts: Vec<&str> = key.split(SEPARATOR).collect();
        let [column, operator] = parts.as_slice() else {
            return Err(DomainError::InvalidCondition(format!(
                "invalid filter key: {key}"
            )));
        };
        if column.is_empty() || operator.is_empty() {
            return Err(DomainError::InvalidCondition(format!(
                "invalid filter key: {key}"
            )));
        }
        Ok(Self {
            column: (*column).to_owned(),
            operator: operator.parse()?,
            value,
        })
    }

    /// Checks the column against `schema` and the value against the
    /// operator, producing a predicate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` for an undeclared column and
    /// `DomainError::InvalidCondition` when the value has the wrong shape.
    pub fn into_predicate(self, schema: &ModelSchema) -> Result<Predicate, DomainError> {
        let column = schema.column_named(&self.column)?;
        let compare = |op: Comparison, value: Value| -> Result<Predicate, DomainError> {
            if value.is_null() && op != Comparison::Eq {
                return Err(shape_error(column, "a non-null operand"));
            }
            if !is_scalar(&value) {
                return Err(shape_error(column, "a scalar operand"));
            }
            Ok(Predicate::Compare { column, op, value })
        };
        match self.operator {
            Operator::Eq => compare(Comparison::Eq, self.value),
            Operator::Gt => compare(Comparison::Gt, self.value),
            Operator::Gte => compare(Comparison::Gte, self.value),
            Operator::Lt => compare(Comparison::Lt, self.value),
            Operator::Lte => compare(Comparison::Lte, self.value),
            Operator::In => Ok(Predicate::In {
                column,
                values: scalar_list(column, self.value)?,
            }),
            Operator::NotIn => Ok(Predicate::NotIn {
                column,
                values: scalar_list(column, self.value)?,
            }),
            Operator::Between => {
                let (low, high) = bounds(column, self.value)?;
                Ok(Predicate::Between { column, low, high })
            }
            Operator::Range => {
                let Value::Array(pairs) = self.value else {
                    return Err(shape_error(column, "a list of [low, high] pairs"));
                };
                let ranges = pairs
                    .into_iter()
                    .map(|pair| {
                        bounds(column, pair).map(|(low, high)| Predicate::Between {
                            column,
                            low,
                            high,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::Any(ranges))
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn shape_error(column: &str, expected: &str) -> DomainError {
    DomainError::InvalidCondition(format!("{column} expects {expected}"))
}

fn scalar_list(column: &str, value: Value) -> Result<Vec<Value>, DomainError> {
    match value {
        Value::Array(items) if items.iter().all(is_scalar) => Ok(items),
        _ => Err(shape_error(column, "a list of scalar values")),
    }
}

fn bounds(column: &str, value: Value) -> Result<(Value, Value), DomainError> {
    match value {
        Value::Array(items) if items.len() == 2 && items.iter().all(is_scalar) => {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (Some(low), Some(high)) => Ok((low, high)),
                _ => Err(shape_error(column, "a [low, high] pair")),
            }
        }
        _ => Err(shape_error(column, "a [low, high] pair")),
    }
}

/// A validated boolean expression over model columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column <op> value`. An `Eq` against `null` means `IS NULL`.
    Compare {
        /// Column name.
        column: &'static str,
        /// Comparison.
        op: Comparison,
        /// Operand.
        value: Value,
    },
    /// `column IN (values)`
    In {
        /// Column name.
        column: &'static str,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `column NOT IN (values)`
    NotIn {
        /// Column name.
        column: &'static str,
        /// Excluded values.
        values: Vec<Value>,
    },
    /// `column BETWEEN low AND high`, inclusive on both ends.
    Between {
        /// Column name.
        column: &'static str,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
    },
    /// Conjunction. Empty means true.
    All(Vec<Predicate>),
    /// Disjunction. Empty means false.
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Combines predicates under a logical operator.
    #[must_use]
    pub fn combine(operator: LogicalOperator, predicates: Vec<Predicate>) -> Self {
        match operator {
            LogicalOperator::And => Self::All(predicates),
            LogicalOperator::Or => Self::Any(predicates),
        }
    }

    /// Evaluates the predicate against a row, reading columns through
    /// `lookup`. Missing or null columns never satisfy a comparison other
    /// than `Eq` against `null`.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
        let read = |column: &str| lookup(column).unwrap_or(Value::Null);
        match self {
            Self::Compare { column, op, value } => {
                let actual = read(column);
                if value.is_null() {
                    return actual.is_null();
                }
                if actual.is_null() {
                    return false;
                }
                value::compare(&actual, value).is_some_and(|ordering| op.holds(ordering))
            }
            Self::In { column, values } => {
                let actual = read(column);
                !actual.is_null() && values.iter().any(|v| value::equals(&actual, v))
            }
            Self::NotIn { column, values } => {
                let actual = read(column);
                !actual.is_null() && !values.iter().any(|v| value::equals(&actual, v))
            }
            Self::Between { column, low, high } => {
                let actual = read(column);
                value::compare(&actual, low).is_some_and(Ordering::is_ge)
                    && value::compare(&actual, high).is_some_and(Ordering::is_le)
            }
            Self::All(predicates) => predicates.iter().all(|p| p.evaluate(lookup)),
            Self::Any(predicates) => predicates.iter().any(|p| p.evaluate(lookup)),
        }
    }
}
