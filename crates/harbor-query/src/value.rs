//! Comparison of column values.
//!
//! Columns are exchanged as `serde_json::Value`. Numbers compare as integers
//! when both sides fit in `i64` and as floats otherwise; strings compare
//! lexically, which also orders RFC 3339 timestamps in UTC correctly.
//! Values of different kinds are unordered.

use std::cmp::Ordering;

use serde_json::Value;

/// Orders two values of the same kind, or returns `None` when they are not
/// comparable.
#[must_use]
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Value equality with numeric coercion, so that `100` equals `100.0`.
#[must_use]
pub fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right).map_or_else(|| left == right, Ordering::is_eq)
}

/// Total order used for sorting result rows: nulls first, then values of the
/// same kind by [`compare`], then by kind.
#[must_use]
pub fn sort_key_cmp(left: &Value, right: &Value) -> Ordering {
    compare(left, right).unwrap_or_else(|| kind_rank(left).cmp(&kind_rank(right)))
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use serde_json::json;

    use super::{compare, equals, sort_key_cmp};

    #[test]
    fn test_integers_and_floats_compare_numerically() {
        assert_eq!(compare(&json!(100), &json!(99.5)), Some(Ordering::Greater));
        assert_eq!(compare(&json!(-3), &json!(2)), Some(Ordering::Less));
        assert!(equals(&json!(100), &json!(100.0)));
    }

    #[test]
    fn test_strings_compare_lexically() {
        assert_eq!(
            compare(&json!("2026-01-01T00:00:00+00:00"), &json!("2026-02-01T00:00:00+00:00")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_mixed_kinds_are_unordered() {
        assert_eq!(compare(&json!("1"), &json!(1)), None);
        assert!(!equals(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_sort_key_places_nulls_first() {
        assert_eq!(sort_key_cmp(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(sort_key_cmp(&json!("a"), &json!(null)), Ordering::Greater);
    }
}
