use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing user attributes.
///
/// # Examples
/// ```
/// # use optimizely::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Reserved attribute that overrides the user id for bucketing.
pub(crate) const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Largest magnitude a number may have to take part in numeric comparisons (2^53).
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

/// Value of a single user attribute.
///
/// Integers and floats share the `Number` representation, so `2` and `2.0` compare equal.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Name of the value type, used in type-mismatch diagnostics.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Null => "null",
        }
    }
}

/// Return `true` if `n` is usable in comparisons: not NaN/±Infinity and within ±2^53.
pub(crate) fn is_finite_number(n: f64) -> bool {
    n.is_finite() && n.abs() <= MAX_SAFE_NUMBER
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::{is_finite_number, AttributeValue};

    #[test]
    fn integers_and_floats_are_equal() {
        assert_eq!(AttributeValue::from(2), AttributeValue::from(2.0));
        assert_eq!(AttributeValue::from(2_i64), AttributeValue::Number(2.0));
    }

    #[test]
    fn deserializes_untagged() {
        let value: AttributeValue = serde_json::from_str("null").unwrap();
        assert_eq!(value, AttributeValue::Null);
        let value: AttributeValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, AttributeValue::Number(42.0));
        let value: AttributeValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(value.as_str(), Some("x"));
    }

    #[test]
    fn finite_number_bounds() {
        assert!(is_finite_number(9_007_199_254_740_992.0));
        assert!(!is_finite_number(9_007_199_254_740_994.0));
        assert!(!is_finite_number(f64::NAN));
        assert!(!is_finite_number(f64::NEG_INFINITY));
    }
}
