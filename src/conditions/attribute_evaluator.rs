use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    attributes::is_finite_number, semantic_version, AttributeValue, UserContext,
};

use super::{ConditionError, Tristate};

/// A leaf condition matching a single user attribute (or qualified segment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAttributeCondition {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub condition_type: ConditionType,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub value: Value,
}

/// Type of a leaf condition. Only attribute-based types can be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    CustomAttribute,
    ThirdPartyDimension,
    Unknown(String),
}

/// How the condition value is compared against the user attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    Exact,
    Exists,
    Gt,
    Ge,
    Lt,
    Le,
    Substring,
    SemverEq,
    SemverGe,
    SemverGt,
    SemverLe,
    SemverLt,
    Qualified,
    Unknown(String),
}

impl UserAttributeCondition {
    pub(crate) fn parse(value: &Value) -> Result<UserAttributeCondition, serde_json::Error> {
        UserAttributeCondition::deserialize(value)
    }

    /// Match type of the condition. Conditions without one use exact matching.
    pub fn match_type(&self) -> &MatchType {
        self.match_type.as_ref().unwrap_or(&MatchType::Exact)
    }
}

impl Default for ConditionType {
    fn default() -> Self {
        ConditionType::Unknown(String::new())
    }
}

impl From<String> for ConditionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "custom_attribute" => ConditionType::CustomAttribute,
            "third_party_dimension" => ConditionType::ThirdPartyDimension,
            _ => ConditionType::Unknown(value),
        }
    }
}

impl From<ConditionType> for String {
    fn from(value: ConditionType) -> Self {
        match value {
            ConditionType::CustomAttribute => "custom_attribute".to_owned(),
            ConditionType::ThirdPartyDimension => "third_party_dimension".to_owned(),
            ConditionType::Unknown(s) => s,
        }
    }
}

impl From<String> for MatchType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "exact" => MatchType::Exact,
            "exists" => MatchType::Exists,
            "gt" => MatchType::Gt,
            "ge" => MatchType::Ge,
            "lt" => MatchType::Lt,
            "le" => MatchType::Le,
            "substring" => MatchType::Substring,
            "semver_eq" => MatchType::SemverEq,
            "semver_ge" => MatchType::SemverGe,
            "semver_gt" => MatchType::SemverGt,
            "semver_le" => MatchType::SemverLe,
            "semver_lt" => MatchType::SemverLt,
            "qualified" => MatchType::Qualified,
            _ => MatchType::Unknown(value),
        }
    }
}

impl From<MatchType> for String {
    fn from(value: MatchType) -> Self {
        let s = match value {
            MatchType::Exact => "exact",
            MatchType::Exists => "exists",
            MatchType::Gt => "gt",
            MatchType::Ge => "ge",
            MatchType::Lt => "lt",
            MatchType::Le => "le",
            MatchType::Substring => "substring",
            MatchType::SemverEq => "semver_eq",
            MatchType::SemverGe => "semver_ge",
            MatchType::SemverGt => "semver_gt",
            MatchType::SemverLe => "semver_le",
            MatchType::SemverLt => "semver_lt",
            MatchType::Qualified => "qualified",
            MatchType::Unknown(s) => return s,
        };
        s.to_owned()
    }
}

/// Evaluates leaf conditions against the attributes and segments of a single user.
pub struct AttributeConditionEvaluator<'a> {
    user: &'a UserContext,
}

impl<'a> AttributeConditionEvaluator<'a> {
    pub fn new(user: &'a UserContext) -> AttributeConditionEvaluator<'a> {
        AttributeConditionEvaluator { user }
    }

    /// Evaluate `condition`, returning [`Tristate::Unknown`] if it cannot be evaluated.
    pub fn evaluate(&self, condition: &UserAttributeCondition) -> Tristate {
        match self.try_evaluate(condition) {
            Ok(result) => result.into(),
            Err(err) => {
                self.log_unknown(condition, err);
                Tristate::Unknown
            }
        }
    }

    fn try_evaluate(&self, condition: &UserAttributeCondition) -> Result<bool, ConditionError> {
        if let ConditionType::Unknown(_) = condition.condition_type {
            return Err(ConditionError::UnknownConditionType);
        }

        let attribute = self.user.attributes().get(&condition.name);

        match condition.match_type() {
            MatchType::Unknown(_) => return Err(ConditionError::UnknownMatchType),
            MatchType::Exists => return Ok(attribute.is_some_and(|value| !value.is_null())),
            MatchType::Qualified => {
                let Value::String(segment) = &condition.value else {
                    return Err(ConditionError::UnknownConditionValue);
                };
                return Ok(self.user.is_qualified_for(segment));
            }
            _ => {}
        }

        let attribute = match attribute {
            None => return Err(ConditionError::MissingAttribute),
            Some(AttributeValue::Null) => return Err(ConditionError::NullAttribute),
            Some(value) => value,
        };

        let value = &condition.value;
        match condition.match_type() {
            MatchType::Exact => exact(value, attribute),
            MatchType::Gt => Ok(compare_numbers(value, attribute)?.is_gt()),
            MatchType::Ge => Ok(compare_numbers(value, attribute)?.is_ge()),
            MatchType::Lt => Ok(compare_numbers(value, attribute)?.is_lt()),
            MatchType::Le => Ok(compare_numbers(value, attribute)?.is_le()),
            MatchType::Substring => substring(value, attribute),
            MatchType::SemverEq => Ok(compare_versions(value, attribute)?.is_eq()),
            MatchType::SemverGe => Ok(compare_versions(value, attribute)?.is_ge()),
            MatchType::SemverGt => Ok(compare_versions(value, attribute)?.is_gt()),
            MatchType::SemverLe => Ok(compare_versions(value, attribute)?.is_le()),
            MatchType::SemverLt => Ok(compare_versions(value, attribute)?.is_lt()),
            MatchType::Exists | MatchType::Qualified | MatchType::Unknown(_) => {
                // handled above
                Err(ConditionError::UnknownMatchType)
            }
        }
    }

    fn log_unknown(&self, condition: &UserAttributeCondition, err: ConditionError) {
        let attribute = condition.name.as_str();
        match err {
            ConditionError::MissingAttribute | ConditionError::NullAttribute => {
                log::debug!(target: "optimizely",
                            condition:serde = condition,
                            attribute;
                            "audience condition evaluated to UNKNOWN: {err}");
            }
            ConditionError::InvalidAttributeType => {
                let found = self
                    .user
                    .attributes()
                    .get(attribute)
                    .map_or("undefined", AttributeValue::type_name);
                log::warn!(target: "optimizely",
                           condition:serde = condition,
                           attribute;
                           "audience condition evaluated to UNKNOWN because a value of type {found:?} was passed for user attribute {attribute:?}");
            }
            ConditionError::InvalidSemanticVersion => {
                log::warn!(target: "optimizely",
                           condition:serde = condition,
                           attribute;
                           "audience condition evaluated to UNKNOWN because of invalid semantic version input");
            }
            ConditionError::UnknownConditionType
            | ConditionError::UnknownMatchType
            | ConditionError::UnknownConditionValue => {
                log::warn!(target: "optimizely",
                           condition:serde = condition;
                           "{err}, you may need to upgrade to a newer release of the SDK");
            }
            ConditionError::NonFiniteAttribute => {
                log::warn!(target: "optimizely",
                           condition:serde = condition,
                           attribute;
                           "audience condition evaluated to UNKNOWN: {err}");
            }
        }
    }
}

fn exact(condition_value: &Value, attribute: &AttributeValue) -> Result<bool, ConditionError> {
    match (condition_value, attribute) {
        (Value::String(expected), AttributeValue::String(actual)) => Ok(expected == actual),
        (Value::Bool(expected), AttributeValue::Boolean(actual)) => Ok(expected == actual),
        (Value::Number(_), _) => Ok(compare_numbers(condition_value, attribute)?.is_eq()),
        (Value::String(_) | Value::Bool(_), _) => Err(ConditionError::InvalidAttributeType),
        _ => Err(ConditionError::UnknownConditionValue),
    }
}

fn compare_numbers(
    condition_value: &Value,
    attribute: &AttributeValue,
) -> Result<Ordering, ConditionError> {
    let expected = condition_value
        .as_f64()
        .filter(|n| is_finite_number(*n))
        .ok_or(ConditionError::UnknownConditionValue)?;
    let AttributeValue::Number(actual) = attribute else {
        return Err(ConditionError::InvalidAttributeType);
    };
    if !is_finite_number(*actual) {
        return Err(ConditionError::NonFiniteAttribute);
    }
    actual
        .partial_cmp(&expected)
        .ok_or(ConditionError::NonFiniteAttribute)
}

fn substring(condition_value: &Value, attribute: &AttributeValue) -> Result<bool, ConditionError> {
    let Value::String(expected) = condition_value else {
        return Err(ConditionError::UnknownConditionValue);
    };
    let AttributeValue::String(actual) = attribute else {
        return Err(ConditionError::InvalidAttributeType);
    };
    Ok(actual.contains(expected.as_str()))
}

fn compare_versions(
    condition_value: &Value,
    attribute: &AttributeValue,
) -> Result<Ordering, ConditionError> {
    let Value::String(target) = condition_value else {
        return Err(ConditionError::UnknownConditionValue);
    };
    // A non-string version is reported the same way as a malformed one.
    let AttributeValue::String(user) = attribute else {
        return Err(ConditionError::InvalidSemanticVersion);
    };
    semantic_version::compare(target, user)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AttributeConditionEvaluator, MatchType, UserAttributeCondition};
    use crate::{conditions::Tristate, AttributeValue, UserContext};

    fn condition(match_type: &str, value: serde_json::Value) -> UserAttributeCondition {
        UserAttributeCondition::parse(&json!({
            "name": "attr",
            "type": "custom_attribute",
            "match": match_type,
            "value": value,
        }))
        .unwrap()
    }

    fn eval_with(condition: &UserAttributeCondition, attr: Option<AttributeValue>) -> Tristate {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut user = UserContext::new("user", Default::default());
        if let Some(attr) = attr {
            user.set_attribute("attr", attr);
        }
        AttributeConditionEvaluator::new(&user).evaluate(condition)
    }

    fn eval(
        match_type: &str,
        value: serde_json::Value,
        attr: impl Into<AttributeValue>,
    ) -> Tristate {
        eval_with(&condition(match_type, value), Some(attr.into()))
    }

    #[test]
    fn parses_match_and_condition_types() {
        let c = UserAttributeCondition::parse(&json!({
            "name": "browser",
            "type": "custom_attribute",
            "value": "safari",
        }))
        .unwrap();
        assert_eq!(c.match_type(), &MatchType::Exact);

        let c = condition("regex", json!("x"));
        assert_eq!(c.match_type(), &MatchType::Unknown("regex".to_owned()));
    }

    #[test]
    fn exact_strings_and_bools() {
        assert_eq!(eval("exact", json!("firefox"), "firefox"), Tristate::True);
        assert_eq!(eval("exact", json!("firefox"), "chrome"), Tristate::False);
        assert_eq!(eval("exact", json!(true), true), Tristate::True);
        assert_eq!(eval("exact", json!(true), false), Tristate::False);
    }

    #[test]
    fn exact_numbers_across_representations() {
        assert_eq!(eval("exact", json!(2), 2.0), Tristate::True);
        assert_eq!(eval("exact", json!(2.0), 2), Tristate::True);
        assert_eq!(eval("exact", json!(2.5), 2), Tristate::False);
    }

    #[test]
    fn exact_type_mismatch_is_unknown() {
        assert_eq!(eval("exact", json!("true"), true), Tristate::Unknown);
        assert_eq!(eval("exact", json!(true), "true"), Tristate::Unknown);
        assert_eq!(eval("exact", json!(1), "1"), Tristate::Unknown);
    }

    #[test]
    fn exact_rejects_unsupported_values() {
        assert_eq!(eval("exact", json!({"a": 1}), "a"), Tristate::Unknown);
        assert_eq!(eval("exact", json!(2), f64::INFINITY), Tristate::Unknown);
        assert_eq!(eval("exact", json!(2), f64::NAN), Tristate::Unknown);
        assert_eq!(
            eval("exact", json!(9_007_199_254_740_994_u64), 9_007_199_254_740_994.0),
            Tristate::Unknown
        );
    }

    #[test]
    fn missing_or_null_attribute_is_unknown() {
        let c = condition("exact", json!("x"));
        assert_eq!(eval_with(&c, None), Tristate::Unknown);
        assert_eq!(eval_with(&c, Some(AttributeValue::Null)), Tristate::Unknown);
        let c = condition("gt", json!(1));
        assert_eq!(eval_with(&c, None), Tristate::Unknown);
    }

    #[test]
    fn exists() {
        let c = condition("exists", serde_json::Value::Null);
        assert_eq!(eval_with(&c, None), Tristate::False);
        assert_eq!(eval_with(&c, Some(AttributeValue::Null)), Tristate::False);
        assert_eq!(eval_with(&c, Some("".into())), Tristate::True);
        assert_eq!(eval_with(&c, Some(false.into())), Tristate::True);
        assert_eq!(eval_with(&c, Some(0.into())), Tristate::True);
    }

    #[test]
    fn numeric_comparisons() {
        assert_eq!(eval("gt", json!(10), 11), Tristate::True);
        assert_eq!(eval("gt", json!(10), 10), Tristate::False);
        assert_eq!(eval("ge", json!(10), 10), Tristate::True);
        assert_eq!(eval("ge", json!(10.5), 10), Tristate::False);
        assert_eq!(eval("lt", json!(10), 9.99), Tristate::True);
        assert_eq!(eval("lt", json!(10), 10), Tristate::False);
        assert_eq!(eval("le", json!(10), 10), Tristate::True);
        assert_eq!(eval("le", json!(10), 11), Tristate::False);
    }

    #[test]
    fn numeric_comparison_requires_numbers() {
        assert_eq!(eval("gt", json!(10), "11"), Tristate::Unknown);
        assert_eq!(eval("gt", json!("10"), 11), Tristate::Unknown);
        assert_eq!(eval("lt", json!(10), true), Tristate::Unknown);
        assert_eq!(eval("le", json!(10), f64::NEG_INFINITY), Tristate::Unknown);
    }

    #[test]
    fn substring() {
        assert_eq!(eval("substring", json!("chrome"), "chrome 89"), Tristate::True);
        assert_eq!(eval("substring", json!("safari"), "chrome 89"), Tristate::False);
        assert_eq!(eval("substring", json!("1"), 10), Tristate::Unknown);
        assert_eq!(eval("substring", json!(1), "10"), Tristate::Unknown);
    }

    #[test]
    fn semver_match_types() {
        assert_eq!(eval("semver_eq", json!("2.0"), "2.0.1"), Tristate::True);
        assert_eq!(eval("semver_eq", json!("2.0.0"), "2.0.1"), Tristate::False);
        assert_eq!(eval("semver_gt", json!("2.0.0"), "2.0.1"), Tristate::True);
        assert_eq!(eval("semver_gt", json!("2.0.0"), "2.0.0"), Tristate::False);
        assert_eq!(eval("semver_ge", json!("2.0.0"), "2.0.0"), Tristate::True);
        assert_eq!(eval("semver_ge", json!("2.0.0"), "1.9"), Tristate::False);
        assert_eq!(eval("semver_lt", json!("2.0.0"), "1.9"), Tristate::True);
        assert_eq!(eval("semver_le", json!("2.0.0"), "2.0.0"), Tristate::True);
        assert_eq!(eval("semver_le", json!("2.0.0"), "2.0.1"), Tristate::False);
        assert_eq!(
            eval("semver_gt", json!("2.1.2-beta"), "2.1.2-release"),
            Tristate::True
        );
    }

    #[test]
    fn semver_invalid_input_is_unknown() {
        assert_eq!(eval("semver_eq", json!("2.0.0"), "2.0.0.1"), Tristate::Unknown);
        assert_eq!(eval("semver_eq", json!("2.0.0"), "2 .0"), Tristate::Unknown);
        assert_eq!(eval("semver_eq", json!("2.0.0"), 2), Tristate::Unknown);
        assert_eq!(eval("semver_eq", json!(2), "2.0.0"), Tristate::Unknown);
    }

    #[test]
    fn qualified_segments() {
        let c = condition("qualified", json!("odp-segment-1"));
        let mut user = UserContext::new("user", Default::default());
        // Segments not fetched.
        assert_eq!(AttributeConditionEvaluator::new(&user).evaluate(&c), Tristate::False);

        user.set_qualified_segments(Some(["odp-segment-1".to_owned()].into()));
        assert_eq!(AttributeConditionEvaluator::new(&user).evaluate(&c), Tristate::True);

        user.set_qualified_segments(Some(["odp-segment-2".to_owned()].into()));
        assert_eq!(AttributeConditionEvaluator::new(&user).evaluate(&c), Tristate::False);

        let c = condition("qualified", json!(1));
        assert_eq!(AttributeConditionEvaluator::new(&user).evaluate(&c), Tristate::Unknown);
    }

    #[test]
    fn unknown_types_are_unknown() {
        assert_eq!(eval("regex", json!("a"), "a"), Tristate::Unknown);

        let c = UserAttributeCondition::parse(&json!({
            "name": "attr",
            "type": "invalid",
            "match": "exact",
            "value": "a",
        }))
        .unwrap();
        assert_eq!(eval_with(&c, Some("a".into())), Tristate::Unknown);

        let c = UserAttributeCondition::parse(&json!({
            "name": "attr",
            "type": "third_party_dimension",
            "match": "exact",
            "value": "a",
        }))
        .unwrap();
        assert_eq!(eval_with(&c, Some("a".into())), Tristate::True);
    }
}
