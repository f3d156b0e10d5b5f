//! Audience condition evaluation.
//!
//! Conditions are parsed once, when the datafile is compiled, into [`ConditionNode`] trees.
//! Evaluation uses three-valued logic ([`Tristate`]) so that a condition that cannot be evaluated
//! (missing attribute, type mismatch, unsupported match type) does not silently turn into `false`
//! inside `not` operators.
mod attribute_evaluator;
mod audience;
mod tree;

pub use attribute_evaluator::{
    AttributeConditionEvaluator, ConditionType, MatchType, UserAttributeCondition,
};
pub(crate) use audience::does_user_meet_audience_conditions;
pub use tree::{AudienceLeaf, ConditionNode};

/// Result of evaluating a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tristate {
    True,
    False,
    /// The condition could not be evaluated.
    Unknown,
}

impl Tristate {
    /// Return `true` only for [`Tristate::True`]. `Unknown` is treated as not matching.
    pub fn is_true(self) -> bool {
        self == Tristate::True
    }

    fn negate(self) -> Tristate {
        match self {
            Tristate::True => Tristate::False,
            Tristate::False => Tristate::True,
            Tristate::Unknown => Tristate::Unknown,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}

impl std::fmt::Display for Tristate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Tristate::True => "TRUE",
            Tristate::False => "FALSE",
            Tristate::Unknown => "UNKNOWN",
        })
    }
}

/// Reasons a leaf condition evaluates to [`Tristate::Unknown`].
///
/// These never cross the public API boundary: the evaluator logs them and returns `Unknown`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionError {
    #[error("condition uses an unknown condition type")]
    UnknownConditionType,
    #[error("condition uses an unknown match type")]
    UnknownMatchType,
    #[error("condition has an unsupported condition value")]
    UnknownConditionValue,
    #[error("no value was passed for the user attribute")]
    MissingAttribute,
    #[error("a null value was passed for the user attribute")]
    NullAttribute,
    #[error("user attribute has an unexpected type")]
    InvalidAttributeType,
    #[error("user attribute number is not in the range [-2^53, +2^53]")]
    NonFiniteAttribute,
    #[error("invalid semantic version")]
    InvalidSemanticVersion,
}
