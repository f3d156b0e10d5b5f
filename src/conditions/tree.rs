use serde_json::Value;

use super::{Tristate, UserAttributeCondition};

const AND: &str = "and";
const OR: &str = "or";
const NOT: &str = "not";

enum Operator {
    And,
    Or,
    Not,
}

/// A boolean condition tree with leaves of type `L`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode<L> {
    Leaf(L),
    And(Vec<ConditionNode<L>>),
    Or(Vec<ConditionNode<L>>),
    /// Only the first operand is evaluated. Further operands are kept but ignored.
    Not(Vec<ConditionNode<L>>),
}

/// Leaf of a rule's audience tree: either a reference to an audience or an inline condition.
#[derive(Debug, Clone, PartialEq)]
pub enum AudienceLeaf {
    AudienceId(String),
    Condition(UserAttributeCondition),
}

impl<L> ConditionNode<L> {
    /// Parse a JSON condition structure.
    ///
    /// An array whose first element is `"and"`, `"or"` or `"not"` is an operator node over the
    /// remaining elements. Any other array is an implicit `or` over all of its elements. Any
    /// non-array value is handed to `parse_leaf`.
    pub fn parse<E>(
        value: &Value,
        parse_leaf: &mut impl FnMut(&Value) -> Result<L, E>,
    ) -> Result<ConditionNode<L>, E> {
        let Value::Array(items) = value else {
            return parse_leaf(value).map(ConditionNode::Leaf);
        };

        let (operator, operands) = match items.first().and_then(Value::as_str) {
            Some(AND) => (Operator::And, &items[1..]),
            Some(OR) => (Operator::Or, &items[1..]),
            Some(NOT) => (Operator::Not, &items[1..]),
            _ => (Operator::Or, &items[..]),
        };

        let children = operands
            .iter()
            .map(|item| ConditionNode::parse(item, parse_leaf))
            .collect::<Result<Vec<_>, E>>()?;

        Ok(match operator {
            Operator::And => ConditionNode::And(children),
            Operator::Or => ConditionNode::Or(children),
            Operator::Not => ConditionNode::Not(children),
        })
    }

    /// Evaluate the tree, delegating leaves to `evaluate_leaf`.
    pub fn evaluate(&self, evaluate_leaf: &mut impl FnMut(&L) -> Tristate) -> Tristate {
        match self {
            ConditionNode::Leaf(leaf) => evaluate_leaf(leaf),
            ConditionNode::And(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(evaluate_leaf) {
                        Tristate::False => return Tristate::False,
                        Tristate::Unknown => saw_unknown = true,
                        Tristate::True => {}
                    }
                }
                if saw_unknown {
                    Tristate::Unknown
                } else {
                    Tristate::True
                }
            }
            ConditionNode::Or(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(evaluate_leaf) {
                        Tristate::True => return Tristate::True,
                        Tristate::Unknown => saw_unknown = true,
                        Tristate::False => {}
                    }
                }
                if saw_unknown {
                    Tristate::Unknown
                } else {
                    Tristate::False
                }
            }
            ConditionNode::Not(children) => match children.first() {
                Some(child) => child.evaluate(evaluate_leaf).negate(),
                None => Tristate::Unknown,
            },
        }
    }
}

impl AudienceLeaf {
    /// Parse a leaf of a rule audience tree. Strings are audience ids, objects are inline
    /// attribute conditions.
    pub(crate) fn parse(value: &Value) -> Result<AudienceLeaf, serde_json::Error> {
        match value {
            Value::String(id) => Ok(AudienceLeaf::AudienceId(id.clone())),
            Value::Number(id) => Ok(AudienceLeaf::AudienceId(id.to_string())),
            _ => UserAttributeCondition::parse(value).map(AudienceLeaf::Condition),
        }
    }
}
