use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{AttributeValue, Attributes};

/// Flag (and optionally rule) a forced decision applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionContext {
    pub flag_key: String,
    /// `None` targets the flag as a whole.
    pub rule_key: Option<String>,
}

impl DecisionContext {
    pub fn new(flag_key: impl Into<String>, rule_key: Option<String>) -> DecisionContext {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key,
        }
    }
}

/// Variation a user is forced into for a [`DecisionContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedDecision {
    pub variation_key: String,
}

impl ForcedDecision {
    pub fn new(variation_key: impl Into<String>) -> ForcedDecision {
        ForcedDecision {
            variation_key: variation_key.into(),
        }
    }
}

/// A user for whom decisions are made: id, attributes, qualified segments and forced decisions.
///
/// Forced decisions may be updated through a shared reference and are safe to modify while
/// decisions for the same user are computed on other threads.
///
/// # Examples
/// ```
/// # use optimizely::{DecisionContext, ForcedDecision, UserContext};
/// let mut user = UserContext::new("user-1", Default::default());
/// user.set_attribute("age", 30);
/// user.set_forced_decision(
///     DecisionContext::new("checkout_flow", None),
///     ForcedDecision::new("treatment"),
/// );
/// ```
#[derive(Debug)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    qualified_segments: Option<HashSet<String>>,
    forced_decisions: Mutex<HashMap<DecisionContext, ForcedDecision>>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> UserContext {
        UserContext {
            user_id: user_id.into(),
            attributes,
            qualified_segments: None,
            forced_decisions: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Segments the user qualifies for. `None` if segments have not been fetched.
    pub fn qualified_segments(&self) -> Option<&HashSet<String>> {
        self.qualified_segments.as_ref()
    }

    pub fn set_qualified_segments(&mut self, segments: Option<HashSet<String>>) {
        self.qualified_segments = segments;
    }

    /// Return `true` if the user qualifies for `segment`. Always `false` if segments are unset.
    pub fn is_qualified_for(&self, segment: &str) -> bool {
        self.qualified_segments
            .as_ref()
            .is_some_and(|segments| segments.contains(segment))
    }

    /// Force a variation for the flag or rule. Replaces any previous forced decision for the same
    /// context.
    pub fn set_forced_decision(&self, context: DecisionContext, decision: ForcedDecision) -> bool {
        self.forced_decisions().insert(context, decision);
        true
    }

    pub fn get_forced_decision(&self, context: &DecisionContext) -> Option<ForcedDecision> {
        self.forced_decisions().get(context).cloned()
    }

    /// Remove the forced decision for `context`, returning `false` if there was none.
    pub fn remove_forced_decision(&self, context: &DecisionContext) -> bool {
        self.forced_decisions().remove(context).is_some()
    }

    pub fn remove_all_forced_decisions(&self) -> bool {
        self.forced_decisions().clear();
        true
    }

    fn forced_decisions(&self) -> MutexGuard<'_, HashMap<DecisionContext, ForcedDecision>> {
        self.forced_decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for UserContext {
    fn clone(&self) -> Self {
        UserContext {
            user_id: self.user_id.clone(),
            attributes: self.attributes.clone(),
            qualified_segments: self.qualified_segments.clone(),
            forced_decisions: Mutex::new(self.forced_decisions().clone()),
        }
    }
}
