//! Decision waterfall.
//!
//! [`DecisionService`] decides which variation of a rule or feature flag a user gets. The stages
//! are tried in a fixed order and the first one producing a variation wins:
//!
//! - for a single rule: forced variation, whitelist, user profile, audience, CMAB or bucketing;
//! - for a flag: holdouts, then the flag's experiments, then its rollout targeting rules.
use serde::Serialize;

use crate::project_config::{Experiment, Variation};

mod reasons;
mod service;

pub use reasons::DecisionReasons;
pub use service::DecisionService;

/// Stage of the flag waterfall a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// Plain experiment, outside of any flag.
    Experiment,
    /// Experiment attached to a flag.
    FeatureTest,
    /// Rollout targeting rule.
    Rollout,
    Holdout,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DecisionSource::Experiment => "experiment",
            DecisionSource::FeatureTest => "feature-test",
            DecisionSource::Rollout => "rollout",
            DecisionSource::Holdout => "holdout",
        })
    }
}

/// Options changing how a decision is made or reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecideOption {
    /// Only return decisions for enabled flags from batch calls.
    EnabledFlagsOnly,
    /// Neither read nor write the user profile.
    IgnoreUserProfileService,
    /// Report informational reasons, not only errors.
    IncludeReasons,
    /// Always ask the prediction service, bypassing the CMAB cache.
    IgnoreCmabCache,
    /// Clear the whole CMAB cache before deciding.
    ResetCmabCache,
    /// Drop this user's cached CMAB decision before deciding.
    InvalidateUserCmabCache,
}

/// Variation picked by the waterfall and where it came from.
///
/// All fields are `None` if no stage produced a variation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision<'a> {
    pub rule: Option<&'a Experiment>,
    pub variation: Option<&'a Variation>,
    pub source: Option<DecisionSource>,
    /// Set when the variation was picked by the prediction service.
    pub cmab_uuid: Option<String>,
}

impl<'a> Decision<'a> {
    pub(crate) fn new(
        rule: &'a Experiment,
        variation: &'a Variation,
        source: DecisionSource,
        cmab_uuid: Option<String>,
    ) -> Decision<'a> {
        Decision {
            rule: Some(rule),
            variation: Some(variation),
            source: Some(source),
            cmab_uuid,
        }
    }

    /// Return `true` if the flag is on for this decision.
    pub fn is_enabled(&self) -> bool {
        self.variation
            .is_some_and(|variation| variation.feature_enabled)
    }
}

/// A [`Decision`] with the reasons collected while making it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionResult<'a> {
    pub decision: Decision<'a>,
    pub reasons: DecisionReasons,
}

/// Outcome of evaluating a single rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariationResult<'a> {
    pub variation: Option<&'a Variation>,
    pub cmab_uuid: Option<String>,
}

impl<'a> From<&'a Variation> for VariationResult<'a> {
    fn from(variation: &'a Variation) -> Self {
        VariationResult {
            variation: Some(variation),
            cmab_uuid: None,
        }
    }
}
