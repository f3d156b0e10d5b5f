//! Wire format of the datafile.
//!
//! These structs mirror the JSON document one to one and are only used as an intermediate step
//! before compiling into [`ProjectConfig`](super::ProjectConfig).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatafileWire {
    pub version: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub attributes: Vec<AttributeWire>,
    #[serde(default)]
    pub audiences: Vec<AudienceWire>,
    #[serde(default)]
    pub typed_audiences: Vec<AudienceWire>,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
    #[serde(default)]
    pub groups: Vec<GroupWire>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlagWire>,
    #[serde(default)]
    pub rollouts: Vec<RolloutWire>,
    #[serde(default)]
    pub holdouts: Vec<HoldoutWire>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AttributeWire {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AudienceWire {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Either a JSON-encoded string (legacy audiences) or the condition tree itself (typed
    /// audiences).
    #[serde(default)]
    pub conditions: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExperimentWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    /// `None` if missing. Takes precedence over `audience_ids` when present.
    #[serde(default)]
    pub audience_conditions: Option<serde_json::Value>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub variations: Vec<VariationWire>,
    /// User id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(default)]
    pub cmab: Option<CmabWire>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HoldoutWire {
    #[serde(flatten)]
    pub rule: ExperimentWire,
    #[serde(default)]
    pub included_flags: Vec<String>,
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CmabWire {
    #[serde(default)]
    pub attribute_ids: Vec<String>,
    #[serde(default)]
    pub traffic_allocation: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VariationWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupWire {
    pub id: String,
    #[serde(default)]
    pub policy: GroupPolicy,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureFlagWire {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub rollout_id: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RolloutWire {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<ExperimentWire>,
}

/// A single range of a traffic allocation. The range covers bucket values below `end_of_range`
/// that are not covered by the previous range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

/// Lifecycle status of a rule. Only [`RuleStatus::Running`] rules take part in decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuleStatus {
    Running,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
    #[default]
    #[serde(other)]
    Other,
}

/// How experiments of a group share traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Experiments are mutually exclusive: the group is bucketed first to pick one experiment.
    Random,
    #[default]
    #[serde(other)]
    Overlapping,
}
