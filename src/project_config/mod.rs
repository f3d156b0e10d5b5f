//! Compiled, immutable view of a datafile.
//!
//! The datafile is parsed into wire structs and then compiled once into [`ProjectConfig`]: all
//! audience conditions are parsed into condition trees, lookup tables by id and key are built
//! and holdouts are indexed per flag. Nothing is recomputed at decision time.
use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::{
    conditions::{AudienceLeaf, ConditionNode, UserAttributeCondition},
    Error, Result,
};

mod models;

pub use models::{GroupPolicy, RuleStatus, TrafficAllocation};

use models::{
    AudienceWire, CmabWire, DatafileWire, ExperimentWire, FeatureFlagWire, GroupWire, HoldoutWire,
    RolloutWire, VariationWire,
};

/// Traffic allocation used for CMAB rules that do not specify one.
const DEFAULT_CMAB_TRAFFIC_ALLOCATION: u32 = 10_000;

/// A variation of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    pub id: String,
    pub key: String,
    pub feature_enabled: bool,
}

/// Contextual bandit settings of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmab {
    /// Ids of the attributes sent to the prediction service.
    pub attribute_ids: Vec<String>,
    /// Upper bound of the traffic slice that takes part in the bandit.
    pub traffic_allocation: u32,
}

/// An experiment, a rollout targeting rule or the rule part of a holdout.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: RuleStatus,
    /// Id of the group the experiment belongs to, if any.
    pub group_id: Option<String>,
    pub audience_ids: Vec<String>,
    /// Audience tree. `None` means the rule has no audience restriction.
    pub audience_conditions: Option<ConditionNode<AudienceLeaf>>,
    pub traffic_allocation: Vec<TrafficAllocation>,
    pub variations: Vec<Variation>,
    /// Whitelist: user id to variation key.
    pub forced_variations: HashMap<String, String>,
    pub cmab: Option<Cmab>,
}

/// A holdout rule together with the flags it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Holdout {
    pub rule: Experiment,
    pub included_flags: Vec<String>,
    pub excluded_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Audience {
    pub id: String,
    pub name: String,
    /// `None` if the audience carries no conditions. Such an audience never matches. An empty
    /// condition list is an empty `or` and evaluates to false.
    pub conditions: Option<ConditionNode<UserAttributeCondition>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    /// Empty if the flag has no rollout.
    pub rollout_id: String,
    pub experiment_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    pub id: String,
    /// Targeting rules in evaluation order. The last one is conventionally "Everyone Else".
    pub experiments: Vec<Experiment>,
}

/// Immutable configuration snapshot used for decisions.
///
/// Construct it with [`ProjectConfig::from_json`]. A snapshot is never mutated; configuration
/// updates replace the whole snapshot.
#[derive(Debug)]
pub struct ProjectConfig {
    pub revision: String,
    pub version: String,

    experiments: Vec<Experiment>,
    experiment_id_map: HashMap<String, usize>,
    experiment_key_map: HashMap<String, usize>,
    groups: HashMap<String, Group>,
    audiences: HashMap<String, Audience>,
    attribute_id_to_key: HashMap<String, String>,
    feature_flags: Vec<FeatureFlag>,
    flag_key_map: HashMap<String, usize>,
    rollouts: HashMap<String, Rollout>,
    /// Experiment id to ids of the flags using it.
    /// Flag key to all variations reachable from the flag's rules, deduplicated by id.
    flag_variations: HashMap<String, Vec<Variation>>,

    holdouts: Vec<Holdout>,
    /// Holdouts with no included flags, in datafile order.
    global_holdouts: Vec<usize>,
    /// Flag id to holdouts explicitly including it, in datafile order.
    included_holdouts: HashMap<String, Vec<usize>>,
    /// Flag id to holdouts explicitly excluding it.
    excluded_holdouts: HashMap<String, HashSet<usize>>,
}

impl ProjectConfig {
    /// Parse and compile a datafile.
    pub fn from_json(json: &str) -> Result<ProjectConfig> {
        let wire: DatafileWire = serde_json::from_str(json).map_err(|err| {
            log::warn!(target: "optimizely", "failed to parse datafile: {err:?}");
            Error::from(err)
        })?;
        compile(wire).map_err(|err| {
            log::warn!(target: "optimizely", "failed to compile datafile: {err:?}");
            Error::from(err)
        })
    }

    pub fn get_experiment_from_key(&self, key: &str) -> Result<&Experiment> {
        self.experiment_key_map
            .get(key)
            .map(|&idx| &self.experiments[idx])
            .ok_or_else(|| Error::InvalidExperimentKey(key.to_owned()))
    }

    pub fn get_experiment_from_id(&self, id: &str) -> Result<&Experiment> {
        self.experiment_id_map
            .get(id)
            .map(|&idx| &self.experiments[idx])
            .ok_or_else(|| Error::InvalidExperimentId(id.to_owned()))
    }

    /// All experiments, including experiments of groups, in datafile order.
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn get_feature_flag_from_key(&self, key: &str) -> Result<&FeatureFlag> {
        self.flag_key_map
            .get(key)
            .map(|&idx| &self.feature_flags[idx])
            .ok_or_else(|| Error::InvalidFlagKey(key.to_owned()))
    }

    /// All feature flags in datafile order.
    pub fn feature_flags(&self) -> &[FeatureFlag] {
        &self.feature_flags
    }

    pub fn get_rollout_from_id(&self, id: &str) -> Result<&Rollout> {
        self.rollouts
            .get(id)
            .ok_or_else(|| Error::InvalidRolloutId(id.to_owned()))
    }

    pub fn get_group(&self, id: &str) -> Result<&Group> {
        self.groups
            .get(id)
            .ok_or_else(|| Error::InvalidGroupId(id.to_owned()))
    }

    pub fn get_audience(&self, id: &str) -> Result<&Audience> {
        self.audiences
            .get(id)
            .ok_or_else(|| Error::InvalidAudienceId(id.to_owned()))
    }

    pub fn get_attribute_key(&self, id: &str) -> Option<&str> {
        self.attribute_id_to_key.get(id).map(String::as_str)
    }

    /// Find a variation by key among all variations reachable from the flag.
    pub fn get_flag_variation(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations
            .get(flag_key)?
            .iter()
            .find(|variation| variation.key == variation_key)
    }

    /// Holdouts applicable to the flag in evaluation order: global holdouts (except those
    /// excluding the flag) first, then holdouts explicitly including the flag.
    pub fn holdouts_for_flag(&self, flag_id: &str) -> Vec<&Holdout> {
        let excluded = self.excluded_holdouts.get(flag_id);
        let global = self
            .global_holdouts
            .iter()
            .filter(|idx| !excluded.is_some_and(|excluded| excluded.contains(*idx)));
        let included = self.included_holdouts.get(flag_id).into_iter().flatten();
        global
            .chain(included)
            .map(|&idx| &self.holdouts[idx])
            .collect()
    }

    pub fn holdouts(&self) -> &[Holdout] {
        &self.holdouts
    }
}

impl Experiment {
    pub fn is_running(&self) -> bool {
        self.status == RuleStatus::Running
    }

    pub fn get_variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.id == id)
    }

    pub fn get_variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.key == key)
    }
}

fn compile(wire: DatafileWire) -> std::result::Result<ProjectConfig, serde_json::Error> {
    let mut audiences = HashMap::new();
    // Typed audiences take precedence over legacy audiences with the same id.
    for audience in wire.audiences.into_iter().chain(wire.typed_audiences) {
        let audience = compile_audience(audience)?;
        audiences.insert(audience.id.clone(), audience);
    }

    let mut experiments = Vec::new();
    for experiment in wire.experiments {
        experiments.push(compile_experiment(experiment, None)?);
    }

    let mut groups = HashMap::new();
    for GroupWire {
        id,
        policy,
        traffic_allocation,
        experiments: group_experiments,
    } in wire.groups
    {
        for experiment in group_experiments {
            experiments.push(compile_experiment(experiment, Some(id.as_str()))?);
        }
        groups.insert(
            id.clone(),
            Group {
                id,
                policy,
                traffic_allocation,
            },
        );
    }

    let experiment_id_map = experiments
        .iter()
        .enumerate()
        .map(|(idx, experiment)| (experiment.id.clone(), idx))
        .collect::<HashMap<_, _>>();
    let experiment_key_map = experiments
        .iter()
        .enumerate()
        .map(|(idx, experiment)| (experiment.key.clone(), idx))
        .collect();

    let mut rollouts = HashMap::new();
    for RolloutWire {
        id,
        experiments: rules,
    } in wire.rollouts
    {
        let experiments = rules
            .into_iter()
            .map(|rule| compile_experiment(rule, None))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rollouts.insert(id.clone(), Rollout { id, experiments });
    }

    let feature_flags = wire
        .feature_flags
        .into_iter()
        .map(
            |FeatureFlagWire {
                 id,
                 key,
                 rollout_id,
                 experiment_ids,
             }| FeatureFlag {
                id,
                key,
                rollout_id,
                experiment_ids,
            },
        )
        .collect::<Vec<_>>();
    let flag_key_map = feature_flags
        .iter()
        .enumerate()
        .map(|(idx, flag)| (flag.key.clone(), idx))
        .collect();

    let mut flag_variations = HashMap::new();
    for flag in &feature_flags {
        let rules = flag
            .experiment_ids
            .iter()
            .filter_map(|id| experiment_id_map.get(id).map(|&idx| &experiments[idx]))
            .chain(
                rollouts
                    .get(&flag.rollout_id)
                    .into_iter()
                    .flat_map(|rollout| rollout.experiments.iter()),
            );
        let mut seen = HashSet::new();
        let mut variations = Vec::new();
        for variation in rules.flat_map(|rule| rule.variations.iter()) {
            if seen.insert(variation.id.as_str()) {
                variations.push(variation.clone());
            }
        }
        flag_variations.insert(flag.key.clone(), variations);
    }

    let mut holdouts = Vec::new();
    let mut global_holdouts = Vec::new();
    let mut included_holdouts: HashMap<String, Vec<usize>> = HashMap::new();
    let mut excluded_holdouts: HashMap<String, HashSet<usize>> = HashMap::new();
    for (
        idx,
        HoldoutWire {
            rule,
            included_flags,
            excluded_flags,
        },
    ) in wire.holdouts.into_iter().enumerate()
    {
        if included_flags.is_empty() {
            global_holdouts.push(idx);
        }
        for flag_id in &included_flags {
            included_holdouts
                .entry(flag_id.clone())
                .or_default()
                .push(idx);
        }
        for flag_id in &excluded_flags {
            excluded_holdouts
                .entry(flag_id.clone())
                .or_default()
                .insert(idx);
        }
        holdouts.push(Holdout {
            rule: compile_experiment(rule, None)?,
            included_flags,
            excluded_flags,
        });
    }

    let attribute_id_to_key = wire
        .attributes
        .into_iter()
        .map(|attribute| (attribute.id, attribute.key))
        .collect();

    Ok(ProjectConfig {
        revision: wire.revision,
        version: wire.version,
        experiments,
        experiment_id_map,
        experiment_key_map,
        groups,
        audiences,
        attribute_id_to_key,
        feature_flags,
        flag_key_map,
        rollouts,
        flag_variations,
        holdouts,
        global_holdouts,
        included_holdouts,
        excluded_holdouts,
    })
}

fn compile_experiment(
    experiment: ExperimentWire,
    group_id: Option<&str>,
) -> std::result::Result<Experiment, serde_json::Error> {
    let audience_conditions = match experiment.audience_conditions {
        // An explicitly empty tree overrides `audienceIds` and matches everyone.
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(Value::Null) | None if experiment.audience_ids.is_empty() => None,
        Some(Value::Null) | None => Some(ConditionNode::Or(
            experiment
                .audience_ids
                .iter()
                .map(|id| ConditionNode::Leaf(AudienceLeaf::AudienceId(id.clone())))
                .collect(),
        )),
        Some(conditions) => Some(ConditionNode::parse(&conditions, &mut AudienceLeaf::parse)?),
    };

    Ok(Experiment {
        id: experiment.id,
        key: experiment.key,
        status: experiment.status,
        group_id: group_id.map(str::to_owned),
        audience_ids: experiment.audience_ids,
        audience_conditions,
        traffic_allocation: experiment.traffic_allocation,
        variations: experiment
            .variations
            .into_iter()
            .map(compile_variation)
            .collect(),
        forced_variations: experiment.forced_variations,
        cmab: experiment.cmab.map(compile_cmab),
    })
}

fn compile_variation(variation: VariationWire) -> Variation {
    Variation {
        id: variation.id,
        key: variation.key,
        feature_enabled: variation.feature_enabled.unwrap_or(false),
    }
}

fn compile_cmab(cmab: CmabWire) -> Cmab {
    Cmab {
        attribute_ids: cmab.attribute_ids,
        traffic_allocation: cmab
            .traffic_allocation
            .unwrap_or(DEFAULT_CMAB_TRAFFIC_ALLOCATION),
    }
}

fn compile_audience(audience: AudienceWire) -> std::result::Result<Audience, serde_json::Error> {
    let conditions = match audience.conditions {
        // Legacy audiences carry their conditions JSON-encoded in a string.
        Value::String(encoded) => serde_json::from_str(&encoded)?,
        conditions => conditions,
    };

    let conditions = match conditions {
        Value::Null => None,
        conditions => Some(ConditionNode::parse(
            &conditions,
            &mut UserAttributeCondition::parse,
        )?),
    };

    Ok(Audience {
        id: audience.id,
        name: audience.name,
        conditions,
    })
}
