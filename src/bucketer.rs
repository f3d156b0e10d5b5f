//! Deterministic traffic allocation.
use std::io::Cursor;

use crate::{
    decision::DecisionReasons,
    project_config::{Experiment, GroupPolicy, ProjectConfig, TrafficAllocation, Variation},
};

const HASH_SEED: u32 = 1;

/// Bucket values are in `[0, MAX_TRAFFIC_VALUE)`.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

/// Entity id of the synthetic traffic allocation used for CMAB rules.
pub(crate) const CMAB_ENTITY_ID: &str = "$";

/// 32-bit MurmurHash3 (x86 variant) of `input`.
pub(crate) fn murmur_hash(input: impl AsRef<[u8]>) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(input.as_ref()), HASH_SEED)
        .expect("reading from an in-memory buffer should never fail")
}

/// Map a bucketing key to a bucket value in `[0, MAX_TRAFFIC_VALUE)`.
pub fn bucket_value(bucketing_key: &str) -> u32 {
    let ratio = f64::from(murmur_hash(bucketing_key)) / 4_294_967_296.0;
    (ratio * f64::from(MAX_TRAFFIC_VALUE)).floor() as u32
}

/// Assigns users to traffic allocation ranges by hashing their bucketing id.
///
/// The bucketer holds no state, so a single instance can be shared by any number of threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bucketer;

impl Bucketer {
    pub fn new() -> Bucketer {
        Bucketer
    }

    /// Find the entity id of the range `bucketing_id` falls into under `parent_id`.
    ///
    /// Returns `Some("")` if the user lands in a range with an empty entity id (a sticky empty
    /// range) and `None` if no range covers the bucket value.
    pub fn find_bucket<'a>(
        &self,
        bucketing_id: &str,
        user_id: &str,
        parent_id: &str,
        allocations: &'a [TrafficAllocation],
        reasons: &mut DecisionReasons,
    ) -> Option<&'a str> {
        let bucketing_key = format!("{bucketing_id}{parent_id}");
        let bucket_value = bucket_value(&bucketing_key);

        let message = format!(
            "Assigned bucket {bucket_value} to user {user_id:?} with bucketing ID: {bucketing_id:?}."
        );
        log::debug!(target: "optimizely", user_id, parent_id; "{message}");
        reasons.info(message);

        let entity_id = allocations
            .iter()
            .find(|allocation| bucket_value < allocation.end_of_range)
            .map(|allocation| allocation.entity_id.as_str());

        if entity_id == Some("") {
            log::debug!(target: "optimizely", user_id, parent_id; "bucketed into an empty traffic range");
        }

        entity_id
    }

    /// Bucket the user into `rule`, returning the winning entity id.
    ///
    /// For rules in a random-policy group, the group is bucketed first and the user only proceeds
    /// if the group picked this rule. CMAB rules are bucketed against a single synthetic range
    /// ending at the CMAB traffic allocation, so the entity id is [`CMAB_ENTITY_ID`].
    pub fn bucket_to_entity_id(
        &self,
        config: &ProjectConfig,
        rule: &Experiment,
        bucketing_id: &str,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<String> {
        if let Some(group_id) = &rule.group_id {
            let group = match config.get_group(group_id) {
                Ok(group) => group,
                Err(err) => {
                    log::error!(target: "optimizely", rule_key = rule.key.as_str(); "{err}");
                    reasons.error(err.to_string());
                    return None;
                }
            };

            if group.policy == GroupPolicy::Random {
                let picked = self.find_bucket(
                    bucketing_id,
                    user_id,
                    group_id,
                    &group.traffic_allocation,
                    reasons,
                );
                match picked {
                    None | Some("") => {
                        let message = format!(
                            "User {user_id:?} is not in any experiment of group {group_id}."
                        );
                        log::info!(target: "optimizely", user_id, group_id = group_id.as_str(); "{message}");
                        reasons.info(message);
                        return None;
                    }
                    Some(picked) if picked != rule.id => {
                        let message = format!(
                            "User {user_id:?} is not in experiment {:?} of group {group_id}.",
                            rule.key
                        );
                        log::info!(target: "optimizely", user_id, group_id = group_id.as_str(); "{message}");
                        reasons.info(message);
                        return None;
                    }
                    Some(_) => {
                        let message = format!(
                            "User {user_id:?} is in experiment {:?} of group {group_id}.",
                            rule.key
                        );
                        log::info!(target: "optimizely", user_id, group_id = group_id.as_str(); "{message}");
                        reasons.info(message);
                    }
                }
            }
        }

        let cmab_allocation;
        let allocations = match &rule.cmab {
            Some(cmab) => {
                cmab_allocation = [TrafficAllocation {
                    entity_id: CMAB_ENTITY_ID.to_owned(),
                    end_of_range: cmab.traffic_allocation,
                }];
                &cmab_allocation[..]
            }
            None => &rule.traffic_allocation[..],
        };

        self.find_bucket(bucketing_id, user_id, &rule.id, allocations, reasons)
            .map(str::to_owned)
    }

    /// Bucket the user into a variation of `rule`.
    pub fn bucket<'a>(
        &self,
        config: &ProjectConfig,
        rule: &'a Experiment,
        bucketing_id: &str,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let entity_id = self.bucket_to_entity_id(config, rule, bucketing_id, user_id, reasons)?;
        if entity_id.is_empty() {
            return None;
        }

        let variation = rule.get_variation_by_id(&entity_id);
        match variation {
            Some(variation) => {
                let message = format!(
                    "User {user_id:?} is in variation {:?} of experiment {:?}.",
                    variation.key, rule.key
                );
                log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
            }
            None => {
                let message = format!(
                    "Bucketed into an invalid variation ID {entity_id:?} of experiment {:?}.",
                    rule.key
                );
                log::warn!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
            }
        }
        variation
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{bucket_value, Bucketer, CMAB_ENTITY_ID, MAX_TRAFFIC_VALUE};
    use crate::{
        decision::DecisionReasons,
        project_config::{ProjectConfig, TrafficAllocation},
    };

    fn allocation(ranges: &[(&str, u32)]) -> Vec<TrafficAllocation> {
        ranges
            .iter()
            .map(|(entity_id, end_of_range)| TrafficAllocation {
                entity_id: (*entity_id).to_owned(),
                end_of_range: *end_of_range,
            })
            .collect()
    }

    fn find_bucket(bucketing_id: &str, parent_id: &str, ranges: &[(&str, u32)]) -> Option<String> {
        let allocations = allocation(ranges);
        Bucketer::new()
            .find_bucket(
                bucketing_id,
                "user",
                parent_id,
                &allocations,
                &mut DecisionReasons::default(),
            )
            .map(str::to_owned)
    }

    #[test]
    fn golden_bucket_values() {
        assert_eq!(bucket_value("ppid11886780721"), 5254);
        assert_eq!(bucket_value("ppid21886780721"), 4299);
        assert_eq!(bucket_value("ppid21886780722"), 2434);
    }

    #[test]
    fn bucket_values_are_in_range() {
        for i in 0..1000 {
            let value = bucket_value(&format!("user-{i}experiment"));
            assert!(value < MAX_TRAFFIC_VALUE);
        }
    }

    #[test]
    fn first_range_above_bucket_value_wins() {
        let ranges = [("a", 3000), ("b", 6000), ("c", 10000)];
        // 5254
        assert_eq!(find_bucket("ppid1", "1886780721", &ranges).as_deref(), Some("b"));
        // 2434
        assert_eq!(find_bucket("ppid2", "1886780722", &ranges).as_deref(), Some("a"));
        // Range end is exclusive.
        assert_eq!(
            find_bucket("ppid1", "1886780721", &[("a", 5254), ("b", 5255)]).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn no_range_matched() {
        assert_eq!(find_bucket("ppid1", "1886780721", &[]), None);
        assert_eq!(find_bucket("ppid1", "1886780721", &[("a", 5000)]), None);
    }

    #[test]
    fn sticky_empty_range() {
        assert_eq!(
            find_bucket("ppid1", "1886780721", &[("", 6000), ("a", 10000)]).as_deref(),
            Some("")
        );
    }

    #[test]
    fn deterministic() {
        let ranges = [("a", 5000), ("b", 10000)];
        let first = find_bucket("some-user", "12345", &ranges);
        for _ in 0..10 {
            assert_eq!(find_bucket("some-user", "12345", &ranges), first);
        }
    }

    fn group_config() -> ProjectConfig {
        ProjectConfig::from_json(
            &json!({
                "version": "4",
                "groups": [{
                    "id": "1886780721",
                    "policy": "random",
                    "trafficAllocation": [
                        {"entityId": "1886780722", "endOfRange": 5000},
                        {"entityId": "1886780723", "endOfRange": 10000}
                    ],
                    "experiments": [
                        {"id": "1886780722", "key": "group_exp_1", "status": "Running",
                         "trafficAllocation": [{"entityId": "v3", "endOfRange": 5000}],
                         "variations": [{"id": "v3", "key": "c"}]},
                        {"id": "1886780723", "key": "group_exp_2", "status": "Running",
                         "trafficAllocation": [
                             {"entityId": "v1", "endOfRange": 5000},
                             {"entityId": "v2", "endOfRange": 10000}
                         ],
                         "variations": [{"id": "v1", "key": "a"}, {"id": "v2", "key": "b"}]}
                    ]
                }],
                "experiments": [
                    {"id": "1886780722", "key": "cmab_half", "status": "Running",
                     "cmab": {"attributeIds": [], "trafficAllocation": 5000}},
                    {"id": "1886780722", "key": "cmab_small", "status": "Running",
                     "cmab": {"attributeIds": [], "trafficAllocation": 4000}},
                    {"id": "1886780721", "key": "invalid_variation", "status": "Running",
                     "trafficAllocation": [{"entityId": "missing", "endOfRange": 10000}],
                     "variations": [{"id": "v1", "key": "a"}]}
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn random_group_picks_one_experiment() {
        let config = group_config();
        let bucketer = Bucketer::new();
        let exp_1 = config.get_experiment_from_key("group_exp_1").unwrap();
        let exp_2 = config.get_experiment_from_key("group_exp_2").unwrap();
        let mut reasons = DecisionReasons::default();

        // ppid1 -> group bucket 5254 -> group_exp_2 -> bucket 5948 -> v2
        assert_eq!(
            bucketer
                .bucket(&config, exp_2, "ppid1", "ppid1", &mut reasons)
                .map(|v| v.key.as_str()),
            Some("b")
        );
        assert_eq!(
            bucketer.bucket(&config, exp_1, "ppid1", "ppid1", &mut reasons),
            None
        );

        // ppid2 -> group bucket 4299 -> group_exp_1 -> bucket 2434 -> v3
        assert_eq!(
            bucketer
                .bucket(&config, exp_1, "ppid2", "ppid2", &mut reasons)
                .map(|v| v.key.as_str()),
            Some("c")
        );
        assert_eq!(
            bucketer.bucket(&config, exp_2, "ppid2", "ppid2", &mut reasons),
            None
        );
    }

    #[test]
    fn cmab_rules_use_synthetic_allocation() {
        let config = group_config();
        let bucketer = Bucketer::new();
        let mut reasons = DecisionReasons::default();

        // ppid1 + 1886780722 -> 4123
        let half = config.get_experiment_from_key("cmab_half").unwrap();
        assert_eq!(
            bucketer
                .bucket_to_entity_id(&config, half, "ppid1", "ppid1", &mut reasons)
                .as_deref(),
            Some(CMAB_ENTITY_ID)
        );
        // The synthetic entity id never resolves to a variation.
        assert_eq!(
            bucketer.bucket(&config, half, "ppid1", "ppid1", &mut reasons),
            None
        );

        let small = config.get_experiment_from_key("cmab_small").unwrap();
        assert_eq!(
            bucketer.bucket_to_entity_id(&config, small, "ppid1", "ppid1", &mut reasons),
            None
        );
    }

    #[test]
    fn unknown_variation_id_is_no_variation() {
        let config = group_config();
        let rule = config.get_experiment_from_key("invalid_variation").unwrap();
        let mut reasons = DecisionReasons::new(true);
        assert_eq!(
            Bucketer::new().bucket(&config, rule, "ppid1", "ppid1", &mut reasons),
            None
        );
        assert!(reasons
            .to_report()
            .iter()
            .any(|reason| reason.starts_with("Bucketed into an invalid variation ID")));
    }
}
