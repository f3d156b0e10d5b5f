use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{
    configuration_store::ConfigurationStore,
    decision::{
        DecideOption, Decision, DecisionReasons, DecisionResult, DecisionService, DecisionSource,
    },
    notification::{DecisionNotification, NotificationCenter},
    project_config::{FeatureFlag, ProjectConfig},
    Attributes, ClientConfig, DecisionContext, Error, Result, UserContext,
};

/// Result of deciding a flag for a user.
///
/// A failed decision looks like a disabled flag without a variation. Why it failed is in
/// `reasons`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizelyDecision {
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub flag_key: String,
    pub rule_key: Option<String>,
    pub user_id: String,
    pub reasons: Vec<String>,
}

impl OptimizelyDecision {
    fn error(flag_key: &str, user: &UserContext, message: impl Into<String>) -> OptimizelyDecision {
        OptimizelyDecision {
            variation_key: None,
            enabled: false,
            flag_key: flag_key.to_owned(),
            rule_key: None,
            user_id: user.user_id().to_owned(),
            reasons: vec![message.into()],
        }
    }
}

/// A client for Optimizely feature experimentation.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use optimizely::{Attributes, ClientConfig};
/// let client = ClientConfig::from_datafile(r#"{"version": "4", "revision": "1"}"#)
///     .to_client()
///     .unwrap();
/// let user = client.create_user_context("user-1", Attributes::new());
/// let decision = client.decide(&user, "checkout_flow", &[]);
/// assert!(!decision.enabled);
/// ```
pub struct Client {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService,
    notification_center: NotificationCenter,
    default_decide_options: Vec<DecideOption>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(mut config: ClientConfig) -> Result<Client> {
        let configuration_store = Arc::new(ConfigurationStore::new());
        if let Some(datafile) = &config.datafile {
            configuration_store.set_configuration(ProjectConfig::from_json(datafile)?);
        }

        let cmab_service = config.take_cmab_service()?;
        Ok(Client {
            configuration_store,
            decision_service: DecisionService::new(config.user_profile_service, Some(cmab_service)),
            notification_center: NotificationCenter::new(),
            default_decide_options: config.default_decide_options,
        })
    }

    /// Replace the current datafile. Decisions in flight keep using the previous snapshot.
    pub fn update_config(&self, datafile: &str) -> Result<()> {
        let config = ProjectConfig::from_json(datafile)?;
        let revision = config.revision.clone();
        let previous = self.configuration_store.set_configuration(config);
        log::info!(target: "optimizely",
                   revision = revision.as_str(),
                   previous_revision = previous.as_ref().map(|config| config.revision.as_str());
                   "updated datafile");
        Ok(())
    }

    /// Current configuration snapshot, if a datafile has been provided.
    pub fn project_config(&self) -> Option<Arc<ProjectConfig>> {
        self.configuration_store.get_configuration()
    }

    pub fn notification_center(&self) -> &NotificationCenter {
        &self.notification_center
    }

    pub fn create_user_context(
        &self,
        user_id: impl Into<String>,
        attributes: Attributes,
    ) -> UserContext {
        UserContext::new(user_id, attributes)
    }

    /// Decide a single flag for the user.
    ///
    /// [`DecideOption::EnabledFlagsOnly`] has no effect here: the decision is returned whether
    /// the flag is enabled or not.
    pub fn decide(
        &self,
        user: &UserContext,
        flag_key: &str,
        options: &[DecideOption],
    ) -> OptimizelyDecision {
        let options = self.merged_options(options);
        self.decide_flags(user, &[flag_key], &options)
            .pop()
            .unwrap_or_else(|| OptimizelyDecision::error(flag_key, user, "No decision was made."))
    }

    /// Decide the given flags for the user, keyed by flag key.
    pub fn decide_for_keys(
        &self,
        user: &UserContext,
        flag_keys: &[&str],
        options: &[DecideOption],
    ) -> HashMap<String, OptimizelyDecision> {
        let options = self.merged_options(options);
        let enabled_flags_only = options.contains(&DecideOption::EnabledFlagsOnly);
        self.decide_flags(user, flag_keys, &options)
            .into_iter()
            .filter(|decision| !enabled_flags_only || decision.enabled)
            .map(|decision| (decision.flag_key.clone(), decision))
            .collect()
    }

    /// Decide every flag of the datafile for the user.
    pub fn decide_all(
        &self,
        user: &UserContext,
        options: &[DecideOption],
    ) -> HashMap<String, OptimizelyDecision> {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "optimizely", user_id = user.user_id();
                       "deciding all flags before a datafile has been provided");
            return HashMap::new();
        };
        let flag_keys: Vec<&str> = config
            .feature_flags()
            .iter()
            .map(|flag| flag.key.as_str())
            .collect();
        self.decide_for_keys(user, &flag_keys, options)
    }

    /// Variation key of an experiment for the user, deciding outside of any flag.
    ///
    /// Returns `None` if no datafile has been provided yet, the experiment is not in the datafile
    /// or the user gets no variation.
    pub fn get_variation(&self, experiment_key: &str, user: &UserContext) -> Option<String> {
        let user_id = user.user_id();
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "optimizely", experiment_key, user_id;
                       "evaluating an experiment before a datafile has been provided");
            return None;
        };

        let experiment = match config.get_experiment_from_key(experiment_key) {
            Ok(experiment) => experiment,
            Err(err) => {
                log::warn!(target: "optimizely", experiment_key, user_id; "{err}");
                return None;
            }
        };

        let result = self.decision_service.get_variation_for_experiment(
            &config,
            experiment,
            user,
            &self.default_decide_options,
        );
        let variation_key = result.decision.variation.map(|variation| variation.key.clone());

        log::trace!(target: "optimizely",
                    experiment_key,
                    user_id,
                    attributes:serde = user.attributes(),
                    variation_key:serde = &variation_key;
                    "evaluated an experiment");
        variation_key
    }

    /// Force the user into a variation of an experiment, or clear the forced variation with
    /// `None`. Returns `false` if the experiment or variation does not exist.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "optimizely", experiment_key, user_id;
                       "setting a forced variation before a datafile has been provided");
            return false;
        };
        self.decision_service
            .set_forced_variation(&config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        let config = self.configuration_store.get_configuration()?;
        let mut reasons = DecisionReasons::default();
        self.decision_service
            .get_forced_variation(&config, experiment_key, user_id, &mut reasons)
            .map(|variation| variation.key.clone())
    }

    fn merged_options(&self, options: &[DecideOption]) -> Vec<DecideOption> {
        let mut merged = self.default_decide_options.clone();
        merged.extend(
            options
                .iter()
                .filter(|option| !self.default_decide_options.contains(option)),
        );
        merged
    }

    /// Decide every key, in order, sending a notification for each decision.
    fn decide_flags(
        &self,
        user: &UserContext,
        flag_keys: &[&str],
        options: &[DecideOption],
    ) -> Vec<OptimizelyDecision> {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "optimizely", user_id = user.user_id();
                       "{}", Error::ConfigurationMissing);
            return flag_keys
                .iter()
                .map(|flag_key| {
                    OptimizelyDecision::error(
                        flag_key,
                        user,
                        "Optimizely SDK not configured properly yet.",
                    )
                })
                .collect();
        };
        let include_reasons = options.contains(&DecideOption::IncludeReasons);

        enum Pending<'a> {
            Invalid(String),
            Decided(DecisionResult<'a>),
            Waterfall(DecisionReasons),
        }

        let mut pending = Vec::with_capacity(flag_keys.len());
        let mut waterfall_flags: Vec<&FeatureFlag> = Vec::new();
        for flag_key in flag_keys {
            let flag = match config.get_feature_flag_from_key(flag_key) {
                Ok(flag) => flag,
                Err(err) => {
                    log::warn!(target: "optimizely", flag_key, user_id = user.user_id(); "{err}");
                    pending.push(Pending::Invalid(format!(
                        "No flag was tracked for key {flag_key:?}."
                    )));
                    continue;
                }
            };

            let mut reasons = DecisionReasons::new(include_reasons);
            let context = DecisionContext::new(*flag_key, None);
            match self
                .decision_service
                .validated_forced_decision(&config, &context, user, &mut reasons)
            {
                Some(variation) => pending.push(Pending::Decided(DecisionResult {
                    decision: Decision {
                        rule: None,
                        variation: Some(variation),
                        source: Some(DecisionSource::FeatureTest),
                        cmab_uuid: None,
                    },
                    reasons,
                })),
                None => {
                    waterfall_flags.push(flag);
                    pending.push(Pending::Waterfall(reasons));
                }
            }
        }

        let mut waterfall_results = self
            .decision_service
            .get_variations_for_feature_list(&config, &waterfall_flags, user, options)
            .into_iter();

        flag_keys
            .iter()
            .zip(pending)
            .map(|(flag_key, pending)| {
                let result = match pending {
                    Pending::Invalid(message) => {
                        return OptimizelyDecision::error(flag_key, user, message)
                    }
                    Pending::Decided(result) => result,
                    Pending::Waterfall(mut reasons) => {
                        let result = waterfall_results.next().unwrap_or_default();
                        reasons.extend(result.reasons);
                        DecisionResult {
                            decision: result.decision,
                            reasons,
                        }
                    }
                };
                self.make_decision(flag_key, user, result)
            })
            .collect()
    }

    fn make_decision(
        &self,
        flag_key: &str,
        user: &UserContext,
        result: DecisionResult<'_>,
    ) -> OptimizelyDecision {
        let DecisionResult { decision, reasons } = result;
        let decision_source = decision.source;
        let decision = OptimizelyDecision {
            variation_key: decision.variation.map(|variation| variation.key.clone()),
            enabled: decision.is_enabled(),
            flag_key: flag_key.to_owned(),
            rule_key: decision.rule.map(|rule| rule.key.clone()),
            user_id: user.user_id().to_owned(),
            reasons: reasons.to_report(),
        };

        log::trace!(target: "optimizely",
                    flag_key,
                    user_id = user.user_id(),
                    attributes:serde = user.attributes(),
                    decision:serde = &decision;
                    "decided a flag");

        self.notification_center.send_decision(&DecisionNotification {
            flag_key: decision.flag_key.clone(),
            user_id: decision.user_id.clone(),
            attributes: user.attributes().clone(),
            rule_key: decision.rule_key.clone(),
            variation_key: decision.variation_key.clone(),
            enabled: decision.enabled,
            decision_source,
            reasons: decision.reasons.clone(),
        });
        decision
    }
}
