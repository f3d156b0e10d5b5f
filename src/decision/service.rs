use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    attributes::BUCKETING_ID_ATTRIBUTE,
    bucketer::{Bucketer, CMAB_ENTITY_ID},
    cmab::CmabService,
    conditions::does_user_meet_audience_conditions,
    project_config::{Experiment, FeatureFlag, Holdout, ProjectConfig, Variation},
    user_profile::{UserProfile, UserProfileService, UserProfileTracker},
    AttributeValue, DecisionContext, Error, UserContext,
};

use super::{
    DecideOption, Decision, DecisionReasons, DecisionResult, DecisionSource, VariationResult,
};

/// Runs the decision waterfall for rules and feature flags.
///
/// The service holds no per-decision state: reasons and user profiles are allocated per call, so
/// a single instance can serve any number of threads. The only shared mutable state is the map
/// of forced variations set through [`DecisionService::set_forced_variation`].
pub struct DecisionService {
    bucketer: Bucketer,
    user_profile_service: Option<Box<dyn UserProfileService>>,
    cmab_service: Option<Box<dyn CmabService>>,
    /// User id to experiment id to variation id.
    forced_variation_map: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl DecisionService {
    pub fn new(
        user_profile_service: Option<Box<dyn UserProfileService>>,
        cmab_service: Option<Box<dyn CmabService>>,
    ) -> DecisionService {
        DecisionService {
            bucketer: Bucketer::new(),
            user_profile_service,
            cmab_service,
            forced_variation_map: Mutex::new(HashMap::new()),
        }
    }

    fn forced_variations(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, String>>> {
        self.forced_variation_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Force `user_id` into a variation of the experiment, or clear the forced variation if
    /// `variation_key` is `None`.
    ///
    /// Returns `false` if the experiment or the variation is not in the datafile.
    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        let experiment = match config.get_experiment_from_key(experiment_key) {
            Ok(experiment) => experiment,
            Err(err) => {
                log::error!(target: "optimizely", user_id, experiment_key; "{err}");
                return false;
            }
        };

        let Some(variation_key) = variation_key else {
            let mut forced_variations = self.forced_variations();
            if let Some(experiments) = forced_variations.get_mut(user_id) {
                experiments.remove(&experiment.id);
                if experiments.is_empty() {
                    forced_variations.remove(user_id);
                }
            }
            log::debug!(target: "optimizely", user_id, experiment_key;
                        "variation mapped to experiment {experiment_key:?} has been removed for user {user_id:?}");
            return true;
        };

        let Some(variation) = experiment.get_variation_by_key(variation_key) else {
            let err = Error::InvalidVariation(variation_key.to_owned());
            log::error!(target: "optimizely", user_id, experiment_key, variation_key; "{err}");
            return false;
        };

        self.forced_variations()
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment.id.clone(), variation.id.clone());
        log::debug!(target: "optimizely", user_id, experiment_key, variation_key;
                    "set variation {variation_key:?} for experiment {experiment_key:?} and user {user_id:?} in the forced variation map");
        true
    }

    /// Variation previously forced with [`DecisionService::set_forced_variation`].
    pub fn get_forced_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let experiment = match config.get_experiment_from_key(experiment_key) {
            Ok(experiment) => experiment,
            Err(err) => {
                log::error!(target: "optimizely", user_id, experiment_key; "{err}");
                return None;
            }
        };
        self.forced_variation_for(experiment, user_id, reasons)
    }

    fn forced_variation_for<'a>(
        &self,
        rule: &'a Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_id = self
            .forced_variations()
            .get(user_id)?
            .get(&rule.id)?
            .clone();

        let Some(variation) = rule.get_variation_by_id(&variation_id) else {
            log::debug!(target: "optimizely", user_id, rule_key = rule.key.as_str();
                        "forced variation {variation_id:?} is no longer in the datafile");
            return None;
        };

        let message = format!(
            "Variation {:?} is mapped to experiment {:?} and user {user_id:?} in the forced variation map.",
            variation.key, rule.key
        );
        log::debug!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
        reasons.info(message);
        Some(variation)
    }

    fn whitelisted_variation<'a>(
        rule: &'a Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_key = rule.forced_variations.get(user_id)?;

        match rule.get_variation_by_key(variation_key) {
            Some(variation) => {
                let message = format!("User {user_id:?} is forced in variation {variation_key:?}.");
                log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
                Some(variation)
            }
            None => {
                let message = format!(
                    "Variation {variation_key:?} is not in the datafile. Not activating user {user_id:?}."
                );
                log::warn!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
                None
            }
        }
    }

    fn stored_variation<'a>(
        rule: &'a Experiment,
        profile: &UserProfile,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let user_id = profile.user_id.as_str();
        let variation_id = profile.variation_id(&rule.id)?;

        match rule.get_variation_by_id(variation_id) {
            Some(variation) => {
                let message = format!(
                    "Found a stored decision. User {user_id:?} is in variation {:?} of experiment {:?}.",
                    variation.key, rule.key
                );
                log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
                Some(variation)
            }
            None => {
                let message = format!(
                    "User {user_id:?} was previously bucketed into variation ID {variation_id:?} for experiment {:?}, but no matching variation was found.",
                    rule.key
                );
                log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
                reasons.info(message);
                None
            }
        }
    }

    /// Id used for hashing: the `$opt_bucketing_id` attribute if it is a string, else the user id.
    pub fn get_bucketing_id<'u>(user: &'u UserContext, reasons: &mut DecisionReasons) -> &'u str {
        match user.attributes().get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(bucketing_id)) => bucketing_id,
            None | Some(AttributeValue::Null) => user.user_id(),
            Some(other) => {
                let message = format!(
                    "Bucketing ID attribute is not a string (found {}). Defaulted to user ID.",
                    other.type_name()
                );
                log::warn!(target: "optimizely", user_id = user.user_id(); "{message}");
                reasons.info(message);
                user.user_id()
            }
        }
    }

    /// Forced decision set on the user context for `context`, if it names a variation of the flag.
    pub fn validated_forced_decision<'a>(
        &self,
        config: &'a ProjectConfig,
        context: &DecisionContext,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let forced_decision = user.get_forced_decision(context)?;
        let user_id = user.user_id();
        let flag_key = context.flag_key.as_str();
        let target = match &context.rule_key {
            Some(rule_key) => format!("flag ({flag_key}), rule ({rule_key})"),
            None => format!("flag ({flag_key})"),
        };

        match config.get_flag_variation(flag_key, &forced_decision.variation_key) {
            Some(variation) => {
                let message = format!(
                    "Variation ({}) is mapped to {target} and user ({user_id}) in the forced decision map.",
                    variation.key
                );
                log::info!(target: "optimizely", user_id, flag_key; "{message}");
                reasons.info(message);
                Some(variation)
            }
            None => {
                let message = format!(
                    "Invalid variation is mapped to {target} and user ({user_id}) in the forced decision map."
                );
                log::warn!(target: "optimizely", user_id, flag_key; "{message}");
                reasons.info(message);
                None
            }
        }
    }

    /// Evaluate a single rule for the user.
    ///
    /// Stages, first hit wins: forced variation, whitelist, stored user profile, audience, then
    /// the prediction service for CMAB rules or bucketing for everything else. A fresh bucketing
    /// decision is recorded in `tracker`; persisting it is up to the caller.
    pub fn get_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        rule: &'a Experiment,
        user: &UserContext,
        tracker: Option<&mut UserProfileTracker<'_>>,
        options: &[DecideOption],
        reasons: &mut DecisionReasons,
    ) -> VariationResult<'a> {
        let user_id = user.user_id();

        if !rule.is_running() {
            let message = format!("Experiment {:?} is not running.", rule.key);
            log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
            reasons.info(message);
            return VariationResult::default();
        }

        if let Some(variation) = self.forced_variation_for(rule, user_id, reasons) {
            return variation.into();
        }

        if let Some(variation) = Self::whitelisted_variation(rule, user_id, reasons) {
            return variation.into();
        }

        // Predictions are never sticky.
        let ignore_user_profile =
            options.contains(&DecideOption::IgnoreUserProfileService) || rule.cmab.is_some();
        let mut tracker = if ignore_user_profile { None } else { tracker };

        if let Some(tracker) = tracker.as_deref_mut() {
            if let Some(variation) = Self::stored_variation(rule, tracker.user_profile(), reasons) {
                return variation.into();
            }
        }

        if !does_user_meet_audience_conditions(config, rule, &rule.key, user, reasons) {
            let message = format!(
                "User {user_id:?} does not meet conditions to be in experiment {:?}.",
                rule.key
            );
            log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
            reasons.info(message);
            return VariationResult::default();
        }

        let bucketing_id = Self::get_bucketing_id(user, reasons);

        if rule.cmab.is_some() {
            return self.get_decision_for_cmab_rule(
                config,
                rule,
                user,
                bucketing_id,
                options,
                reasons,
            );
        }

        let Some(variation) = self
            .bucketer
            .bucket(config, rule, bucketing_id, user_id, reasons)
        else {
            let message = format!("User {user_id:?} is in no variation.");
            log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
            reasons.info(message);
            return VariationResult::default();
        };

        if let Some(tracker) = tracker {
            tracker.update_user_profile(rule, variation);
        }
        variation.into()
    }

    /// Ask the prediction service for the variation of a CMAB rule.
    ///
    /// The user must first fall into the rule's CMAB traffic slice. Prediction failures are
    /// reported as error reasons and yield no variation.
    fn get_decision_for_cmab_rule<'a>(
        &self,
        config: &'a ProjectConfig,
        rule: &'a Experiment,
        user: &UserContext,
        bucketing_id: &str,
        options: &[DecideOption],
        reasons: &mut DecisionReasons,
    ) -> VariationResult<'a> {
        let user_id = user.user_id();
        let rule_key = rule.key.as_str();

        let entity_id = self
            .bucketer
            .bucket_to_entity_id(config, rule, bucketing_id, user_id, reasons);
        if entity_id.as_deref() != Some(CMAB_ENTITY_ID) {
            let message = format!(
                "User {user_id:?} not in CMAB experiment {rule_key:?} due to traffic allocation."
            );
            log::info!(target: "optimizely", user_id, rule_key; "{message}");
            reasons.info(message);
            return VariationResult::default();
        }

        let Some(cmab_service) = &self.cmab_service else {
            let message =
                format!("No CMAB service is available to decide experiment {rule_key:?}.");
            log::error!(target: "optimizely", user_id, rule_key; "{message}");
            reasons.error(message);
            return VariationResult::default();
        };

        let decision = match cmab_service.get_decision(config, user, &rule.id, options) {
            Ok(decision) => decision,
            Err(err) => {
                log::error!(target: "optimizely", user_id, rule_key; "CMAB decision failed: {err}");
                let message = format!("Failed to fetch CMAB data for experiment {rule_key:?}.");
                reasons.error(message);
                return VariationResult::default();
            }
        };

        let Some(variation) = rule.get_variation_by_id(&decision.variation_id) else {
            let message = format!(
                "CMAB returned variation ID {:?} which is not in experiment {rule_key:?}.",
                decision.variation_id
            );
            log::error!(target: "optimizely", user_id, rule_key; "{message}");
            reasons.error(message);
            return VariationResult::default();
        };

        let message = format!(
            "User {user_id:?} is in variation {:?} of CMAB experiment {rule_key:?}.",
            variation.key
        );
        log::info!(target: "optimizely",
                   user_id,
                   rule_key,
                   cmab_uuid = decision.cmab_uuid.as_str();
                   "{message}");
        reasons.info(message);

        VariationResult {
            variation: Some(variation),
            cmab_uuid: Some(decision.cmab_uuid),
        }
    }

    /// Evaluate an experiment rule of a flag, honoring a rule-level forced decision first.
    pub fn get_variation_from_experiment_rule<'a>(
        &self,
        config: &'a ProjectConfig,
        flag_key: &str,
        rule: &'a Experiment,
        user: &UserContext,
        tracker: Option<&mut UserProfileTracker<'_>>,
        options: &[DecideOption],
        reasons: &mut DecisionReasons,
    ) -> VariationResult<'a> {
        let context = DecisionContext::new(flag_key, Some(rule.key.clone()));
        if let Some(variation) = self.validated_forced_decision(config, &context, user, reasons) {
            return variation.into();
        }
        self.get_variation(config, rule, user, tracker, options, reasons)
    }

    /// Try the flag's experiments in order. The first one producing a variation wins.
    pub fn get_variation_for_feature_experiment<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        mut tracker: Option<&mut UserProfileTracker<'_>>,
        options: &[DecideOption],
        reasons: &mut DecisionReasons,
    ) -> Option<Decision<'a>> {
        let user_id = user.user_id();
        let flag_key = flag.key.as_str();

        for experiment_id in &flag.experiment_ids {
            let rule = match config.get_experiment_from_id(experiment_id) {
                Ok(rule) => rule,
                Err(err) => {
                    log::error!(target: "optimizely", flag_key; "{err}");
                    reasons.error(err.to_string());
                    continue;
                }
            };

            let result = self.get_variation_from_experiment_rule(
                config,
                flag_key,
                rule,
                user,
                tracker.as_deref_mut(),
                options,
                reasons,
            );
            if let Some(variation) = result.variation {
                let message = format!(
                    "The user {user_id:?} is bucketed into experiment {:?} of feature {flag_key:?}.",
                    rule.key
                );
                log::info!(target: "optimizely", user_id, flag_key; "{message}");
                reasons.info(message);
                return Some(Decision::new(
                    rule,
                    variation,
                    DecisionSource::FeatureTest,
                    result.cmab_uuid,
                ));
            }
        }

        let message = format!(
            "The user {user_id:?} is not bucketed into any of the experiments on the feature {flag_key:?}."
        );
        log::info!(target: "optimizely", user_id, flag_key; "{message}");
        reasons.info(message);
        None
    }

    /// Evaluate one targeting rule of a rollout, honoring a rule-level forced decision first.
    pub fn get_variation_from_delivery_rule<'a>(
        &self,
        config: &'a ProjectConfig,
        flag_key: &str,
        rule: &'a Experiment,
        logging_key: &str,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let context = DecisionContext::new(flag_key, Some(rule.key.clone()));
        if let Some(variation) = self.validated_forced_decision(config, &context, user, reasons) {
            return Some(variation);
        }

        let user_id = user.user_id();

        if !rule.is_running() {
            let message = format!("Targeting rule {logging_key:?} is not running.");
            log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
            reasons.info(message);
            return None;
        }

        if !does_user_meet_audience_conditions(config, rule, logging_key, user, reasons) {
            let message = format!(
                "User {user_id:?} does not meet audience conditions for targeting rule {logging_key:?}."
            );
            log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
            reasons.info(message);
            return None;
        }

        let message = format!(
            "User {user_id:?} meets audience conditions for targeting rule {logging_key:?}."
        );
        log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
        reasons.info(message);

        let bucketing_id = Self::get_bucketing_id(user, reasons);
        let variation = self
            .bucketer
            .bucket(config, rule, bucketing_id, user_id, reasons);

        let message = match variation {
            Some(_) => format!("User {user_id:?} bucketed into targeting rule {logging_key:?}."),
            None => format!("User {user_id:?} not bucketed into targeting rule {logging_key:?}."),
        };
        log::info!(target: "optimizely", user_id, rule_key = rule.key.as_str(); "{message}");
        reasons.info(message);

        variation
    }

    /// Try the targeting rules of the flag's rollout in order.
    ///
    /// A rule whose audience matches but which does not bucket the user does not end the rollout:
    /// evaluation continues with the next rule, down to "Everyone Else".
    pub fn get_variation_for_feature_rollout<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<Decision<'a>> {
        let flag_key = flag.key.as_str();

        if flag.rollout_id.is_empty() {
            let message = format!("Feature flag {flag_key:?} is not used in a rollout.");
            log::debug!(target: "optimizely", flag_key; "{message}");
            reasons.info(message);
            return None;
        }

        let rollout = match config.get_rollout_from_id(&flag.rollout_id) {
            Ok(rollout) => rollout,
            Err(err) => {
                log::error!(target: "optimizely", flag_key; "{err}");
                reasons.error(err.to_string());
                return None;
            }
        };

        let rule_count = rollout.experiments.len();
        for (index, rule) in rollout.experiments.iter().enumerate() {
            let logging_key = if index + 1 == rule_count {
                "Everyone Else".to_owned()
            } else {
                (index + 1).to_string()
            };

            if let Some(variation) = self.get_variation_from_delivery_rule(
                config,
                flag_key,
                rule,
                &logging_key,
                user,
                reasons,
            ) {
                return Some(Decision::new(rule, variation, DecisionSource::Rollout, None));
            }
        }

        None
    }

    /// Evaluate a single holdout: it must be running, its audience must match and the user must
    /// fall into its traffic allocation.
    pub fn get_variation_for_holdout<'a>(
        &self,
        config: &'a ProjectConfig,
        holdout: &'a Holdout,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<Decision<'a>> {
        let rule = &holdout.rule;
        let user_id = user.user_id();
        let holdout_key = rule.key.as_str();

        if !rule.is_running() {
            let message = format!("Holdout {holdout_key:?} is not running.");
            log::info!(target: "optimizely", user_id, holdout_key; "{message}");
            reasons.info(message);
            return None;
        }

        if !does_user_meet_audience_conditions(config, rule, holdout_key, user, reasons) {
            let message =
                format!("User {user_id:?} does not meet conditions for holdout {holdout_key:?}.");
            log::info!(target: "optimizely", user_id, holdout_key; "{message}");
            reasons.info(message);
            return None;
        }

        let message = format!("User {user_id:?} meets conditions for holdout {holdout_key:?}.");
        log::info!(target: "optimizely", user_id, holdout_key; "{message}");
        reasons.info(message);

        let bucketing_id = Self::get_bucketing_id(user, reasons);
        let Some(variation) = self
            .bucketer
            .bucket(config, rule, bucketing_id, user_id, reasons)
        else {
            let message = format!("User {user_id:?} is not bucketed into holdout {holdout_key:?}.");
            log::info!(target: "optimizely", user_id, holdout_key; "{message}");
            reasons.info(message);
            return None;
        };

        let message = format!(
            "User {user_id:?} is bucketed into holdout variation {:?}.",
            variation.key
        );
        log::info!(target: "optimizely", user_id, holdout_key; "{message}");
        reasons.info(message);
        Some(Decision::new(rule, variation, DecisionSource::Holdout, None))
    }

    /// Full flag waterfall: holdouts, then experiments, then rollout targeting rules.
    pub fn get_decision_for_flag<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        tracker: Option<&mut UserProfileTracker<'_>>,
        options: &[DecideOption],
        reasons: &mut DecisionReasons,
    ) -> Decision<'a> {
        let user_id = user.user_id();
        let flag_key = flag.key.as_str();

        for holdout in config.holdouts_for_flag(&flag.id) {
            if let Some(decision) = self.get_variation_for_holdout(config, holdout, user, reasons) {
                return decision;
            }
        }

        if let Some(decision) =
            self.get_variation_for_feature_experiment(config, flag, user, tracker, options, reasons)
        {
            return decision;
        }

        if let Some(decision) = self.get_variation_for_feature_rollout(config, flag, user, reasons)
        {
            let message = format!(
                "The user {user_id:?} is bucketed into a rollout for feature flag {flag_key:?}."
            );
            log::info!(target: "optimizely", user_id, flag_key; "{message}");
            reasons.info(message);
            return decision;
        }

        let message = format!(
            "The user {user_id:?} is not bucketed into a rollout for feature flag {flag_key:?}."
        );
        log::info!(target: "optimizely", user_id, flag_key; "{message}");
        reasons.info(message);
        Decision::default()
    }

    /// Decide every flag for the user.
    ///
    /// The user profile is loaded once before the first flag and saved once after the last one.
    /// Reasons collected while loading it are reported with every flag.
    pub fn get_variations_for_feature_list<'a>(
        &self,
        config: &'a ProjectConfig,
        flags: &[&FeatureFlag],
        user: &UserContext,
        options: &[DecideOption],
    ) -> Vec<DecisionResult<'a>> {
        let mut base_reasons =
            DecisionReasons::new(options.contains(&DecideOption::IncludeReasons));

        let user_profile_service = if options.contains(&DecideOption::IgnoreUserProfileService) {
            None
        } else {
            self.user_profile_service.as_deref()
        };
        let mut tracker = user_profile_service
            .map(|service| UserProfileTracker::new(user.user_id(), Some(service)));
        if let Some(tracker) = tracker.as_mut() {
            tracker.load_user_profile(&mut base_reasons);
        }

        let mut results = Vec::with_capacity(flags.len());
        for flag in flags {
            let mut reasons = base_reasons.clone();
            let decision = self.get_decision_for_flag(
                config,
                flag,
                user,
                tracker.as_mut(),
                options,
                &mut reasons,
            );
            results.push(DecisionResult { decision, reasons });
        }

        if let Some(tracker) = tracker.as_mut() {
            tracker.save_user_profile();
        }
        results
    }

    pub fn get_variation_for_feature<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &[DecideOption],
    ) -> DecisionResult<'a> {
        self.get_variations_for_feature_list(config, &[flag], user, options)
            .pop()
            .unwrap_or_default()
    }

    /// Decide a single experiment outside of any flag, loading and saving the user profile around
    /// it.
    pub fn get_variation_for_experiment<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user: &UserContext,
        options: &[DecideOption],
    ) -> DecisionResult<'a> {
        let mut reasons = DecisionReasons::new(options.contains(&DecideOption::IncludeReasons));

        let user_profile_service = if options.contains(&DecideOption::IgnoreUserProfileService) {
            None
        } else {
            self.user_profile_service.as_deref()
        };
        let mut tracker = user_profile_service
            .map(|service| UserProfileTracker::new(user.user_id(), Some(service)));
        if let Some(tracker) = tracker.as_mut() {
            tracker.load_user_profile(&mut reasons);
        }

        let result = self.get_variation(
            config,
            experiment,
            user,
            tracker.as_mut(),
            options,
            &mut reasons,
        );

        if let Some(tracker) = tracker.as_mut() {
            tracker.save_user_profile();
        }

        let decision = match result.variation {
            Some(variation) => Decision::new(
                experiment,
                variation,
                DecisionSource::Experiment,
                result.cmab_uuid,
            ),
            None => Decision::default(),
        };
        DecisionResult { decision, reasons }
    }
}
