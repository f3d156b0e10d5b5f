use crate::{
    decision::DecisionReasons,
    project_config::{Experiment, ProjectConfig},
    UserContext,
};

use super::{AttributeConditionEvaluator, AudienceLeaf, Tristate, UserAttributeCondition};

/// Check whether the user satisfies the audience tree of `rule`.
///
/// Rules without an audience tree match everyone. An audience tree evaluating to
/// [`Tristate::Unknown`] does not match.
pub(crate) fn does_user_meet_audience_conditions(
    config: &ProjectConfig,
    rule: &Experiment,
    logging_key: &str,
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> bool {
    let Some(conditions) = &rule.audience_conditions else {
        let message =
            format!("Audiences for rule {logging_key:?} collectively evaluated to TRUE.");
        log::info!(target: "optimizely", rule_key = logging_key; "{message}");
        reasons.info(message);
        return true;
    };

    let evaluator = AttributeConditionEvaluator::new(user);
    let result = conditions.evaluate(&mut |leaf: &AudienceLeaf| match leaf {
        AudienceLeaf::Condition(condition) => evaluator.evaluate(condition),
        AudienceLeaf::AudienceId(id) => evaluate_audience(config, id, &evaluator),
    });

    let message = format!("Audiences for rule {logging_key:?} collectively evaluated to {result}.");
    log::info!(target: "optimizely", rule_key = logging_key, user_id = user.user_id(); "{message}");
    reasons.info(message);

    result.is_true()
}

fn evaluate_audience(
    config: &ProjectConfig,
    audience_id: &str,
    evaluator: &AttributeConditionEvaluator,
) -> Tristate {
    let audience = match config.get_audience(audience_id) {
        Ok(audience) => audience,
        Err(err) => {
            log::warn!(target: "optimizely", audience_id; "{err}");
            return Tristate::Unknown;
        }
    };

    let Some(conditions) = &audience.conditions else {
        log::debug!(target: "optimizely",
                    audience_id,
                    audience_name = audience.name.as_str();
                    "audience has no conditions");
        return Tristate::Unknown;
    };

    let result = conditions.evaluate(&mut |condition: &UserAttributeCondition| {
        evaluator.evaluate(condition)
    });
    log::debug!(target: "optimizely",
                audience_id,
                audience_name = audience.name.as_str();
                "audience evaluated to {result}");
    result
}
