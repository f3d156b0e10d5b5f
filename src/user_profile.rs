use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    decision::DecisionReasons,
    project_config::{Experiment, Variation},
};

/// Error type returned by [`UserProfileService`] implementations.
pub type UserProfileServiceError = Box<dyn std::error::Error + Send + Sync>;

/// Variation a user was previously bucketed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfileBucket {
    pub variation_id: String,
}

/// Sticky bucketing state of a single user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Experiment id to the variation the user was bucketed into.
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, UserProfileBucket>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> UserProfile {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    /// Variation id previously stored for the experiment.
    pub fn variation_id(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(|bucket| bucket.variation_id.as_str())
    }
}

/// Persistent storage of user profiles.
///
/// Errors returned from either method are logged and otherwise ignored: a failed lookup behaves
/// like an empty profile and a failed save only loses stickiness.
///
/// # Examples
/// ```
/// # use std::{collections::HashMap, sync::Mutex};
/// # use optimizely::{UserProfile, UserProfileService, UserProfileServiceError};
/// #[derive(Default)]
/// struct InMemoryProfiles(Mutex<HashMap<String, UserProfile>>);
///
/// impl UserProfileService for InMemoryProfiles {
///     fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError> {
///         Ok(self.0.lock().unwrap().get(user_id).cloned())
///     }
///
///     fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError> {
///         self.0.lock().unwrap().insert(profile.user_id.clone(), profile.clone());
///         Ok(())
///     }
/// }
/// ```
pub trait UserProfileService: Send + Sync {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileServiceError>;
    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileServiceError>;
}

/// Per-call view of a user profile: loaded once, updated in memory and saved once at the end.
pub struct UserProfileTracker<'a> {
    service: Option<&'a dyn UserProfileService>,
    profile: UserProfile,
    loaded: bool,
    updated: bool,
}

impl<'a> UserProfileTracker<'a> {
    pub fn new(
        user_id: &str,
        service: Option<&'a dyn UserProfileService>,
    ) -> UserProfileTracker<'a> {
        UserProfileTracker {
            service,
            profile: UserProfile::new(user_id),
            loaded: false,
            updated: false,
        }
    }

    /// Load the profile from the service. Failures leave an empty profile in place.
    pub fn load_user_profile(&mut self, reasons: &mut DecisionReasons) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let Some(service) = self.service else {
            return;
        };

        let user_id = self.profile.user_id.as_str();
        match service.lookup(user_id) {
            Ok(Some(profile)) if profile.user_id == user_id => {
                self.profile = profile;
            }
            Ok(Some(_)) => {
                let message =
                    format!("User profile returned for a different user than {user_id:?}.");
                log::warn!(target: "optimizely", user_id; "{message}");
                reasons.error(message);
            }
            Ok(None) => {
                log::debug!(target: "optimizely", user_id; "no user profile found");
            }
            Err(err) => {
                let message =
                    format!("Error while looking up user profile for user ID {user_id:?}: {err}.");
                log::warn!(target: "optimizely", user_id; "{message}");
                reasons.error(message);
            }
        }
    }

    pub fn user_profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Record a fresh bucketing decision.
    pub fn update_user_profile(&mut self, rule: &Experiment, variation: &Variation) {
        let previous = self.profile.experiment_bucket_map.insert(
            rule.id.clone(),
            UserProfileBucket {
                variation_id: variation.id.clone(),
            },
        );
        if previous.map_or(true, |bucket| bucket.variation_id != variation.id) {
            self.updated = true;
        }
        log::info!(target: "optimizely",
                   user_id = self.profile.user_id.as_str(),
                   rule_key = rule.key.as_str(),
                   variation_key = variation.key.as_str();
                   "updated user profile");
    }

    /// Persist the profile if it changed since it was loaded.
    pub fn save_user_profile(&mut self) {
        if !self.updated {
            return;
        }
        let Some(service) = self.service else {
            return;
        };

        let user_id = self.profile.user_id.as_str();
        match service.save(&self.profile) {
            Ok(()) => {
                self.updated = false;
                log::info!(target: "optimizely", user_id; "saved user profile");
            }
            Err(err) => {
                log::warn!(target: "optimizely", user_id; "failed to save user profile: {err}");
            }
        }
    }
}
