//! Decision engine for Optimizely feature experimentation.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that decides feature flags for users. Each user is
//! represented by a [`UserContext`] carrying a user id, key-value [`Attributes`], qualified
//! audience segments and forced decisions. Deciding a flag results in an [`OptimizelyDecision`]
//! naming the variation the user is assigned to, if any.
//!
//! Decisions are computed locally from a datafile: the same user, attributes and datafile give
//! the same decision on every machine. Users are assigned to traffic slices by hashing their id
//! together with the id of the rule, so no shared state is needed between SDK instances.
//!
//! For every flag, [`DecisionService`](decision::DecisionService) runs a waterfall: holdouts
//! first, then the flag's experiments, then the targeting rules of its rollout. Experiments
//! honor forced decisions, whitelists and sticky bucketing through a [`UserProfileService`].
//! Contextual multi-armed bandit rules ask a remote prediction service, see [`cmab`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Decisions never fail: a decision that could not be made is returned as a disabled flag
//! without a variation, and the reasons explain what went wrong. Errors are only returned when
//! building a client or updating its datafile.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages
//! under the `optimizely` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
mod bucketer;
mod client;
pub mod cmab;
pub mod conditions;
mod config;
mod configuration_store;
pub mod decision;
mod error;
mod notification;
pub mod project_config;
pub mod semantic_version;
mod user_context;
mod user_profile;

pub use attributes::{AttributeValue, Attributes};
pub use bucketer::{bucket_value, Bucketer, MAX_TRAFFIC_VALUE};
pub use client::{Client, OptimizelyDecision};
pub use config::ClientConfig;
pub use decision::DecideOption;
pub use error::{Error, Result};
pub use notification::{DecisionListener, DecisionNotification, ListenerId, NotificationCenter};
pub use project_config::ProjectConfig;
pub use user_context::{DecisionContext, ForcedDecision, UserContext};
pub use user_profile::{
    UserProfile, UserProfileBucket, UserProfileService, UserProfileServiceError,
    UserProfileTracker,
};
