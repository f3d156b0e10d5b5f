use std::sync::Arc;

use crate::cmab::CmabError;

/// Represents a result type for operations in the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK.
///
/// None of these errors ever escape a decision call: decisions degrade to "no variation" and the
/// error is reported through logs and decision reasons instead.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Configuration has not been provided yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// Datafile could not be parsed.
    #[error("error parsing datafile")]
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// Invalid CMAB prediction endpoint configuration.
    #[error("invalid prediction endpoint configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Experiment key is not in the datafile.
    #[error("experiment key {0:?} is not in datafile")]
    InvalidExperimentKey(String),

    /// Experiment id is not in the datafile.
    #[error("experiment id {0:?} is not in datafile")]
    InvalidExperimentId(String),

    /// Feature flag key is not in the datafile.
    #[error("no flag was tracked for key {0:?}")]
    InvalidFlagKey(String),

    /// Audience id is not in the datafile.
    #[error("audience id {0:?} is not in datafile")]
    InvalidAudienceId(String),

    /// Variation id or key is not part of the experiment.
    #[error("variation {0:?} is not in datafile")]
    InvalidVariation(String),

    /// Group id is not in the datafile.
    #[error("group id {0:?} is not in datafile")]
    InvalidGroupId(String),

    /// Rollout id is not in the datafile.
    #[error("rollout id {0:?} is not in datafile")]
    InvalidRolloutId(String),

    /// Contextual bandit prediction failed.
    #[error(transparent)]
    Cmab(#[from] CmabError),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(Arc::new(value))
    }
}
