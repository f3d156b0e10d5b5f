//! Contextual multi-armed bandit (CMAB) decisions.
//!
//! Variations of CMAB rules are picked by a remote prediction service instead of traffic
//! allocation. [`CmabClient`] talks to the service, retrying transient failures with bounded
//! exponential backoff. [`DefaultCmabService`] filters the attributes the rule is interested in
//! and caches predictions per user and rule.
use std::time::Duration;

mod client;
mod service;

pub use client::{
    CmabClient, PredictionTransport, ReqwestTransport, TransportError, TransportResponse,
};
pub use service::{CmabDecision, CmabService, DefaultCmabService};

/// Errors returned while fetching a CMAB prediction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CmabError {
    /// The prediction service could not be reached or did not answer with HTTP 200.
    #[error("CMAB decision fetch failed: {0}")]
    Fetch(String),
    /// The prediction service answered with a response that does not contain a prediction.
    #[error("invalid CMAB fetch response: {0}")]
    InvalidResponse(String),
}

/// Retry policy of [`CmabClient`].
///
/// The delay before retry number `n` (starting at 1) is
/// `min(retry_delay * backoff_multiplier^(n - 1), max_backoff)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CmabRetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for CmabRetryConfig {
    fn default() -> Self {
        CmabRetryConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl CmabRetryConfig {
    /// Delay before the given retry attempt. `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.retry_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let max_nanos = self.max_backoff.as_nanos() as f64;
        if nanos.is_nan() || nanos >= max_nanos {
            self.max_backoff
        } else {
            Duration::from_nanos(nanos.max(0.0).round() as u64)
        }
    }
}
