use std::{collections::BTreeMap, time::Duration};

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AttributeValue, Error, Result};

use super::{CmabError, CmabRetryConfig};

/// Raw HTTP response of the prediction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The request could not be sent or the response could not be read.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends prediction requests. Implemented by [`ReqwestTransport`]; tests plug in their own.
pub trait PredictionTransport: Send + Sync {
    /// POST `body` as JSON to `url`.
    fn post_json(
        &self,
        url: &Url,
        body: String,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// Blocking HTTP transport based on `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> std::result::Result<ReqwestTransport, CmabError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CmabError::Fetch(err.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

impl PredictionTransport for ReqwestTransport {
    fn post_json(
        &self,
        url: &Url,
        body: String,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

type Sleep = Box<dyn Fn(Duration) + Send + Sync>;

/// Client of the CMAB prediction service.
pub struct CmabClient {
    transport: Box<dyn PredictionTransport>,
    endpoint: Url,
    retry_config: CmabRetryConfig,
    sleep: Sleep,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    instances: [PredictionInstance<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionInstance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    attributes: Vec<PredictionAttribute<'a>>,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: &'a str,
}

#[derive(Debug, Serialize)]
struct PredictionAttribute<'a> {
    id: &'a str,
    value: &'a AttributeValue,
    #[serde(rename = "type")]
    attribute_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    variation_id: Option<String>,
}

impl CmabClient {
    /// Default prediction service endpoint. The rule id is appended as the last path segment.
    pub const DEFAULT_ENDPOINT: &'static str = "https://prediction.cmab.optimizely.com/predict";

    pub fn new(
        transport: impl PredictionTransport + 'static,
        endpoint: &str,
        retry_config: CmabRetryConfig,
    ) -> Result<CmabClient> {
        let endpoint = Url::parse(endpoint).map_err(Error::InvalidBaseUrl)?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(CmabClient {
            transport: Box::new(transport),
            endpoint,
            retry_config,
            sleep: Box::new(std::thread::sleep),
        })
    }

    /// Replace the function used to wait between retries.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> CmabClient {
        self.sleep = Box::new(sleep);
        self
    }

    /// Fetch the variation id predicted for the user. Blocks until the prediction is received or
    /// all retries are exhausted.
    ///
    /// `attributes` must already be filtered down to the attributes the rule uses.
    pub fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &BTreeMap<String, AttributeValue>,
        cmab_uuid: &str,
    ) -> std::result::Result<String, CmabError> {
        let url = self.prediction_url(rule_id);
        let request = PredictionRequest {
            instances: [PredictionInstance {
                visitor_id: user_id,
                experiment_id: rule_id,
                attributes: attributes
                    .iter()
                    .map(|(key, value)| PredictionAttribute {
                        id: key,
                        value,
                        attribute_type: "custom_attribute",
                    })
                    .collect(),
                cmab_uuid,
            }],
        };
        let body = serde_json::to_string(&request)
            .map_err(|err| CmabError::Fetch(format!("failed to encode request: {err}")))?;

        let mut attempt = 0;
        loop {
            match self.try_fetch(&url, body.clone()) {
                Ok(variation_id) => return Ok(variation_id),
                Err(err @ CmabError::InvalidResponse(_)) => {
                    log::error!(target: "optimizely", rule_id, user_id; "{err}");
                    return Err(err);
                }
                Err(err) if attempt >= self.retry_config.max_retries => {
                    log::error!(target: "optimizely",
                                rule_id,
                                user_id,
                                retries = attempt;
                                "exhausted all retries for CMAB request: {err}");
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    let delay = self.retry_config.backoff(attempt);
                    log::warn!(target: "optimizely",
                               rule_id,
                               user_id,
                               attempt;
                               "retrying CMAB request in {delay:?}: {err}");
                    (self.sleep)(delay);
                }
            }
        }
    }

    fn prediction_url(&self, rule_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(rule_id);
        }
        url
    }

    /// Single request. Transport failures and non-200 statuses are [`CmabError::Fetch`] and may
    /// be retried, unusable bodies are [`CmabError::InvalidResponse`].
    fn try_fetch(&self, url: &Url, body: String) -> std::result::Result<String, CmabError> {
        let response = self
            .transport
            .post_json(url, body)
            .map_err(|err| CmabError::Fetch(err.to_string()))?;

        if response.status != 200 {
            return Err(CmabError::Fetch(format!("status {}", response.status)));
        }

        let response: PredictionResponse = serde_json::from_str(&response.body)
            .map_err(|err| CmabError::InvalidResponse(err.to_string()))?;
        response
            .predictions
            .into_iter()
            .next()
            .and_then(|prediction| prediction.variation_id)
            .ok_or_else(|| CmabError::InvalidResponse("missing variationId".to_owned()))
    }
}
