use std::time::Duration;

use crate::{
    cmab::{CmabClient, CmabRetryConfig, CmabService, DefaultCmabService, ReqwestTransport},
    decision::DecideOption,
    Client, Result, UserProfileService,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) datafile: Option<String>,
    pub(crate) user_profile_service: Option<Box<dyn UserProfileService>>,
    pub(crate) cmab_service: Option<Box<dyn CmabService>>,
    pub(crate) cmab_endpoint: String,
    pub(crate) cmab_retry_config: CmabRetryConfig,
    pub(crate) cmab_request_timeout: Duration,
    pub(crate) cmab_cache_size: usize,
    pub(crate) cmab_cache_ttl: Duration,
    pub(crate) default_decide_options: Vec<DecideOption>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            datafile: None,
            user_profile_service: None,
            cmab_service: None,
            cmab_endpoint: CmabClient::DEFAULT_ENDPOINT.to_owned(),
            cmab_retry_config: CmabRetryConfig::default(),
            cmab_request_timeout: ClientConfig::DEFAULT_CMAB_REQUEST_TIMEOUT,
            cmab_cache_size: DefaultCmabService::DEFAULT_CACHE_SIZE,
            cmab_cache_ttl: DefaultCmabService::DEFAULT_CACHE_TTL,
            default_decide_options: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Default timeout of a single request to the CMAB prediction service.
    pub const DEFAULT_CMAB_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a configuration without a datafile. The client returns empty decisions until
    /// [`Client::update_config`] is called.
    pub fn new() -> Self {
        ClientConfig::default()
    }

    /// Create a configuration using the specified datafile JSON.
    ///
    /// ```
    /// # use optimizely::ClientConfig;
    /// ClientConfig::from_datafile(r#"{"version": "4", "revision": "1"}"#);
    /// ```
    pub fn from_datafile(datafile: impl Into<String>) -> Self {
        ClientConfig {
            datafile: Some(datafile.into()),
            ..ClientConfig::default()
        }
    }

    /// Set the storage used for sticky bucketing.
    pub fn user_profile_service(
        mut self,
        user_profile_service: impl UserProfileService + 'static,
    ) -> Self {
        self.user_profile_service = Some(Box::new(user_profile_service));
        self
    }

    /// Replace the default CMAB service. When set, the prediction endpoint, retry, timeout and
    /// cache settings are ignored.
    pub fn cmab_service(mut self, cmab_service: impl CmabService + 'static) -> Self {
        self.cmab_service = Some(Box::new(cmab_service));
        self
    }

    /// Override the prediction service endpoint. The rule id is appended as the last path
    /// segment. Clients should use the default setting in most cases.
    pub fn cmab_endpoint(mut self, cmab_endpoint: impl Into<String>) -> Self {
        self.cmab_endpoint = cmab_endpoint.into();
        self
    }

    pub fn cmab_retry_config(mut self, cmab_retry_config: CmabRetryConfig) -> Self {
        self.cmab_retry_config = cmab_retry_config;
        self
    }

    pub fn cmab_request_timeout(mut self, timeout: Duration) -> Self {
        self.cmab_request_timeout = timeout;
        self
    }

    pub fn cmab_cache_size(mut self, cache_size: usize) -> Self {
        self.cmab_cache_size = cache_size;
        self
    }

    pub fn cmab_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cmab_cache_ttl = cache_ttl;
        self
    }

    /// Options applied to every decision in addition to the options passed to the call.
    ///
    /// ```
    /// # use optimizely::{ClientConfig, DecideOption};
    /// let config = ClientConfig::new().default_decide_options([DecideOption::IncludeReasons]);
    /// ```
    pub fn default_decide_options(
        mut self,
        options: impl IntoIterator<Item = DecideOption>,
    ) -> Self {
        self.default_decide_options = options.into_iter().collect();
        self
    }

    /// Build the CMAB service: the custom one if set, otherwise the default HTTP-backed service.
    pub(crate) fn take_cmab_service(&mut self) -> Result<Box<dyn CmabService>> {
        if let Some(cmab_service) = self.cmab_service.take() {
            return Ok(cmab_service);
        }
        let transport = ReqwestTransport::new(self.cmab_request_timeout)?;
        let client = CmabClient::new(
            transport,
            &self.cmab_endpoint,
            self.cmab_retry_config.clone(),
        )?;
        Ok(Box::new(DefaultCmabService::new(
            client,
            self.cmab_cache_size,
            self.cmab_cache_ttl,
        )))
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// Fails if the datafile cannot be parsed or the CMAB endpoint is not a valid URL.
    ///
    /// ```
    /// # use optimizely::{Client, ClientConfig};
    /// let client: Client = ClientConfig::from_datafile(r#"{"version": "4"}"#)
    ///     .to_client()
    ///     .unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientConfig;
    use crate::{cmab::CmabRetryConfig, decision::DecideOption, Error};

    #[test]
    fn defaults() {
        let config = ClientConfig::new();
        assert_eq!(config.datafile, None);
        assert_eq!(
            config.cmab_endpoint,
            "https://prediction.cmab.optimizely.com/predict"
        );
        assert_eq!(config.cmab_retry_config, CmabRetryConfig::default());
        assert_eq!(config.cmab_cache_size, 10_000);
        assert_eq!(config.cmab_cache_ttl, Duration::from_secs(30 * 60));
        assert!(config.default_decide_options.is_empty());
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::from_datafile("{}")
            .cmab_cache_size(5)
            .cmab_cache_ttl(Duration::from_secs(1))
            .cmab_request_timeout(Duration::from_millis(500))
            .default_decide_options([DecideOption::IncludeReasons]);
        assert_eq!(config.datafile.as_deref(), Some("{}"));
        assert_eq!(config.cmab_cache_size, 5);
        assert_eq!(config.cmab_cache_ttl, Duration::from_secs(1));
        assert_eq!(config.cmab_request_timeout, Duration::from_millis(500));
        assert_eq!(config.default_decide_options, vec![DecideOption::IncludeReasons]);
    }

    #[test]
    fn invalid_cmab_endpoint() {
        let result = ClientConfig::new().cmab_endpoint("not a url").to_client();
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn invalid_datafile() {
        let result = ClientConfig::from_datafile("{").to_client();
        assert!(matches!(result, Err(Error::ConfigurationParseError(_))));
    }
}
