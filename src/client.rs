use crate::adaptor::{ContextValue, EnrichmentData, RollbarClientAdaptor};
use crate::env::{
    env_opt, env_or, parse_flag, ROLLBAR_ACCESS_TOKEN_ENV, ROLLBAR_DEFAULT_LEVEL_ENV,
    ROLLBAR_ENDPOINT_ENV, ROLLBAR_INSTALL_ENV, ROLLBAR_TIMEOUT_SECS_ENV,
};
use crate::error::ConfigurationError;
use crate::payload::{ItemResponse, Level, Payload, PayloadData};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Default Rollbar item endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.rollbar.com/api/1/item/";

/// Configuration for [`RollbarClient`].
#[derive(Clone, Debug)]
pub struct RollbarConfig {
    /// Project access token. Required.
    pub access_token: Option<String>,
    /// Item endpoint, defaults to [`DEFAULT_ENDPOINT`].
    pub endpoint: String,
    /// Upper bound on a single item POST, connect time included.
    pub timeout: Duration,
    /// Install a process-wide panic hook that reports panics through
    /// `tracing`.
    pub install: bool,
    /// Severity used when [`RollbarClientAdaptor::get_level`] gets a name
    /// it does not know.
    pub default_level: String,
}

impl Default for RollbarConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(5),
            install: false,
            default_level: "ERROR".to_string(),
        }
    }
}

impl RollbarConfig {
    /// Read the configuration from `ROLLBAR_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = RollbarConfig::default();
        Self {
            access_token: env_opt(ROLLBAR_ACCESS_TOKEN_ENV),
            endpoint: env_or(ROLLBAR_ENDPOINT_ENV, &defaults.endpoint),
            timeout: env_opt(ROLLBAR_TIMEOUT_SECS_ENV)
                .and_then(|secs| secs.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            install: env_opt(ROLLBAR_INSTALL_ENV)
                .map(|flag| parse_flag(&flag))
                .unwrap_or(defaults.install),
            default_level: env_or(ROLLBAR_DEFAULT_LEVEL_ENV, &defaults.default_level),
        }
    }
}

/// Rollbar transport posting JSON items over HTTPS.
#[derive(Clone)]
pub struct RollbarClient {
    client: Client,
    access_token: String,
    endpoint: String,
    default_level: Level,
    data: EnrichmentData,
}

impl std::fmt::Debug for RollbarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbarClient")
            .field("endpoint", &self.endpoint)
            .field("default_level", &self.default_level)
            .finish_non_exhaustive()
    }
}

impl RollbarClient {
    /// Construct a new client from `config`.
    ///
    /// **Errors**
    /// - [`ConfigurationError::MissingAccessToken`] when no non-empty token
    ///   is configured. Nothing is sent in that case.
    /// - [`ConfigurationError::HttpClient`] when the HTTP client cannot be
    ///   built.
    ///
    /// With `config.install` set, the process-wide panic hook is installed
    /// as a side effect.
    pub fn new(config: RollbarConfig) -> Result<Self, ConfigurationError> {
        let access_token = config
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigurationError::MissingAccessToken)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        if config.install {
            crate::init::install_panic_hook();
        }

        Ok(Self {
            client,
            access_token,
            endpoint: config.endpoint,
            default_level: Level::from_name(&config.default_level).unwrap_or(Level::Error),
            data: EnrichmentData::default(),
        })
    }
}

#[async_trait]
impl RollbarClientAdaptor for RollbarClient {
    fn set_data(&mut self, field: &str, data: ContextValue) -> Result<(), ConfigurationError> {
        self.data.set(field, data)
    }

    fn get_data(&self) -> &EnrichmentData {
        &self.data
    }

    fn get_level(&self, level: &str) -> Level {
        Level::from_name(level).unwrap_or(self.default_level)
    }

    async fn send(&self, data: PayloadData) -> Option<String> {
        let payload = Payload {
            access_token: self.access_token.clone(),
            data,
        };

        let resp = match self
            .client
            .post(&self.endpoint)
            .header("X-Rollbar-Access-Token", &self.access_token)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "failed to deliver item to rollbar");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            warn!(%status, body = %text, "rollbar rejected item");
            return None;
        }

        match resp.json::<ItemResponse>().await {
            Ok(item) => {
                let uuid = item.result.and_then(|r| r.uuid);
                debug!(uuid = ?uuid, err = item.err, "item accepted by rollbar");
                uuid
            }
            Err(e) => {
                warn!(error = %e, "unreadable rollbar response");
                None
            }
        }
    }
}
