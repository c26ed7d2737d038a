//! HTTP client for the ORATS Data API.

use crate::config::UpstreamConfig;
use crate::error::{OratsError, OratsResult};
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Query parameters for one upstream request, keyed by parameter name.
pub type QueryParams = BTreeMap<String, String>;

/// Query parameter carrying the API token.
const TOKEN_PARAM: &str = "token";

/// Source of upstream JSON data.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch `endpoint` with the given query parameters.
    async fn fetch(&self, endpoint: &str, params: &QueryParams) -> OratsResult<serde_json::Value>;
}

/// Authenticated ORATS client. One GET per call, no retries.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> OratsResult<Self> {
        let mut builder = Client::builder().user_agent(concat!("orats-mcp/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OratsError::UpstreamRequest)?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Build the request URL: base + endpoint, token first, then every non-empty param.
    ///
    /// Fails with [`OratsError::MissingApiToken`] before anything else is done.
    pub fn build_url(&self, endpoint: &str, params: &QueryParams) -> OratsResult<Url> {
        let token = self
            .config
            .api_token
            .as_deref()
            .ok_or(OratsError::MissingApiToken)?;

        let base = self.config.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, endpoint))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair(TOKEN_PARAM, token);
            for (key, value) in params {
                if key == TOKEN_PARAM {
                    debug!(endpoint, "Ignoring caller-supplied token parameter");
                    continue;
                }
                if value.is_empty() {
                    continue;
                }
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn request_error(&self, err: reqwest::Error) -> OratsError {
        match self.config.timeout {
            Some(timeout) if err.is_timeout() => OratsError::UpstreamTimeout(timeout),
            // The URL carries the token; keep it out of messages returned to clients.
            _ => OratsError::UpstreamRequest(err.without_url()),
        }
    }
}

#[async_trait::async_trait]
impl Upstream for UpstreamClient {
    async fn fetch(&self, endpoint: &str, params: &QueryParams) -> OratsResult<serde_json::Value> {
        let url = self.build_url(endpoint, params)?;
        debug!(endpoint, params = params.len(), "GET request");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint, status = status.as_u16(), "Upstream returned error status");
            return Err(OratsError::UpstreamStatus {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        response.json().await.map_err(|e| self.request_error(e))
    }
}
