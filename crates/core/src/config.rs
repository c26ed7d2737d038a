//! Configuration for the upstream ORATS client.

use crate::error::{OratsError, OratsResult};
use std::time::Duration;
use url::Url;

/// Base URL of the ORATS Data API v2.
pub const DEFAULT_BASE_URL: &str = "https://api.orats.io/datav2";

/// Default bound on a single upstream request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const API_TOKEN_ENV: &str = "ORATS_API_TOKEN";
pub const BASE_URL_ENV: &str = "ORATS_BASE_URL";
pub const TIMEOUT_ENV: &str = "ORATS_TIMEOUT_SECS";

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL that endpoint paths are appended to.
    pub base_url: Url,
    /// API token sent as the `token` query parameter.
    pub api_token: Option<String>,
    /// Request timeout. `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

impl UpstreamConfig {
    /// Create a new configuration with the given base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from the process environment.
    ///
    /// A missing token is not an error here: it is reported on the first call that
    /// needs it, so the server can still start and answer `tools/list`.
    pub fn from_env() -> OratsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OratsResult<Self> {
        let base_url = match lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            Some(raw) => Url::parse(raw.trim())?,
            None => Url::parse(DEFAULT_BASE_URL)?,
        };

        let mut config = Self::new(base_url);
        config.api_token = lookup(API_TOKEN_ENV).filter(|v| !v.is_empty());

        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                OratsError::Config(format!("{} must be a whole number of seconds, got {:?}", TIMEOUT_ENV, raw))
            })?;
            config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = UpstreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
        assert!(config.api_token.is_none());
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_reads_token_and_overrides() {
        let config = UpstreamConfig::from_lookup(lookup(&[
            (API_TOKEN_ENV, "secret"),
            (BASE_URL_ENV, "http://localhost:9000/datav2"),
            (TIMEOUT_ENV, "5"),
        ]))
        .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.base_url.as_str(), "http://localhost:9000/datav2");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let config = UpstreamConfig::from_lookup(lookup(&[(API_TOKEN_ENV, "")])).unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = UpstreamConfig::from_lookup(lookup(&[(TIMEOUT_ENV, "0")])).unwrap();
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = UpstreamConfig::from_lookup(lookup(&[(TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(matches!(err, OratsError::Config(_)));
    }
}
