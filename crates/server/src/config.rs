use crate::middleware::rate_limit::RateLimiter;
use crate::session::{SessionManager, SessionOptions, DEFAULT_MAX_SESSIONS};
use anyhow::{Context, Result};
use orats_core::config::{BASE_URL_ENV, TIMEOUT_ENV};
use orats_core::{UpstreamClient, UpstreamConfig};
use orats_mcp::CallDispatcher;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub sessions: SessionSettings,
}

/// Upstream overrides. Environment variables win over these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamSettings {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Idle seconds before a session is closed, 0 disables expiry
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_idle_ttl_secs() -> u64 {
    30 * 60
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl SessionSettings {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            idle_ttl: (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs)),
            max_sessions: self.max_sessions,
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if !config_path.exists() {
            tracing::info!("Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read configuration file")?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Resolve the upstream configuration from the process environment and this file.
    pub fn upstream_config(&self) -> Result<UpstreamConfig> {
        self.upstream_config_with(|key| std::env::var(key).ok())
    }

    fn upstream_config_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<UpstreamConfig> {
        let file = &self.upstream;
        UpstreamConfig::from_lookup(|key| {
            env(key).or_else(|| match key {
                BASE_URL_ENV => file.base_url.clone(),
                TIMEOUT_ENV => file.timeout_secs.map(|secs| secs.to_string()),
                _ => None,
            })
        })
        .context("Invalid upstream configuration")
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub auth_token: Option<Arc<str>>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: &ServerConfig, upstream: UpstreamConfig, auth_token: Option<String>) -> Result<Self> {
        let client = UpstreamClient::new(upstream).context("Failed to create upstream client")?;
        let dispatcher = Arc::new(CallDispatcher::new(Arc::new(client)));
        let sessions = Arc::new(SessionManager::new(dispatcher, config.sessions.options()));

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        ));

        Ok(Self {
            sessions,
            auth_token: auth_token.filter(|t| !t.is_empty()).map(Arc::from),
            rate_limiter,
        })
    }
}
