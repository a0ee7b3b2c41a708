//! Configuration management for the agent

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure, parsed from credentials.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub forum: ForumConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Credentials and endpoints for the forum platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(alias = "api_url", default = "default_forum_base_url")]
    pub base_url: String,

    #[serde(default = "default_forum_auth_url")]
    pub auth_url: String,
}

/// Delivery behavior: safety switch and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// When true, approved replies are recorded but never posted
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff_seconds")]
    pub base_backoff_seconds: f64,

    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            max_retries: default_max_retries(),
            base_backoff_seconds: default_base_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

fn default_user_agent() -> String {
    "oss-community-agent/1.0".to_string()
}

fn default_forum_base_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_forum_auth_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_dry_run() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_seconds() -> f64 {
    1.0
}

fn default_max_backoff_seconds() -> f64 {
    60.0
}

impl AgentConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AgentConfig = serde_json::from_str(json)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Live delivery needs working credentials; dry run can start without them
        if !self.delivery.dry_run {
            if self.forum.client_id.is_empty() || self.forum.client_secret.is_empty() {
                return Err(AgentError::Config(
                    "Forum client_id and client_secret are required for live delivery".to_string(),
                ));
            }
            if self.forum.username.is_empty() || self.forum.password.is_empty() {
                return Err(AgentError::Config(
                    "Forum username and password are required for live delivery".to_string(),
                ));
            }
        }

        if self.delivery.base_backoff_seconds <= 0.0 {
            return Err(AgentError::Config(
                "base_backoff_seconds must be positive".to_string(),
            ));
        }

        if self.delivery.max_backoff_seconds < self.delivery.base_backoff_seconds {
            return Err(AgentError::Config(
                "max_backoff_seconds must be at least base_backoff_seconds".to_string(),
            ));
        }

        Ok(())
    }
}
