//! Harvester configuration.
//!
//! [`BitbucketConfig`] holds every option the client recognizes. It
//! deserializes with defaults for anything missing, so a partial TOML file or
//! environment overlay is enough to build one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bitbucket::{
    BITBUCKET_API_URL, BITBUCKET_URL, BitbucketError, Credentials, DEFAULT_TOKEN_URL,
    MAX_CATEGORY_ITEMS_PER_PAGE, Result, urijoin,
};
use crate::rate_limit::{MAX_RATE_LIMIT, MIN_RATE_LIMIT, RateLimitTracker};
use crate::retry::{DEFAULT_RETRY_STATUSES, DEFAULT_SLEEP_TIME, MAX_RETRIES, RetryConfig};

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BitbucketConfig {
    /// Repository owner (user or workspace).
    pub owner: String,
    /// Repository slug.
    pub repository: String,
    /// Self-hosted server root. The API lives under `{url}/api/v3`.
    pub enterprise_url: Option<String>,

    /// Wait for the quota to reset once it drops to the floor.
    pub sleep_for_rate: bool,
    /// Remaining-quota floor that triggers a wait.
    pub min_rate_to_sleep: u64,
    /// Retries after the first attempt of a request.
    pub max_retries: usize,
    /// Seconds between retry attempts.
    pub sleep_time: u64,
    /// Page size requested on the issue and pull request listings.
    pub max_items: u32,
    /// HTTP statuses retried as transient.
    pub retry_statuses: Vec<u16>,

    pub ssl_verify: bool,
    pub timeout_secs: u64,

    pub client_id: Option<String>,
    pub secret_id: Option<String>,
    pub refresh_token: Option<String>,
    pub token_url: String,

    /// Skip user profile lookups and leave identity fields empty.
    pub exclude_user_data: bool,
    /// Label attached to emitted records. Defaults to the origin.
    pub tag: Option<String>,
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repository: String::new(),
            enterprise_url: None,
            sleep_for_rate: false,
            min_rate_to_sleep: MIN_RATE_LIMIT,
            max_retries: MAX_RETRIES,
            sleep_time: DEFAULT_SLEEP_TIME,
            max_items: MAX_CATEGORY_ITEMS_PER_PAGE,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            ssl_verify: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            client_id: None,
            secret_id: None,
            refresh_token: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            exclude_user_data: false,
            tag: None,
        }
    }
}

impl std::fmt::Debug for BitbucketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("BitbucketConfig")
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("enterprise_url", &self.enterprise_url)
            .field("sleep_for_rate", &self.sleep_for_rate)
            .field("min_rate_to_sleep", &self.min_rate_to_sleep)
            .field("max_retries", &self.max_retries)
            .field("sleep_time", &self.sleep_time)
            .field("max_items", &self.max_items)
            .field("retry_statuses", &self.retry_statuses)
            .field("ssl_verify", &self.ssl_verify)
            .field("timeout_secs", &self.timeout_secs)
            .field("client_id", &self.client_id)
            .field("secret_id", &redact(&self.secret_id))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_url", &self.token_url)
            .field("exclude_user_data", &self.exclude_user_data)
            .field("tag", &self.tag)
            .finish()
    }
}

impl BitbucketConfig {
    pub fn new(owner: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            ..Self::default()
        }
    }

    /// Attach OAuth consumer credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.client_id = Some(credentials.client_id);
        self.secret_id = Some(credentials.secret_id);
        self.refresh_token = Some(credentials.refresh_token);
        self
    }

    /// Root of the REST API.
    pub fn api_base_url(&self) -> String {
        match self.enterprise_url.as_deref() {
            Some(base) => urijoin(&[base, "api", "v3"]),
            None => BITBUCKET_API_URL.to_string(),
        }
    }

    /// Web URL of the repository, used as the record origin.
    pub fn origin(&self) -> String {
        let base = self.enterprise_url.as_deref().unwrap_or(BITBUCKET_URL);
        urijoin(&[base, &self.owner, &self.repository])
    }

    /// Tag for emitted records, falling back to the origin.
    pub fn tag(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.origin())
    }

    /// OAuth credentials, if all three parts are present.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.client_id, &self.secret_id, &self.refresh_token) {
            (Some(id), Some(secret), Some(refresh))
                if !id.is_empty() && !secret.is_empty() && !refresh.is_empty() =>
            {
                Ok(Credentials::new(id, secret, refresh))
            }
            _ => Err(BitbucketError::Config(
                "client_id, secret_id and refresh_token are all required".to_string(),
            )),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(Duration::from_secs(self.sleep_time), self.max_retries)
            .with_retry_statuses(self.retry_statuses.clone())
    }

    pub fn rate_limit_tracker(&self) -> RateLimitTracker {
        RateLimitTracker::new(self.sleep_for_rate, self.min_rate_to_sleep)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the configuration before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(BitbucketError::Config("owner must not be empty".to_string()));
        }
        if self.repository.trim().is_empty() {
            return Err(BitbucketError::Config(
                "repository must not be empty".to_string(),
            ));
        }
        if self.max_items == 0 {
            return Err(BitbucketError::Config(
                "max_items must be greater than zero".to_string(),
            ));
        }
        if self.min_rate_to_sleep > MAX_RATE_LIMIT {
            tracing::warn!(
                requested = self.min_rate_to_sleep,
                max = MAX_RATE_LIMIT,
                "min_rate_to_sleep will be clamped"
            );
        }
        if let Some(url) = self.enterprise_url.as_deref() {
            url::Url::parse(url).map_err(|e| {
                BitbucketError::Config(format!("invalid enterprise_url '{}': {}", url, e))
            })?;
        }
        self.credentials()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> BitbucketConfig {
        BitbucketConfig::new("atlassian", "python-bitbucket")
            .with_credentials(Credentials::new("id", "secret", "refresh"))
    }

    #[test]
    fn test_defaults() {
        let config = BitbucketConfig::default();
        assert!(!config.sleep_for_rate);
        assert_eq!(config.min_rate_to_sleep, 10);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.sleep_time, 1);
        assert_eq!(config.max_items, 100);
        assert!(config.ssl_verify);
        assert!(!config.exclude_user_data);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn test_urls_for_cloud() {
        let config = configured();
        assert_eq!(config.api_base_url(), "https://api.bitbucket.org/2.0");
        assert_eq!(
            config.origin(),
            "https://bitbucket.org/atlassian/python-bitbucket"
        );
        assert_eq!(config.tag(), config.origin());
    }

    #[test]
    fn test_urls_for_enterprise() {
        let mut config = configured();
        config.enterprise_url = Some("https://bb.example.com/".to_string());
        config.tag = Some("internal".to_string());
        assert_eq!(config.api_base_url(), "https://bb.example.com/api/v3");
        assert_eq!(
            config.origin(),
            "https://bb.example.com/atlassian/python-bitbucket"
        );
        assert_eq!(config.tag(), "internal");
    }

    #[test]
    fn test_validate() {
        assert!(configured().validate().is_ok());

        let mut missing_owner = configured();
        missing_owner.owner = " ".to_string();
        assert!(matches!(
            missing_owner.validate(),
            Err(BitbucketError::Config(_))
        ));

        let mut missing_token = configured();
        missing_token.refresh_token = None;
        assert!(matches!(
            missing_token.validate(),
            Err(BitbucketError::Config(ref m)) if m.contains("refresh_token")
        ));

        let mut bad_url = configured();
        bad_url.enterprise_url = Some("not a url".to_string());
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: BitbucketConfig = serde_json::from_value(serde_json::json!({
            "owner": "o",
            "repository": "r",
            "sleep_for_rate": true,
            "max_items": 25
        }))
        .unwrap();
        assert!(config.sleep_for_rate);
        assert_eq!(config.max_items, 25);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_statuses, DEFAULT_RETRY_STATUSES.to_vec());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", configured());
        assert!(rendered.contains("\"id\""));
        assert!(!rendered.contains("\"secret\""));
        assert!(!rendered.contains("\"refresh\""));
    }

    #[test]
    fn test_derived_collaborators() {
        let mut config = configured();
        config.sleep_time = 3;
        config.max_retries = 2;
        config.min_rate_to_sleep = 900;
        let retry = config.retry_config();
        assert_eq!(retry.delay, Duration::from_secs(3));
        assert_eq!(retry.max_retries, 2);
        assert_eq!(config.rate_limit_tracker().min_rate_to_sleep(), MAX_RATE_LIMIT);
    }
}
