//! Bitbucket API client.
//!
//! Every request goes through [`BitbucketClient::fetch_json`], which waits on
//! the rate-limit tracker, retries transient failures with a flat delay and
//! feeds each response back into the tracker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::BitbucketConfig;
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpHeaders, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::RateLimitTracker;
use crate::retry::{RetryConfig, with_retry};
use crate::users::UserCache;

use super::error::{BitbucketError, Result};
use super::oauth::{AccessToken, exchange_refresh_token};
use super::pagination::Paginator;
use super::types::{PULL_REQUEST_STATES, urijoin};

/// Authenticated client for one repository.
pub struct BitbucketClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    owner: String,
    repository: String,
    token: AccessToken,
    rate_limit: RateLimitTracker,
    retry: RetryConfig,
    users: UserCache,
    max_items: u32,
}

impl std::fmt::Debug for BitbucketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitbucketClient")
            .field("base_url", &self.base_url)
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("token", &self.token)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .field("cached_users", &self.users.len())
            .field("max_items", &self.max_items)
            .finish()
    }
}

impl BitbucketClient {
    /// Build a client over a reqwest transport and exchange the refresh token.
    pub async fn from_config(config: &BitbucketConfig) -> Result<Self> {
        let transport = ReqwestTransport::with_options(config.timeout(), config.ssl_verify)
            .map_err(|e| BitbucketError::Config(e.to_string()))?;
        Self::connect(config, Arc::new(transport)).await
    }

    /// Validate `config`, exchange the refresh token and build the client.
    ///
    /// A failed exchange is fatal: no client is returned.
    pub async fn connect(
        config: &BitbucketConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let credentials = config.credentials()?;
        let token =
            exchange_refresh_token(transport.as_ref(), &config.token_url, &credentials).await?;

        tracing::debug!(
            owner = %config.owner,
            repository = %config.repository,
            "Obtained Bitbucket access token"
        );

        Ok(Self::with_token(config, transport, token))
    }

    /// Build a client around an access token obtained elsewhere.
    pub fn with_token(
        config: &BitbucketConfig,
        transport: Arc<dyn HttpTransport>,
        token: AccessToken,
    ) -> Self {
        Self {
            transport,
            base_url: config.api_base_url(),
            owner: config.owner.clone(),
            repository: config.repository.clone(),
            token,
            rate_limit: config.rate_limit_tracker(),
            retry: config.retry_config(),
            users: UserCache::new(),
            max_items: config.max_items,
        }
    }

    /// Use `cache` for user lookups instead of a private one.
    #[must_use]
    pub fn with_user_cache(mut self, cache: UserCache) -> Self {
        self.users = cache;
        self
    }

    /// Replace the rate-limit tracker.
    #[must_use]
    pub fn with_rate_limit_tracker(mut self, tracker: RateLimitTracker) -> Self {
        self.rate_limit = tracker;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn max_items(&self) -> u32 {
        self.max_items
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    pub fn user_cache(&self) -> &UserCache {
        &self.users
    }

    /// URL of a resource under the repository.
    pub fn repository_url(&self, path: &[&str]) -> String {
        let mut parts = vec![
            self.base_url.as_str(),
            "repositories",
            self.owner.as_str(),
            self.repository.as_str(),
        ];
        parts.extend_from_slice(path);
        urijoin(&parts)
    }

    fn headers(&self) -> HttpHeaders {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), self.token.bearer()),
        ]
    }

    async fn wait_for_rate_limit(&self) {
        if self.rate_limit.should_sleep() {
            self.rate_limit.sleep_until_reset().await;
        } else if self.rate_limit.floor_newly_reached() {
            tracing::warn!(
                remaining = ?self.rate_limit.state().remaining,
                floor = self.rate_limit.min_rate_to_sleep(),
                "Rate limit floor reached, continuing without sleeping"
            );
        }
    }

    fn classify(&self, response: &HttpResponse) -> BitbucketError {
        let status = response.status;
        let message = response.text();
        if self.retry.is_transient_status(status) {
            BitbucketError::TransientHttp { status, message }
        } else {
            BitbucketError::Http { status, message }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Value> {
        self.wait_for_rate_limit().await;

        let response = self
            .transport
            .send(HttpRequest::get(url, self.headers()))
            .await?;

        self.rate_limit.update(&response);

        if !response.is_success() {
            return Err(self.classify(&response));
        }

        Ok(serde_json::from_slice(&response.body)?)
    }

    /// GET `url` and parse the body as JSON.
    ///
    /// Connection failures and allow-listed statuses are retried. Any other
    /// non-success status is returned as [`BitbucketError::Http`].
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        with_retry(&self.retry, url, || self.fetch_once(url)).await
    }

    /// Profile behind `href`, fetched at most once per display name.
    pub async fn user(&self, href: &str, display_name: &str) -> Result<Value> {
        if let Some(profile) = self.users.get(display_name) {
            tracing::trace!(display_name, "User cache hit");
            return Ok(profile);
        }

        tracing::debug!(display_name, "Fetching user profile");
        let profile = self.fetch_json(href).await?;
        self.users.insert(display_name, profile.clone());
        Ok(profile)
    }

    fn listing_query(&self, from_date: Option<DateTime<Utc>>) -> Vec<(String, String)> {
        let mut query = vec![
            ("sort".to_string(), "updated_on".to_string()),
            ("pagelen".to_string(), self.max_items.to_string()),
        ];
        if let Some(from_date) = from_date {
            query.push((
                "q".to_string(),
                format!("updated_on >= {}", from_date.to_rfc3339()),
            ));
        }
        query
    }

    /// Issues updated since `from_date`, oldest update first.
    pub fn issues(&self, from_date: Option<DateTime<Utc>>) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["issues"]);
        Paginator::new(self, &url, &self.listing_query(from_date))
    }

    /// Pull requests in every state updated since `from_date`.
    pub fn pulls(&self, from_date: Option<DateTime<Utc>>) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["pullrequests"]);
        let mut query = self.listing_query(from_date);
        query.extend(
            PULL_REQUEST_STATES
                .iter()
                .map(|state| ("state".to_string(), state.to_string())),
        );
        Paginator::new(self, &url, &query)
    }

    pub fn issue_comments(&self, issue_id: &str) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["issues", issue_id, "comments"]);
        Paginator::new(self, &url, &[])
    }

    pub fn pull_comments(&self, pull_id: &str) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["pullrequests", pull_id, "comments"]);
        Paginator::new(self, &url, &[])
    }

    pub fn pull_activity(&self, pull_id: &str) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["pullrequests", pull_id, "activity"]);
        Paginator::new(self, &url, &[])
    }

    pub fn pull_commits(&self, pull_id: &str) -> Result<Paginator<'_>> {
        let url = self.repository_url(&["pullrequests", pull_id, "commits"]);
        Paginator::new(self, &url, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitbucket::Credentials;
    use crate::http::{HttpMethod, MockTransport, header_get};
    use serde_json::json;

    const API: &str = "https://api.bitbucket.org/2.0/repositories/owner/repo";

    fn config() -> BitbucketConfig {
        let mut config = BitbucketConfig::new("owner", "repo")
            .with_credentials(Credentials::new("id", "secret", "refresh"));
        config.sleep_time = 0;
        config.max_retries = 2;
        config
    }

    fn client(transport: &MockTransport) -> BitbucketClient {
        BitbucketClient::with_token(
            &config(),
            Arc::new(transport.clone()),
            AccessToken::new("token"),
        )
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            headers: Vec::new(),
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn connect_exchanges_token_before_any_request() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            crate::bitbucket::DEFAULT_TOKEN_URL,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: br#"{"access_token":"fresh"}"#.to_vec(),
            },
        );
        transport.push_json(format!("{API}/issues/1"), 200, json!({"id": 1}));

        let client = BitbucketClient::connect(&config(), Arc::new(transport.clone()))
            .await
            .expect("connect");
        client
            .fetch_json(&format!("{API}/issues/1"))
            .await
            .expect("fetch");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(
            header_get(&requests[1].headers, "Authorization"),
            Some("Bearer fresh")
        );
    }

    #[tokio::test]
    async fn connect_fails_on_bad_credentials() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            crate::bitbucket::DEFAULT_TOKEN_URL,
            status(401),
        );

        let err = BitbucketClient::connect(&config(), Arc::new(transport.clone()))
            .await
            .expect_err("exchange should fail");
        assert!(matches!(err, BitbucketError::CredentialExchange(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn connect_rejects_incomplete_config() {
        let transport = MockTransport::new();
        let config = BitbucketConfig::new("o", "r");
        let err = BitbucketClient::connect(&config, Arc::new(transport.clone()))
            .await
            .expect_err("missing credentials");
        assert!(matches!(err, BitbucketError::Config(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues");
        transport.push_response(HttpMethod::Get, url.clone(), status(503));
        transport.push_response(HttpMethod::Get, url.clone(), status(500));
        transport.push_json(url.clone(), 200, json!({"values": []}));

        let body = client(&transport).fetch_json(&url).await.expect("fetch");
        assert_eq!(body, json!({"values": []}));
        assert_eq!(transport.count(&url), 3);
    }

    #[tokio::test]
    async fn connection_errors_exhaust_retries() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues");
        for _ in 0..3 {
            transport.push_connection_error(url.clone(), "connection reset");
        }

        let err = client(&transport)
            .fetch_json(&url)
            .await
            .expect_err("should exhaust");
        assert!(matches!(err, BitbucketError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(transport.count(&url), 3);
    }

    #[tokio::test]
    async fn permanent_status_is_not_retried() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues/7");
        transport.push_response(HttpMethod::Get, url.clone(), status(404));

        let err = client(&transport)
            .fetch_json(&url)
            .await
            .expect_err("404 is permanent");
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_retryable());
        assert_eq!(transport.count(&url), 1);
    }

    #[tokio::test]
    async fn responses_update_rate_limit_state() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues");
        transport.push_response(
            HttpMethod::Get,
            url.clone(),
            HttpResponse {
                status: 200,
                headers: vec![("X-RateLimit-Remaining".to_string(), "42".to_string())],
                body: b"{}".to_vec(),
            },
        );

        let client = client(&transport);
        client.fetch_json(&url).await.expect("fetch");
        assert_eq!(client.rate_limit().state().remaining, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_until_reset_when_floor_reached() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues");
        let reset = Utc::now() + chrono::Duration::seconds(90);
        for _ in 0..2 {
            transport.push_response(
                HttpMethod::Get,
                url.clone(),
                HttpResponse {
                    status: 200,
                    headers: vec![
                        ("X-RateLimit-Remaining".to_string(), "1".to_string()),
                        ("X-RateLimit-Reset".to_string(), reset.timestamp().to_string()),
                    ],
                    body: b"{}".to_vec(),
                },
            );
        }

        let mut config = config();
        config.sleep_for_rate = true;
        let client = BitbucketClient::with_token(
            &config,
            Arc::new(transport.clone()),
            AccessToken::new("token"),
        );

        let start = tokio::time::Instant::now();
        client.fetch_json(&url).await.expect("first");
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        client.fetch_json(&url).await.expect("second");
        assert!(start.elapsed() >= std::time::Duration::from_secs(60));
    }

    #[tokio::test]
    async fn floor_warning_is_consumed_once_while_sleeping_is_disabled() {
        let transport = MockTransport::new();
        let url = format!("{API}/issues");
        for _ in 0..3 {
            transport.push_response(
                HttpMethod::Get,
                url.clone(),
                HttpResponse {
                    status: 200,
                    headers: vec![("X-RateLimit-Remaining".to_string(), "0".to_string())],
                    body: b"{}".to_vec(),
                },
            );
        }

        let client = client(&transport);
        client.fetch_json(&url).await.expect("first");
        client.fetch_json(&url).await.expect("second");
        assert!(client.rate_limit().floor_reached());
        assert!(!client.rate_limit().floor_newly_reached(), "reported before the second call");

        client.fetch_json(&url).await.expect("third");
        assert!(!client.rate_limit().floor_newly_reached());
        assert_eq!(transport.count(&url), 3);
    }

    #[tokio::test]
    async fn user_lookups_are_cached_by_display_name() {
        let transport = MockTransport::new();
        let href = "https://api.bitbucket.org/2.0/users/%7Babc%7D";
        transport.push_json(href, 200, json!({"display_name": "Jane", "uuid": "{abc}"}));

        let client = client(&transport);
        let first = client.user(href, "Jane").await.expect("first");
        let second = client.user(href, "Jane").await.expect("second");
        assert_eq!(first, second);
        assert_eq!(transport.count(href), 1);
        assert!(client.user_cache().contains("Jane"));
    }

    #[test]
    fn repository_urls() {
        let transport = MockTransport::new();
        let client = client(&transport);
        assert_eq!(
            client.repository_url(&["pullrequests", "5", "activity"]),
            format!("{API}/pullrequests/5/activity")
        );

        let mut enterprise = config();
        enterprise.enterprise_url = Some("https://bb.example.com".to_string());
        let client = BitbucketClient::with_token(
            &enterprise,
            Arc::new(transport),
            AccessToken::new("token"),
        );
        assert_eq!(
            client.repository_url(&["issues"]),
            "https://bb.example.com/api/v3/repositories/owner/repo/issues"
        );
    }
}
