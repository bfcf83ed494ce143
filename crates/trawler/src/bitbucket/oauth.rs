//! Bitbucket OAuth refresh-token exchange.
//!
//! The harvester never runs an interactive flow. It is handed a client id,
//! a client secret and a long-lived refresh token, and exchanges them once
//! for an access token that is then attached to every API request as a
//! bearer credential. The access token is not tracked for expiry; a 401
//! surfaces as a permanent HTTP error.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::http::{HttpMethod, HttpRequest, HttpTransport};

use super::error::{BitbucketError, Result};

/// Bitbucket's token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";

/// Caller-supplied OAuth consumer credentials.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub client_id: String,
    pub secret_id: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        secret_id: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            secret_id: secret_id.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// `Authorization` header value for HTTP basic auth with the consumer pair.
    fn basic_auth(&self) -> String {
        let pair = format!("{}:{}", self.client_id, self.secret_id);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(pair)
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret_id", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// A bearer token derived from [`Credentials`].
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Successful response from the token endpoint.
#[derive(Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub scopes: Option<String>,
}

impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Exchange a refresh token for an access token.
///
/// Any failure here is fatal for the client: no request can be authorized
/// without the token, so nothing is retried.
pub async fn exchange_refresh_token(
    transport: &dyn HttpTransport,
    token_url: &str,
    credentials: &Credentials,
) -> Result<AccessToken> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "refresh_token")
        .append_pair("refresh_token", &credentials.refresh_token)
        .finish();

    let request = HttpRequest {
        method: HttpMethod::Post,
        url: token_url.to_string(),
        headers: vec![
            (
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), credentials.basic_auth()),
        ],
        body: body.into_bytes(),
    };

    tracing::debug!(token_url, client_id = %credentials.client_id, "Exchanging refresh token");

    let response = transport
        .send(request)
        .await
        .map_err(|e| BitbucketError::CredentialExchange(e.to_string()))?;

    if !response.is_success() {
        return Err(BitbucketError::CredentialExchange(format!(
            "token endpoint returned {}: {}",
            response.status,
            response.text()
        )));
    }

    let token: AccessTokenResponse = serde_json::from_slice(&response.body).map_err(|e| {
        BitbucketError::CredentialExchange(format!("unexpected token response: {}", e))
    })?;

    if token.access_token.is_empty() {
        return Err(BitbucketError::CredentialExchange(
            "token endpoint returned an empty access token".to_string(),
        ));
    }

    Ok(AccessToken::new(token.access_token))
}
