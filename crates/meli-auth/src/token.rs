//! OAuth token exchange and refresh
//!
//! Both operations POST a form to `OAuthConfig::token_endpoint` with
//! different grant types. Each call is a single attempt: an authorization
//! code is single-use, so retrying the same code can only fail again.
//! MercadoLibre rotates the refresh token on every refresh, so callers must
//! persist both tokens from every response.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// Fields beyond the token pair are optional and unknown fields are
/// ignored, so provider additions never break parsing.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
}

impl TokenResponse {
    /// Absolute expiry in unix seconds, given the time the response arrived.
    pub fn expires_at(&self, now_secs: u64) -> Option<u64> {
        self.expires_in.map(|delta| now_secs.saturating_add(delta))
    }
}

/// Exchange an authorization code for tokens (first-time flow completion).
///
/// The verifier proves this client is the one that put the challenge in
/// the authorization URL.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    debug!(endpoint = %config.token_endpoint, "exchanging authorization code");
    let form = [
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose().as_str()),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("code", code),
        ("code_verifier", verifier),
    ];
    post_form(client, config, &form, "token exchange").await
}

/// Obtain a new token pair from a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    debug!(endpoint = %config.token_endpoint, "refreshing access token");
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose().as_str()),
        ("refresh_token", refresh),
    ];
    post_form(client, config, &form, "token refresh").await
}

async fn post_form(
    client: &reqwest::Client,
    config: &OAuthConfig,
    form: &[(&str, &str)],
    operation: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&config.token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(config.timeout)
        .form(form)
        .send()
        .await
        .map_err(|e| {
            let kind = if e.is_timeout() { "timed out" } else { "failed" };
            Error::Http(format!("{operation} request {kind}: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        warn!(status = status.as_u16(), operation, "token endpoint rejected request");
        return Err(Error::TokenExchange {
            status: status.as_u16(),
            body,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading {operation} response: {e}")))?;
    serde_json::from_str::<TokenResponse>(&body)
        .map_err(|e| Error::InvalidResponse(format!("{operation}: {e}")))
}
