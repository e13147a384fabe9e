//! Credential lifecycle orchestration
//!
//! `LifecycleState::assess` is a pure function of the persisted state and
//! the clock. `Orchestrator::run` executes the I/O that state implies and
//! persists the result. Nothing is carried between runs: every run starts
//! from a fresh `load`.
//!
//! A missing store is `Error::StoreNotFound` from `CredentialStore::open`,
//! so the orchestrator never sees an uninitialized state.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::authorize::{build_authorization_url, parse_authorization_input};
use crate::config::OAuthConfig;
use crate::constants::keys;
use crate::credentials::{CredentialState, CredentialStore};
use crate::error::{Error, Result};
use crate::pkce::PkcePair;
use crate::token::{self, TokenResponse};

/// Where the persisted credentials stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No PKCE verifier yet
    AwaitingVerifier,
    /// Verifier stored, waiting for the user to authorize and paste a code
    AwaitingAuthorization,
    /// Authorization code stored, not yet exchanged
    AwaitingExchange,
    /// Refresh token stored; access token missing, expired, or of unknown age
    AwaitingRefresh,
    /// Access token valid beyond the refresh margin
    Ready,
}

impl LifecycleState {
    /// Decide what the next run has to do.
    ///
    /// A stored refresh token takes precedence over everything else: once
    /// the first exchange succeeded, the verifier and code are history.
    pub fn assess(state: &CredentialState, now_secs: u64, refresh_margin: Duration) -> Self {
        if state.refresh_token().is_some() {
            let fresh_until = now_secs.saturating_add(refresh_margin.as_secs());
            return match (state.access_token(), state.token_expires_at()) {
                (Some(_), Some(expires_at)) if expires_at > fresh_until => LifecycleState::Ready,
                _ => LifecycleState::AwaitingRefresh,
            };
        }
        if state.code_verifier().is_none() {
            return LifecycleState::AwaitingVerifier;
        }
        if state.authorization_code().is_none() {
            return LifecycleState::AwaitingAuthorization;
        }
        LifecycleState::AwaitingExchange
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::AwaitingVerifier => "awaiting_verifier",
            LifecycleState::AwaitingAuthorization => "awaiting_authorization",
            LifecycleState::AwaitingExchange => "awaiting_exchange",
            LifecycleState::AwaitingRefresh => "awaiting_refresh",
            LifecycleState::Ready => "ready",
        }
    }
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The user must open `url` and supply the resulting code. Not an error.
    AuthorizationRequired {
        url: String,
        /// Whether this run created the PKCE pair
        verifier_generated: bool,
    },
    /// First-time code exchange stored a token pair
    Exchanged { expires_at: Option<u64> },
    /// Refresh stored a new token pair
    Refreshed { expires_at: Option<u64> },
    /// Stored access token is still valid; nothing was written
    Fresh { expires_at: u64 },
}

impl Outcome {
    /// Whether the store now holds a usable token pair.
    pub fn has_tokens(&self) -> bool {
        !matches!(self, Outcome::AuthorizationRequired { .. })
    }
}

/// Drives the store from whatever state it is in towards a usable token pair.
pub struct Orchestrator<'a> {
    config: &'a OAuthConfig,
    store: &'a CredentialStore,
    client: reqwest::Client,
    force_refresh: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a OAuthConfig, store: &'a CredentialStore, client: reqwest::Client) -> Self {
        Self {
            config,
            store,
            client,
            force_refresh: false,
        }
    }

    /// Refresh even when the stored access token is still fresh.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Run one step of the lifecycle.
    ///
    /// Failures are returned before anything is written, so tokens stored
    /// by an earlier run survive a failed exchange or refresh.
    pub async fn run(&self) -> Result<Outcome> {
        let state = self.store.load().await?;
        let now = now_secs();
        let mut lifecycle = LifecycleState::assess(&state, now, self.config.refresh_margin);
        if self.force_refresh && lifecycle == LifecycleState::Ready {
            lifecycle = LifecycleState::AwaitingRefresh;
        }
        info!(state = lifecycle.as_str(), "credential lifecycle assessed");

        match lifecycle {
            LifecycleState::Ready => {
                let expires_at = state.token_expires_at().unwrap_or_default();
                info!(expires_at, "access token still valid, nothing to do");
                Ok(Outcome::Fresh { expires_at })
            }
            LifecycleState::AwaitingRefresh => self.refresh(&state).await,
            LifecycleState::AwaitingVerifier => self.start_authorization(&state).await,
            LifecycleState::AwaitingAuthorization => self.await_authorization(&state).await,
            LifecycleState::AwaitingExchange => self.exchange(&state).await,
        }
    }

    /// Exchange a code the user pasted (bare code or full redirect URL).
    ///
    /// The exchange happens right away and nothing is written unless it
    /// succeeds, so a mistyped or expired code never costs the stored token
    /// pair. A new consent supersedes any refresh token already stored.
    pub async fn accept_authorization_code(&self, input: &str) -> Result<Outcome> {
        let code = parse_authorization_input(input).ok_or_else(|| {
            Error::InvalidValue("no authorization code found in input".into())
        })?;

        let state = self.store.load().await?;
        let verifier = state.code_verifier().ok_or_else(|| {
            Error::MissingConfig(
                "no CODE_VERIFIER stored; run once to generate the authorization URL first".into(),
            )
        })?;
        if state.refresh_token().is_some() {
            info!("replacing stored token pair with a new authorization");
        }

        let response = token::exchange_code(&self.client, self.config, &code, verifier)
            .await
            .inspect_err(|e| warn!(error = %e, "pasted authorization code exchange failed"))?;

        // A code left in the store from an earlier paste is stale now
        let stale_code = state.authorization_code().is_some();
        let expires_at = self.persist_tokens(&response, stale_code).await?;
        info!(expires_at, "pasted authorization code exchanged for tokens");
        Ok(Outcome::Exchanged { expires_at })
    }

    async fn start_authorization(&self, state: &CredentialState) -> Result<Outcome> {
        let pair = PkcePair::generate();
        let mut pairs = vec![
            (keys::CODE_VERIFIER, pair.verifier.as_str()),
            (keys::CODE_CHALLENGE, pair.challenge.as_str()),
        ];
        // A code issued against some other verifier can never be redeemed
        if state.authorization_code().is_some() {
            warn!("discarding authorization code stored without a verifier");
            pairs.push((keys::AUTHORIZATION_CODE, ""));
        }
        self.store.upsert_all(&pairs).await?;
        info!(method = pair.method, "generated PKCE verifier");

        Ok(self.authorization_required(&pair.challenge, true))
    }

    async fn await_authorization(&self, state: &CredentialState) -> Result<Outcome> {
        let verifier = state
            .code_verifier()
            .ok_or_else(|| Error::MissingConfig("CODE_VERIFIER".into()))?;
        let pair = PkcePair::from_verifier(verifier.to_owned());

        if state.code_challenge() != Some(pair.challenge.as_str()) {
            warn!("stored code challenge missing or stale, rewriting from verifier");
            self.store
                .upsert(keys::CODE_CHALLENGE, &pair.challenge)
                .await?;
        }

        Ok(self.authorization_required(&pair.challenge, false))
    }

    fn authorization_required(&self, challenge: &str, verifier_generated: bool) -> Outcome {
        let url = build_authorization_url(
            &self.config.authorize_endpoint,
            &self.config.client_id,
            &self.config.redirect_uri,
            challenge,
        );
        info!("authorization required, waiting for user consent");
        Outcome::AuthorizationRequired {
            url,
            verifier_generated,
        }
    }

    async fn exchange(&self, state: &CredentialState) -> Result<Outcome> {
        let code = state
            .authorization_code()
            .ok_or_else(|| Error::MissingConfig("AUTHORIZATION_CODE".into()))?;
        let verifier = state
            .code_verifier()
            .ok_or_else(|| Error::MissingConfig("CODE_VERIFIER".into()))?;

        let response = token::exchange_code(&self.client, self.config, code, verifier)
            .await
            .inspect_err(|e| warn!(error = %e, "authorization code exchange failed"))?;

        let expires_at = self.persist_tokens(&response, true).await?;
        info!(expires_at, "authorization code exchanged for tokens");
        Ok(Outcome::Exchanged { expires_at })
    }

    async fn refresh(&self, state: &CredentialState) -> Result<Outcome> {
        let refresh = state
            .refresh_token()
            .ok_or_else(|| Error::MissingConfig("REFRESH_TOKEN".into()))?;
        if state.authorization_code().is_some() {
            warn!("ignoring stored authorization code while a refresh token exists");
        }

        let response = token::refresh_token(&self.client, self.config, refresh)
            .await
            .inspect_err(|e| warn!(error = %e, "token refresh failed, stored tokens kept"))?;

        let expires_at = self.persist_tokens(&response, false).await?;
        info!(expires_at, "access token refreshed");
        Ok(Outcome::Refreshed { expires_at })
    }

    /// Write the token pair (and expiry) in one atomic update. The consumed
    /// authorization code is cleared in the same write.
    async fn persist_tokens(
        &self,
        response: &TokenResponse,
        consume_code: bool,
    ) -> Result<Option<u64>> {
        let expires_at = response.expires_at(now_secs());
        let expires = expires_at.map(|t| t.to_string()).unwrap_or_default();

        let mut pairs = vec![
            (keys::ACCESS_TOKEN, response.access_token.as_str()),
            (keys::REFRESH_TOKEN, response.refresh_token.as_str()),
            (keys::TOKEN_EXPIRES_AT, expires.as_str()),
        ];
        if consume_code {
            pairs.push((keys::AUTHORIZATION_CODE, ""));
        }
        self.store.upsert_all(&pairs).await?;
        Ok(expires_at)
    }
}

/// Current lifecycle state, read from the store without any network I/O.
///
/// Needs no client identity, so it works on a store that is still being
/// provisioned.
pub async fn status(store: &CredentialStore, refresh_margin: Duration) -> Result<LifecycleState> {
    let state = store.load().await?;
    Ok(LifecycleState::assess(&state, now_secs(), refresh_margin))
}

/// Forget the PKCE pair, the pending code and the token pair so the next
/// run starts a fresh authorization. Client identity and unknown keys are
/// kept.
pub async fn reset(store: &CredentialStore) -> Result<()> {
    let state = store.load().await?;
    let pairs: Vec<(&str, &str)> = [
        keys::CODE_VERIFIER,
        keys::CODE_CHALLENGE,
        keys::AUTHORIZATION_CODE,
        keys::ACCESS_TOKEN,
        keys::REFRESH_TOKEN,
        keys::TOKEN_EXPIRES_AT,
    ]
    .into_iter()
    .filter(|key| state.get(key).is_some())
    .map(|key| (key, ""))
    .collect();

    if pairs.is_empty() {
        info!("credential lifecycle already reset");
        return Ok(());
    }
    store.upsert_all(&pairs).await?;
    info!(cleared = pairs.len(), "credential lifecycle reset");
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
