//! Configuration types and loading
//!
//! Precedence: CLI args > env vars > config file > credential store > defaults.
//! The config file is optional; without one the tool runs against `.env`
//! in the working directory and the production MercadoLibre endpoints.
//! The client secret is read from `CLIENT_SECRET`, `client_secret_file`,
//! or the credential store, never from the TOML directly.

use common::Secret;
use meli_auth::{CredentialState, OAuthConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, used only when it exists.
pub const DEFAULT_CONFIG_FILE: &str = "meli-token.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub client: ClientConfig,
}

/// Where the credential store lives
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".env"),
        }
    }
}

/// MercadoLibre endpoints and request bounds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub authorization_url: String,
    pub token_url: String,
    pub timeout_secs: u64,
    pub refresh_margin_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorization_url: meli_auth::AUTHORIZE_ENDPOINT.to_owned(),
            token_url: meli_auth::TOKEN_ENDPOINT.to_owned(),
            timeout_secs: meli_auth::DEFAULT_TIMEOUT_SECS,
            refresh_margin_secs: meli_auth::DEFAULT_REFRESH_MARGIN_SECS,
        }
    }
}

/// Client identity overrides. Anything left unset is taken from the
/// credential store.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    /// Path to a file holding the client secret
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay
    /// environment variables.
    ///
    /// Client secret resolution order:
    /// 1. CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let mut config: Config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };

        if let Ok(p) = std::env::var("CREDENTIALS_PATH") {
            config.store.path = PathBuf::from(p);
        }
        if let Some(id) = env_non_empty("CLIENT_ID") {
            config.client.client_id = Some(id);
        }
        if let Some(uri) = env_non_empty("REDIRECT_URI") {
            config.client.redirect_uri = Some(uri);
        }

        if let Ok(secret) = std::env::var("CLIENT_SECRET") {
            config.client.client_secret = Secret::<String>::non_empty(secret);
        } else if let Some(ref secret_file) = config.client.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            config.client.client_secret = Secret::<String>::non_empty(secret);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("authorization_url", &self.provider.authorization_url),
            ("token_url", &self.provider.token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(common::Error::Config("store path must not be empty".into()));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg, CONFIG_PATH env var, or the
    /// default file if present. `None` means run on built-in defaults.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.is_file().then_some(default)
    }

    /// Build the library config, filling client identity gaps from the
    /// credential store.
    pub fn oauth_config(&self, state: &CredentialState) -> common::Result<OAuthConfig> {
        let client_id = self
            .client
            .client_id
            .as_deref()
            .or(state.client_id())
            .ok_or_else(|| missing("client_id", "CLIENT_ID"))?;
        let redirect_uri = self
            .client
            .redirect_uri
            .as_deref()
            .or(state.redirect_uri())
            .ok_or_else(|| missing("redirect_uri", "REDIRECT_URI"))?;
        let client_secret = match &self.client.client_secret {
            Some(secret) => secret.clone(),
            None => state
                .client_secret()
                .and_then(|s| Secret::<String>::non_empty(s))
                .ok_or_else(|| missing("client_secret", "CLIENT_SECRET"))?,
        };

        Ok(OAuthConfig::new(client_id, client_secret, redirect_uri)
            .with_authorize_endpoint(self.provider.authorization_url.as_str())
            .with_token_endpoint(self.provider.token_url.as_str())
            .with_timeout(Duration::from_secs(self.provider.timeout_secs))
            .with_refresh_margin(Duration::from_secs(self.provider.refresh_margin_secs)))
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn missing(field: &str, key: &str) -> common::Error {
    common::Error::Config(format!(
        "{field} is not set: add {key}=... to the credential store, export {key}, or set [client].{field}"
    ))
}
