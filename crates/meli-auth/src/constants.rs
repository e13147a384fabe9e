//! MercadoLibre OAuth endpoints and credential store key names
//!
//! The endpoints are defaults; deployments override them through
//! `OAuthConfig` (tests point them at a mock server).

/// Authorization endpoint the user opens in a browser (Colombia site)
pub const AUTHORIZE_ENDPOINT: &str = "https://auth.mercadolibre.com.co/authorization";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://api.mercadolibre.com/oauth/token";

/// The only challenge method this client produces
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Upper bound on a single token endpoint request
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Refresh when the access token expires within this window
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

/// Keys of the `.env`-style credential store.
pub mod keys {
    pub const CLIENT_ID: &str = "CLIENT_ID";
    pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
    pub const REDIRECT_URI: &str = "REDIRECT_URI";
    pub const CODE_VERIFIER: &str = "CODE_VERIFIER";
    pub const CODE_CHALLENGE: &str = "CODE_CHALLENGE";
    pub const AUTHORIZATION_CODE: &str = "AUTHORIZATION_CODE";
    pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
    pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
    /// Unix seconds, computed from `expires_in` when the tokens were stored
    pub const TOKEN_EXPIRES_AT: &str = "TOKEN_EXPIRES_AT";

    /// Values never written to logs or `Debug` output.
    pub const SECRET_KEYS: &[&str] = &[
        CLIENT_SECRET,
        CODE_VERIFIER,
        AUTHORIZATION_CODE,
        ACCESS_TOKEN,
        REFRESH_TOKEN,
    ];
}
