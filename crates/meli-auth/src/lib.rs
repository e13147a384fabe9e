//! MercadoLibre OAuth 2.0 + PKCE credential lifecycle
//!
//! Provides PKCE generation, authorization URL construction, token
//! exchange/refresh, and the `.env`-style credential store, tied together
//! by the lifecycle `Orchestrator`. The crate has no dependency on the
//! binary and never reads the process environment.
//!
//! Credential flow, one `Orchestrator::run` per invocation:
//! 1. No verifier: `PkcePair::generate()`, persisted to the store
//! 2. No code: `build_authorization_url()` is returned for the user to open
//! 3. Code stored: `token::exchange_code()`, token pair persisted
//! 4. Refresh token stored: `token::refresh_token()`, rotated pair persisted

pub mod authorize;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod pkce;
pub mod token;

pub use authorize::{build_authorization_url, parse_authorization_input};
pub use config::OAuthConfig;
pub use constants::*;
pub use credentials::{CredentialState, CredentialStore};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleState, Orchestrator, Outcome};
pub use pkce::{PkcePair, compute_challenge, generate_verifier};
pub use token::{TokenResponse, exchange_code, refresh_token};
