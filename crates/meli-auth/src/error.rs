//! Error types for the credential lifecycle

use std::path::PathBuf;

/// Errors from PKCE, store, and token endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential store not found at {} (create it with CLIENT_ID, CLIENT_SECRET and REDIRECT_URI first)", .0.display())]
    StoreNotFound(PathBuf),

    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint returned {status}: {body}")]
    TokenExchange { status: u16, body: String },

    /// Connection failure or timeout before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("invalid credential value: {0}")]
    InvalidValue(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the provider was reached and refused the grant, as opposed
    /// to the request never completing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::TokenExchange { .. })
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
