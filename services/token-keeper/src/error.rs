//! Failure classes and their process exit codes
//!
//! A run that ends waiting for user authorization is a success (exit 0).
//! Every failure exits non-zero, with a distinct code per class so a
//! scheduler can tell a misconfiguration from a flaky network.

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Missing store, missing client identity, bad config file
    Config,
    /// Token endpoint answered with a non-2xx status
    Rejected,
    /// Token endpoint unreachable or timed out
    Transport,
    /// Anything else (store I/O, malformed response)
    Other,
}

impl Failure {
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(auth) = err.downcast_ref::<meli_auth::Error>() {
            return match auth {
                auth if auth.is_rejection() => Failure::Rejected,
                meli_auth::Error::StoreNotFound(_) | meli_auth::Error::MissingConfig(_) => {
                    Failure::Config
                }
                meli_auth::Error::Http(_) => Failure::Transport,
                _ => Failure::Other,
            };
        }
        if err.downcast_ref::<common::Error>().is_some() {
            return Failure::Config;
        }
        Failure::Other
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Failure::Other => 1,
            Failure::Config => 2,
            Failure::Rejected => 3,
            Failure::Transport => 4,
        }
    }
}
