//! Shared types for the MercadoLibre token keeper

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
