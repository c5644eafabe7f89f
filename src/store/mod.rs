//! Ephemeral storage

pub mod tokens;

pub use tokens::{TokenError, TokenStore};
