//! Token Service.
//!
//! Issues and verifies the three kinds of signed tokens the relay hands
//! out, all under one process-wide secret.

pub mod claims;
pub mod tokens;

pub use claims::{Claims, TokenKind};
pub use tokens::{TokenError, TokenService, TokenTtls};
