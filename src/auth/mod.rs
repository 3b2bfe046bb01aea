//! Authentication module
//!
//! Password checks, signed access/refresh tokens, refresh-token protection
//! at rest and the account flows built on top of them.

pub mod accounts;
mod cipher;
pub mod handlers;
pub mod password;
mod service;

pub use accounts::{AccountService, Login, SignUp};
pub use cipher::{fingerprint, EncryptedToken, RefreshTokenCipher};
pub use service::{Claims, SigningKey, TokenClass, TokenIssuer, TokenPair};
