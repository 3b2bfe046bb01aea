//! Credential storage.
//!
//! OTP rows, user rows and refresh-token rows behind the
//! [`CredentialStore`] trait, with Postgres and in-memory implementations.

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

pub use memory::InMemoryCredentialStore;
pub use models::{
    NewOtp, NewRefreshToken, OtpAction, OtpRecord, OtpSlot, OtpStatus, OtpType,
    RefreshTokenRecord, User,
};
pub use operations::PgCredentialStore;
pub use store::CredentialStore;
#[cfg(test)]
pub use store::MockCredentialStore;
