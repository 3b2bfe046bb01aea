use async_trait::async_trait;

use crate::db::models::{
    NewOtp, NewRefreshToken, OtpAction, OtpRecord, OtpSlot, OtpStatus, RefreshTokenRecord, User,
};
use crate::error::Error;

/// Typed access to OTP, user and refresh-token rows.
///
/// Implementations must keep single-statement writes atomic and must refuse a
/// second `pending` row for the same [`OtpSlot`] with [`Error::Conflict`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Most recent pending OTP for the slot, if any.
    async fn find_pending_otp(&self, slot: &OtpSlot) -> Result<Option<OtpRecord>, Error>;

    /// Expires `superseded` (when given and still pending) and inserts `otp`
    /// as one unit of work.
    async fn insert_otp_superseding(
        &self,
        superseded: Option<i64>,
        otp: NewOtp,
    ) -> Result<OtpRecord, Error>;

    async fn find_pending_otp_by_token(
        &self,
        token: &str,
        action: OtpAction,
    ) -> Result<Option<OtpRecord>, Error>;

    /// Conditional status change. Returns `false` when the row was no longer
    /// in `from`.
    async fn transition_otp(&self, id: i64, from: OtpStatus, to: OtpStatus) -> Result<bool, Error>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, Error>;

    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User, Error>;

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, Error>;

    async fn find_refresh_token(&self, fingerprint: &str) -> Result<Option<RefreshTokenRecord>, Error>;

    async fn refresh_tokens_for_user(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, Error>;
}
