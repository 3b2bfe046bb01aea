use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Channel the code is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Email,
    Phone,
}

/// What a verified OTP authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpAction {
    Login,
    Signup,
    ResetPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpStatus {
    Pending,
    Success,
    Expire,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Email => "email",
            OtpType::Phone => "phone",
        }
    }
}

impl OtpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpAction::Login => "login",
            OtpAction::Signup => "signup",
            OtpAction::ResetPassword => "reset_password",
        }
    }
}

impl OtpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpStatus::Pending => "pending",
            OtpStatus::Success => "success",
            OtpStatus::Expire => "expire",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OtpStatus::Pending)
    }
}

impl FromStr for OtpType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(OtpType::Email),
            "phone" => Ok(OtpType::Phone),
            other => Err(Error::InvalidArgument(format!("unknown otp type: {}", other))),
        }
    }
}

impl FromStr for OtpAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(OtpAction::Login),
            "signup" => Ok(OtpAction::Signup),
            "reset_password" => Ok(OtpAction::ResetPassword),
            other => Err(Error::InvalidArgument(format!("unknown otp action: {}", other))),
        }
    }
}

impl FromStr for OtpStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OtpStatus::Pending),
            "success" => Ok(OtpStatus::Success),
            "expire" => Ok(OtpStatus::Expire),
            other => Err(Error::InvalidArgument(format!("unknown otp status: {}", other))),
        }
    }
}

impl fmt::Display for OtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OtpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (identity, channel, action) tuple that may hold at most one pending OTP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OtpSlot {
    pub key: String,
    pub otp_type: OtpType,
    pub action: OtpAction,
}

impl fmt::Display for OtpSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.otp_type, self.action, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: i64,
    pub key: String,
    pub otp_type: OtpType,
    pub action: OtpAction,
    pub code: String,
    pub token: String,
    pub status: OtpStatus,
    pub created_at: DateTime<Utc>,
}

impl OtpRecord {
    pub fn slot(&self) -> OtpSlot {
        OtpSlot {
            key: self.key.clone(),
            otp_type: self.otp_type,
            action: self.action,
        }
    }

    /// True once `ttl` has fully elapsed since issue.
    pub fn is_lapsed(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }

    /// Whether this OTP was issued to `key` over `otp_type`. Keys compare
    /// case-insensitively, like user emails.
    pub fn belongs_to(&self, key: &str, otp_type: OtpType) -> bool {
        self.otp_type == otp_type && self.key.trim().eq_ignore_ascii_case(key.trim())
    }
}

/// A pending OTP about to be persisted.
#[derive(Debug, Clone)]
pub struct NewOtp {
    pub slot: OtpSlot,
    pub code: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Raw `otp` row; enum columns are stored as text.
#[derive(Debug, FromRow)]
pub struct OtpRow {
    pub id: i64,
    pub key: String,
    #[sqlx(rename = "type")]
    pub otp_type: String,
    pub action: String,
    pub otp: String,
    pub token: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<OtpRow> for OtpRecord {
    type Error = Error;

    fn try_from(row: OtpRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            key: row.key,
            otp_type: row.otp_type.parse()?,
            action: row.action.parse()?,
            code: row.otp,
            token: row.token,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Refresh token as persisted: never the cleartext value.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    /// SHA-256 of the token handed to the caller, used as the lookup key.
    pub fingerprint: String,
    pub encrypted_token: String,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: i64,
    pub fingerprint: String,
    pub encrypted_token: String,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
