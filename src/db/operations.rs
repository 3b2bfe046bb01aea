use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::db::models::{
    NewOtp, NewRefreshToken, OtpAction, OtpRecord, OtpRow, OtpSlot, OtpStatus, RefreshTokenRecord,
    User,
};
use crate::db::store::CredentialStore;
use crate::error::Error;

const OTP_COLUMNS: &str = "id, key, type, action, otp, token, status, created_at";
const REFRESH_COLUMNS: &str =
    "id, user_id, fingerprint, encrypted_token, nonce, expires_at, created_at";

/// Postgres backed [`CredentialStore`].
pub struct PgCredentialStore {
    pool: Arc<PgPool>,
}

impl PgCredentialStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>, Error> {
        Ok(self.pool.as_ref().begin().await?)
    }

    async fn supersede_and_insert_with_transaction(
        &self,
        superseded: Option<i64>,
        otp: &NewOtp,
        transaction: &mut Transaction<'_, Postgres>,
    ) -> Result<OtpRecord, Error> {
        // Serializes generators of the same slot across processes; released on commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(otp.slot.to_string())
            .execute(&mut **transaction)
            .await?;

        if let Some(id) = superseded {
            sqlx::query("UPDATE otp SET status = $1 WHERE id = $2 AND status = $3")
                .bind(OtpStatus::Expire.as_str())
                .bind(id)
                .bind(OtpStatus::Pending.as_str())
                .execute(&mut **transaction)
                .await?;
        }

        let row = sqlx::query_as::<_, OtpRow>(&format!(
            "INSERT INTO otp (key, type, action, otp, token, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            OTP_COLUMNS
        ))
        .bind(&otp.slot.key)
        .bind(otp.slot.otp_type.as_str())
        .bind(otp.slot.action.as_str())
        .bind(&otp.code)
        .bind(&otp.token)
        .bind(OtpStatus::Pending.as_str())
        .bind(otp.created_at)
        .fetch_one(&mut **transaction)
        .await?;

        row.try_into()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_pending_otp(&self, slot: &OtpSlot) -> Result<Option<OtpRecord>, Error> {
        let row = sqlx::query_as::<_, OtpRow>(&format!(
            "SELECT {} FROM otp WHERE key = $1 AND type = $2 AND action = $3 AND status = $4 \
             ORDER BY created_at DESC LIMIT 1",
            OTP_COLUMNS
        ))
        .bind(&slot.key)
        .bind(slot.otp_type.as_str())
        .bind(slot.action.as_str())
        .bind(OtpStatus::Pending.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(OtpRecord::try_from).transpose()
    }

    async fn insert_otp_superseding(
        &self,
        superseded: Option<i64>,
        otp: NewOtp,
    ) -> Result<OtpRecord, Error> {
        debug!("Inserting OTP for {}", otp.slot);
        let mut transaction = self.begin_transaction().await?;

        let result = self
            .supersede_and_insert_with_transaction(superseded, &otp, &mut transaction)
            .await;

        match result {
            Ok(record) => {
                transaction.commit().await?;
                Ok(record)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn find_pending_otp_by_token(
        &self,
        token: &str,
        action: OtpAction,
    ) -> Result<Option<OtpRecord>, Error> {
        let row = sqlx::query_as::<_, OtpRow>(&format!(
            "SELECT {} FROM otp WHERE token = $1 AND action = $2 AND status = $3",
            OTP_COLUMNS
        ))
        .bind(token)
        .bind(action.as_str())
        .bind(OtpStatus::Pending.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(OtpRecord::try_from).transpose()
    }

    async fn transition_otp(&self, id: i64, from: OtpStatus, to: OtpStatus) -> Result<bool, Error> {
        let result = sqlx::query("UPDATE otp SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, created_at FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User, Error> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, password_hash, created_at) VALUES ($1, $2, now()) \
             RETURNING id, email, password_hash, created_at",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, Error> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "INSERT INTO refresh_tokens (user_id, fingerprint, encrypted_token, nonce, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            REFRESH_COLUMNS
        ))
        .bind(token.user_id)
        .bind(&token.fingerprint)
        .bind(&token.encrypted_token)
        .bind(&token.nonce)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn find_refresh_token(&self, fingerprint: &str) -> Result<Option<RefreshTokenRecord>, Error> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {} FROM refresh_tokens WHERE fingerprint = $1",
            REFRESH_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn refresh_tokens_for_user(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, Error> {
        let records = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at DESC",
            REFRESH_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(records)
    }
}
