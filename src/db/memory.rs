use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::db::models::{
    NewOtp, NewRefreshToken, OtpAction, OtpRecord, OtpSlot, OtpStatus, RefreshTokenRecord, User,
};
use crate::db::store::CredentialStore;
use crate::error::Error;

#[derive(Debug, Default)]
struct Tables {
    otps: Vec<OtpRecord>,
    users: Vec<User>,
    refresh_tokens: Vec<RefreshTokenRecord>,
    next_otp_id: i64,
    next_user_id: i64,
    next_refresh_id: i64,
}

/// Process-local [`CredentialStore`] holding rows in memory.
///
/// Enforces the same single-pending-OTP and unique-email rules as the
/// Postgres schema, so it is a faithful stand-in for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every OTP row ever written, oldest first.
    pub async fn otp_rows(&self) -> Vec<OtpRecord> {
        self.tables.read().await.otps.clone()
    }

    pub async fn otp_by_id(&self, id: i64) -> Option<OtpRecord> {
        self.tables.read().await.otps.iter().find(|o| o.id == id).cloned()
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_pending_otp(&self, slot: &OtpSlot) -> Result<Option<OtpRecord>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .otps
            .iter()
            .filter(|o| o.status == OtpStatus::Pending && o.slot() == *slot)
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn insert_otp_superseding(
        &self,
        superseded: Option<i64>,
        otp: NewOtp,
    ) -> Result<OtpRecord, Error> {
        let mut tables = self.tables.write().await;

        let still_pending = tables.otps.iter().any(|o| {
            o.status == OtpStatus::Pending && o.slot() == otp.slot && Some(o.id) != superseded
        });
        if still_pending {
            return Err(Error::Conflict(format!("a pending OTP already exists for {}", otp.slot)));
        }
        if tables.otps.iter().any(|o| o.token == otp.token) {
            return Err(Error::Conflict("duplicate OTP token".into()));
        }

        if let Some(id) = superseded {
            if let Some(old) = tables
                .otps
                .iter_mut()
                .find(|o| o.id == id && o.status == OtpStatus::Pending)
            {
                old.status = OtpStatus::Expire;
            }
        }

        let record = OtpRecord {
            id: next_id(&mut tables.next_otp_id),
            key: otp.slot.key,
            otp_type: otp.slot.otp_type,
            action: otp.slot.action,
            code: otp.code,
            token: otp.token,
            status: OtpStatus::Pending,
            created_at: otp.created_at,
        };
        tables.otps.push(record.clone());
        Ok(record)
    }

    async fn find_pending_otp_by_token(
        &self,
        token: &str,
        action: OtpAction,
    ) -> Result<Option<OtpRecord>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .otps
            .iter()
            .find(|o| o.token == token && o.action == action && o.status == OtpStatus::Pending)
            .cloned())
    }

    async fn transition_otp(&self, id: i64, from: OtpStatus, to: OtpStatus) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        match tables.otps.iter_mut().find(|o| o.id == id && o.status == from) {
            Some(otp) => {
                otp.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, Error> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User, Error> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(Error::Conflict(format!("user {} already exists", email)));
        }

        let user = User {
            id: next_id(&mut tables.next_user_id),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, Error> {
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.iter().any(|t| t.fingerprint == token.fingerprint) {
            return Err(Error::Conflict("duplicate refresh token".into()));
        }

        let record = RefreshTokenRecord {
            id: next_id(&mut tables.next_refresh_id),
            user_id: token.user_id,
            fingerprint: token.fingerprint,
            encrypted_token: token.encrypted_token,
            nonce: token.nonce,
            expires_at: token.expires_at,
            created_at: token.created_at,
        };
        tables.refresh_tokens.push(record.clone());
        Ok(record)
    }

    async fn find_refresh_token(&self, fingerprint: &str) -> Result<Option<RefreshTokenRecord>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .refresh_tokens
            .iter()
            .find(|t| t.fingerprint == fingerprint)
            .cloned())
    }

    async fn refresh_tokens_for_user(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, Error> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .refresh_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::OtpType;

    fn slot() -> OtpSlot {
        OtpSlot {
            key: "alice@x.com".into(),
            otp_type: OtpType::Email,
            action: OtpAction::Signup,
        }
    }

    fn new_otp(token: &str) -> NewOtp {
        NewOtp {
            slot: slot(),
            code: "123456".into(),
            token: token.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_second_pending_row_is_refused() {
        let store = InMemoryCredentialStore::new();
        store.insert_otp_superseding(None, new_otp("t1")).await.unwrap();

        let result = store.insert_otp_superseding(None, new_otp("t2")).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(store.otp_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_superseding_expires_previous_row() {
        let store = InMemoryCredentialStore::new();
        let first = store.insert_otp_superseding(None, new_otp("t1")).await.unwrap();
        let second = store
            .insert_otp_superseding(Some(first.id), new_otp("t2"))
            .await
            .unwrap();

        assert_eq!(store.otp_by_id(first.id).await.unwrap().status, OtpStatus::Expire);
        assert_eq!(store.find_pending_otp(&slot()).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = InMemoryCredentialStore::new();
        let otp = store.insert_otp_superseding(None, new_otp("t1")).await.unwrap();

        assert!(store.transition_otp(otp.id, OtpStatus::Pending, OtpStatus::Success).await.unwrap());
        assert!(!store.transition_otp(otp.id, OtpStatus::Pending, OtpStatus::Expire).await.unwrap());
        assert_eq!(store.otp_by_id(otp.id).await.unwrap().status, OtpStatus::Success);
    }

    #[tokio::test]
    async fn test_user_email_is_case_insensitive() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user("Alice@X.com", "hash").await.unwrap();

        let found = store.find_user_by_email("alice@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(matches!(
            store.insert_user("ALICE@x.com", "hash").await,
            Err(Error::Conflict(_))
        ));
    }
}
