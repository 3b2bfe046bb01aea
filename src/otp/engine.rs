use chrono::Duration;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::models::{NewOtp, OtpAction, OtpRecord, OtpSlot, OtpStatus, OtpType};
use crate::db::store::CredentialStore;
use crate::error::Error;
use crate::notify::{self, Notification, NotificationKind, Notifier};
use crate::otp::lock::KeyedLock;

pub const OTP_LENGTH: usize = 6;

/// What the caller gets back from generation; the code itself travels out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedOtp {
    pub id: i64,
    pub token: String,
}

/// Issues and checks one-time passcodes.
///
/// Generation for a given slot is serialized in-process by a keyed lock and
/// across processes by the store's single-pending constraint.
pub struct OtpEngine {
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: KeyedLock<OtpSlot>,
}

impl OtpEngine {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            ttl,
            slots: KeyedLock::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn generate(
        &self,
        key: &str,
        otp_type: OtpType,
        action: OtpAction,
    ) -> Result<GeneratedOtp, Error> {
        if key.trim().is_empty() {
            return Err(Error::InvalidArgument("identity key must not be empty".into()));
        }

        if action == OtpAction::Login && otp_type == OtpType::Email
            && self.store.find_user_by_email(key).await?.is_none()
        {
            return Err(Error::NotFound(format!("no user found with email {}", key)));
        }

        let slot = OtpSlot {
            key: key.to_string(),
            otp_type,
            action,
        };
        let _guard = self.slots.lock(&slot).await;
        let now = self.clock.now();

        let superseded = match self.store.find_pending_otp(&slot).await? {
            Some(existing) if !existing.is_lapsed(now, self.ttl) => {
                return Err(Error::Conflict(format!(
                    "OTP already sent recently at {}, please wait before requesting a new one",
                    existing.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                )));
            }
            Some(existing) => Some(existing.id),
            None => None,
        };

        let code = generate_code();
        let record = self
            .store
            .insert_otp_superseding(
                superseded,
                NewOtp {
                    slot: slot.clone(),
                    code: code.clone(),
                    token: generate_token(),
                    created_at: now,
                },
            )
            .await?;

        info!(otp_id = record.id, superseded = ?superseded, "Issued OTP for {}", slot);

        notify::dispatch(
            self.notifier.clone(),
            Notification {
                destination: record.key.clone(),
                kind: NotificationKind::Otp,
                payload: json!({
                    "otp": code,
                    "type": otp_type,
                    "action": action,
                    "expires_in_minutes": self.ttl.num_minutes(),
                }),
            },
        );

        Ok(GeneratedOtp {
            id: record.id,
            token: record.token,
        })
    }

    /// Checks the code without consuming the OTP.
    pub async fn verify(&self, token: &str, code: &str, action: OtpAction) -> Result<(), Error> {
        self.check(token, code, action, None).await.map(|_| ())
    }

    /// Checks the code and marks the OTP as used.
    pub async fn verify_and_commit(
        &self,
        token: &str,
        code: &str,
        action: OtpAction,
    ) -> Result<(), Error> {
        let otp = self.check(token, code, action, None).await?;
        self.commit(otp).await
    }

    /// [`verify`](Self::verify), additionally requiring the OTP to have been
    /// issued to `key` over `otp_type`.
    pub async fn verify_for(
        &self,
        key: &str,
        otp_type: OtpType,
        token: &str,
        code: &str,
        action: OtpAction,
    ) -> Result<(), Error> {
        self.check(token, code, action, Some((key, otp_type)))
            .await
            .map(|_| ())
    }

    /// [`verify_and_commit`](Self::verify_and_commit) bound to a recipient.
    pub async fn verify_and_commit_for(
        &self,
        key: &str,
        otp_type: OtpType,
        token: &str,
        code: &str,
        action: OtpAction,
    ) -> Result<(), Error> {
        let otp = self
            .check(token, code, action, Some((key, otp_type)))
            .await?;
        self.commit(otp).await
    }

    async fn commit(&self, otp: OtpRecord) -> Result<(), Error> {
        if !self
            .store
            .transition_otp(otp.id, OtpStatus::Pending, OtpStatus::Success)
            .await?
        {
            // Another request committed or expired it between read and write.
            return Err(Error::NotFound("invalid OTP details".into()));
        }

        info!(otp_id = otp.id, "OTP consumed for {}", otp.slot());
        Ok(())
    }

    async fn check(
        &self,
        token: &str,
        code: &str,
        action: OtpAction,
        recipient: Option<(&str, OtpType)>,
    ) -> Result<OtpRecord, Error> {
        let not_found = || Error::NotFound("invalid OTP details".into());

        let otp = self
            .store
            .find_pending_otp_by_token(token, action)
            .await?
            .ok_or_else(not_found)?;

        // Someone else's OTP reads exactly like an unknown one.
        if let Some((key, otp_type)) = recipient {
            if !otp.belongs_to(key, otp_type) {
                return Err(not_found());
            }
        }

        if otp.is_lapsed(self.clock.now(), self.ttl) {
            match self
                .store
                .transition_otp(otp.id, OtpStatus::Pending, OtpStatus::Expire)
                .await
            {
                Ok(_) => info!(otp_id = otp.id, "Expired lapsed OTP"),
                Err(e) => warn!(otp_id = otp.id, "Failed to expire lapsed OTP: {}", e),
            }
            return Err(Error::Expired("OTP has expired, please request a new one".into()));
        }

        if otp.code != code {
            return Err(Error::InvalidCode);
        }

        Ok(otp)
    }
}

/// Uniform six digit code, leading zeros kept.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", n, width = OTP_LENGTH)
}

fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{InMemoryCredentialStore, MockCredentialStore};
    use crate::notify::ChannelNotifier;
    use chrono::Utc;

    fn engine_with(store: Arc<dyn CredentialStore>, clock: Arc<ManualClock>) -> OtpEngine {
        let (notifier, _receiver) = ChannelNotifier::channel();
        OtpEngine::new(store, Arc::new(notifier), clock, Duration::minutes(5))
    }

    fn pending(id: i64, created_at: chrono::DateTime<Utc>) -> OtpRecord {
        OtpRecord {
            id,
            key: "alice@x.com".into(),
            otp_type: OtpType::Email,
            action: OtpAction::Signup,
            code: "654321".into(),
            token: "abc123".into(),
            status: OtpStatus::Pending,
            created_at,
        }
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert_eq!(code.len(), OTP_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_tokens_are_distinct_from_each_other() {
        assert_ne!(generate_token(), generate_token());
        assert_eq!(generate_token().len(), 32);
    }

    #[tokio::test]
    async fn test_login_email_requires_existing_user() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let engine = engine_with(store.clone(), Arc::new(ManualClock::default()));

        let result = engine.generate("nobody@x.com", OtpType::Email, OtpAction::Login).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(store.otp_rows().await.is_empty());

        // Phone login does not consult the user table.
        engine.generate("+15550100", OtpType::Phone, OtpAction::Login).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let engine = engine_with(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(ManualClock::default()),
        );
        let result = engine.generate("  ", OtpType::Email, OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_store_outage_propagates_from_generate() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_pending_otp()
            .returning(|_| Err(Error::StoreUnavailable("connection reset".into())));
        store.expect_insert_otp_superseding().never();

        let engine = engine_with(Arc::new(store), Arc::new(ManualClock::default()));
        let result = engine.generate("alice@x.com", OtpType::Email, OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stale_pending_row_is_superseded() {
        let clock = Arc::new(ManualClock::default());
        let stale = pending(7, clock.now() - Duration::minutes(6));

        let mut store = MockCredentialStore::new();
        store
            .expect_find_pending_otp()
            .returning(move |_| Ok(Some(stale.clone())));
        store
            .expect_insert_otp_superseding()
            .withf(|superseded, otp| *superseded == Some(7) && otp.code.len() == OTP_LENGTH)
            .times(1)
            .returning(|_, otp| {
                Ok(OtpRecord {
                    id: 8,
                    key: otp.slot.key,
                    otp_type: otp.slot.otp_type,
                    action: otp.slot.action,
                    code: otp.code,
                    token: otp.token,
                    status: OtpStatus::Pending,
                    created_at: otp.created_at,
                })
            });

        let engine = engine_with(Arc::new(store), clock);
        let generated = engine
            .generate("alice@x.com", OtpType::Email, OtpAction::Signup)
            .await
            .unwrap();
        assert_eq!(generated.id, 8);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_expiry_write_still_reports_expired() {
        let clock = Arc::new(ManualClock::default());
        let lapsed = pending(3, clock.now() - Duration::minutes(10));

        let mut store = MockCredentialStore::new();
        store
            .expect_find_pending_otp_by_token()
            .returning(move |_, _| Ok(Some(lapsed.clone())));
        store
            .expect_transition_otp()
            .withf(|id, from, to| *id == 3 && *from == OtpStatus::Pending && *to == OtpStatus::Expire)
            .times(1)
            .returning(|_, _, _| Err(Error::StoreUnavailable("write timed out".into())));

        let engine = engine_with(Arc::new(store), clock);
        let result = engine.verify("abc123", "654321", OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::Expired(_))));
    }

    #[tokio::test]
    async fn test_lost_commit_race_reports_not_found() {
        let clock = Arc::new(ManualClock::default());
        let fresh = pending(4, clock.now());

        let mut store = MockCredentialStore::new();
        store
            .expect_find_pending_otp_by_token()
            .returning(move |_, _| Ok(Some(fresh.clone())));
        store.expect_transition_otp().returning(|_, _, _| Ok(false));

        let engine = engine_with(Arc::new(store), clock);
        let result = engine.verify_and_commit("abc123", "654321", OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_row_pending() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.insert_user("alice@x.com", "hash").await.unwrap();
        let engine = engine_with(store.clone(), Arc::new(ManualClock::default()));

        let generated = engine
            .generate("alice@x.com", OtpType::Email, OtpAction::Login)
            .await
            .unwrap();
        let code = store.otp_by_id(generated.id).await.unwrap().code;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..3 {
            let result = engine.verify_and_commit(&generated.token, wrong, OtpAction::Login).await;
            assert!(matches!(result, Err(Error::InvalidCode)));
        }
        assert_eq!(store.otp_by_id(generated.id).await.unwrap().status, OtpStatus::Pending);

        // Right token, wrong action.
        let result = engine.verify(&generated.token, &code, OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ttl_boundary_agrees_between_generate_and_verify() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::default());
        let engine = engine_with(store.clone(), clock.clone());

        let signup = engine
            .generate("alice@x.com", OtpType::Email, OtpAction::Signup)
            .await
            .unwrap();
        let reset = engine
            .generate("alice@x.com", OtpType::Email, OtpAction::ResetPassword)
            .await
            .unwrap();
        let code = store.otp_by_id(signup.id).await.unwrap().code;

        clock.advance(Duration::minutes(5));

        // At exactly the TTL the OTP is lapsed for both operations.
        let result = engine.verify(&signup.token, &code, OtpAction::Signup).await;
        assert!(matches!(result, Err(Error::Expired(_))));

        engine
            .generate("alice@x.com", OtpType::Email, OtpAction::ResetPassword)
            .await
            .unwrap();
        assert_eq!(store.otp_by_id(reset.id).await.unwrap().status, OtpStatus::Expire);
    }

    #[tokio::test]
    async fn test_recipient_mismatch_reads_as_not_found() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let engine = engine_with(store.clone(), Arc::new(ManualClock::default()));

        let generated = engine
            .generate("Mallory@x.com", OtpType::Email, OtpAction::Signup)
            .await
            .unwrap();
        let code = store.otp_by_id(generated.id).await.unwrap().code;

        let result = engine
            .verify_and_commit_for(
                "victim@x.com",
                OtpType::Email,
                &generated.token,
                &code,
                OtpAction::Signup,
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        let result = engine
            .verify_for(
                "mallory@x.com",
                OtpType::Phone,
                &generated.token,
                &code,
                OtpAction::Signup,
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.otp_by_id(generated.id).await.unwrap().status, OtpStatus::Pending);

        engine
            .verify_and_commit_for(
                "mallory@X.com",
                OtpType::Email,
                &generated.token,
                &code,
                OtpAction::Signup,
            )
            .await
            .unwrap();
        assert_eq!(store.otp_by_id(generated.id).await.unwrap().status, OtpStatus::Success);
    }
}
