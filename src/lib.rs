pub mod admission;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod otp;

use std::sync::Arc;
use std::time::Duration;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
pub use config::Settings;

pub use admission::{Admission, AdmissionController, RateCounterStore, RatePolicy, Window};
pub use auth::{AccountService, RefreshTokenCipher, SigningKey, TokenClass, TokenIssuer, TokenPair};
pub use clock::{Clock, SystemClock};
pub use db::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
pub use notify::{ChannelNotifier, Notification, Notifier};
pub use otp::OtpEngine;

/// Body shape shared by every handler.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T = ()> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Liveness probe.
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::message("pong"))
}

/// Registers every route under its group.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/app").route("/ping", web::get().to(ping)))
        .service(
            web::scope("/otp")
                .route("/send", web::post().to(otp::handlers::send_otp))
                .route("/verify", web::post().to(otp::handlers::verify_otp)),
        )
        .service(
            web::scope("/user")
                .route("/sign-up", web::post().to(auth::handlers::sign_up))
                .route("/login", web::post().to(auth::handlers::login))
                .route("/refresh-token", web::post().to(auth::handlers::refresh_token))
                .route("/verify-credentials", web::post().to(auth::handlers::verify_credentials)),
        );
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn CredentialStore>,
    pub otp: Arc<OtpEngine>,
    pub tokens: Arc<TokenIssuer>,
    pub accounts: Arc<AccountService>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    /// Connects to Postgres and Redis and wires the components together.
    /// Returns the receiving end of the notification queue.
    pub async fn new(config: Settings) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let store = PgCredentialStore::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        store.migrate().await?;

        let counters = admission::RedisCounterStore::connect(&config.redis.url).await?;
        let (notifier, receiver) = ChannelNotifier::channel();

        let state = Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(counters),
            Arc::new(notifier),
            Arc::new(SystemClock),
        )?;
        Ok((state, receiver))
    }

    /// Same wiring over caller supplied adapters.
    pub fn from_parts(
        config: Settings,
        store: Arc<dyn CredentialStore>,
        counters: Arc<dyn RateCounterStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cipher = RefreshTokenCipher::from_base64_key(&config.auth.refresh_encryption_key)?;

        let otp = Arc::new(OtpEngine::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            chrono::Duration::minutes(config.otp.expiry_minutes),
        ));
        let tokens = Arc::new(TokenIssuer::new(
            store.clone(),
            cipher,
            clock,
            SigningKey::new(
                config.auth.access_secret.clone(),
                chrono::Duration::minutes(config.auth.access_ttl_minutes),
            ),
            SigningKey::new(
                config.auth.refresh_secret.clone(),
                chrono::Duration::minutes(config.auth.refresh_ttl_minutes),
            ),
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            otp.clone(),
            tokens.clone(),
            notifier,
        ));
        let admission = Arc::new(AdmissionController::new(
            counters,
            RatePolicy {
                requests: config.rate_limit.requests,
                window: config.rate_limit.window,
            },
        ));

        if config.rate_limit.fail_open {
            warn!("Admission control will admit requests while the counter store is down");
        }

        Ok(Self {
            config: Arc::new(config),
            store,
            otp,
            tokens,
            accounts,
            admission,
        })
    }

    /// Request gate configured from these settings.
    pub fn admission_gate(&self) -> Admission {
        Admission::new(
            self.admission.clone(),
            self.tokens.clone(),
            self.config.rate_limit.fail_open,
        )
        .trust_forwarded_for(self.config.rate_limit.trust_forwarded_for)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::InMemoryCounterStore;

    fn in_memory_state() -> AppState {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (notifier, _receiver) = ChannelNotifier::channel();
        AppState::from_parts(
            Settings::new_for_test().expect("Failed to load test config"),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryCounterStore::new(clock.clone())),
            Arc::new(notifier),
            clock,
        )
        .expect("Failed to build state")
    }

    #[test]
    fn test_app_state_clone() {
        let state = in_memory_state();
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.tokens, &cloned.tokens));
        assert!(Arc::ptr_eq(&state.otp, &cloned.otp));
    }

    #[test]
    fn test_wiring_uses_configured_policy() {
        let state = in_memory_state();
        assert_eq!(state.admission.policy(), RatePolicy::default());
        assert_eq!(state.otp.ttl(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_api_response_omits_missing_data() {
        let body = serde_json::to_value(ApiResponse::message("pong")).unwrap();
        assert_eq!(body, serde_json::json!({"message": "pong"}));

        let body = serde_json::to_value(ApiResponse::with_data("ok", 5)).unwrap();
        assert_eq!(body, serde_json::json!({"message": "ok", "data": 5}));
    }
}
