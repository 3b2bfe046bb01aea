use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::password::{hash_password, validate_email, validate_password_strength, verify_password};
use crate::auth::service::{TokenIssuer, TokenPair};
use crate::db::models::{OtpAction, OtpType, User};
use crate::db::store::CredentialStore;
use crate::error::Error;
use crate::notify::{self, Notification, NotificationKind, Notifier};
use crate::otp::OtpEngine;

#[derive(Debug, Deserialize)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub otp_token: String,
    pub otp_code: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
    pub otp_token: String,
    pub otp_code: String,
}

/// Signup, login and refresh flows composed from the OTP engine and the
/// token issuer.
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    otp: Arc<OtpEngine>,
    tokens: Arc<TokenIssuer>,
    notifier: Arc<dyn Notifier>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        otp: Arc<OtpEngine>,
        tokens: Arc<TokenIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            otp,
            tokens,
            notifier,
        }
    }

    pub async fn sign_up(&self, request: &SignUp) -> Result<User, Error> {
        validate_email(&request.email)?;
        validate_password_strength(&request.password)?;

        // Dry run: the OTP is only consumed once the user row exists.
        self.otp
            .verify_for(
                &request.email,
                OtpType::Email,
                &request.otp_token,
                &request.otp_code,
                OtpAction::Signup,
            )
            .await?;

        if self.store.find_user_by_email(&request.email).await?.is_some() {
            return Err(Error::Conflict(format!("user {} already exists", request.email)));
        }

        let password_hash = hash_password(&request.password)?;
        let user = self.store.insert_user(&request.email, &password_hash).await?;

        if let Err(e) = self
            .otp
            .verify_and_commit_for(
                &request.email,
                OtpType::Email,
                &request.otp_token,
                &request.otp_code,
                OtpAction::Signup,
            )
            .await
        {
            error!(user_id = user.id, "Failed to mark signup OTP as used: {}", e);
        }

        info!(user_id = user.id, "User signed up: {}", user.email);

        notify::dispatch(
            self.notifier.clone(),
            Notification {
                destination: user.email.clone(),
                kind: NotificationKind::Welcome,
                payload: json!({ "email": user.email }),
            },
        );

        Ok(user)
    }

    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User, Error> {
        let invalid = || Error::Unauthenticated("invalid email or password".into());

        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&user.password_hash, password)? {
            return Err(invalid());
        }

        Ok(user)
    }

    pub async fn login(&self, request: &Login) -> Result<TokenPair, Error> {
        let user = self.verify_credentials(&request.email, &request.password).await?;

        self.otp
            .verify_and_commit_for(
                &user.email,
                OtpType::Email,
                &request.otp_token,
                &request.otp_code,
                OtpAction::Login,
            )
            .await?;

        let pair = self.tokens.issue_pair(user.id).await?;
        info!(user_id = user.id, "User logged in");
        Ok(pair)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        self.tokens.refresh(refresh_token).await
    }
}
