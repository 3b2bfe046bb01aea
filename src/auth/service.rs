use chrono::Duration;
use jsonwebtoken::{encode, decode, Header, EncodingKey, DecodingKey, Validation, Algorithm};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::cipher::{fingerprint, EncryptedToken, RefreshTokenCipher};
use crate::clock::Clock;
use crate::db::models::NewRefreshToken;
use crate::db::store::CredentialStore;
use crate::error::Error;

/// Which secret a token is signed with, and what it may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenClass::Access => f.write_str("access"),
            TokenClass::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
    pub jti: String,
    #[serde(rename = "use")]
    pub token_use: TokenClass,
}

/// Secret and lifetime for one token class.
#[derive(Clone)]
pub struct SigningKey {
    secret: String,
    ttl: Duration,
}

impl SigningKey {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self { secret: secret.into(), ttl }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

/// Mints and validates access and refresh tokens.
///
/// Refresh tokens are persisted only as ciphertext keyed by their SHA-256
/// fingerprint; the caller receives the signed token itself.
pub struct TokenIssuer {
    store: Arc<dyn CredentialStore>,
    cipher: RefreshTokenCipher,
    clock: Arc<dyn Clock>,
    access: SigningKey,
    refresh: SigningKey,
}

impl TokenIssuer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: RefreshTokenCipher,
        clock: Arc<dyn Clock>,
        access: SigningKey,
        refresh: SigningKey,
    ) -> Self {
        Self {
            store,
            cipher,
            clock,
            access,
            refresh,
        }
    }

    fn key(&self, class: TokenClass) -> &SigningKey {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    pub fn issue_access_token(&self, user_id: i64) -> Result<String, Error> {
        self.sign(user_id, TokenClass::Access)
    }

    pub async fn issue_refresh_token(&self, user_id: i64) -> Result<String, Error> {
        let token = self.sign(user_id, TokenClass::Refresh)?;
        let encrypted = self.cipher.encrypt(&token)?;
        let now = self.clock.now();

        let record = self
            .store
            .insert_refresh_token(NewRefreshToken {
                user_id,
                fingerprint: fingerprint(&token),
                encrypted_token: encrypted.encrypted_data,
                nonce: encrypted.nonce,
                expires_at: now + self.refresh.ttl,
                created_at: now,
            })
            .await?;

        debug!(refresh_token_id = record.id, "Stored refresh token for user {}", user_id);
        Ok(token)
    }

    pub async fn issue_pair(&self, user_id: i64) -> Result<TokenPair, Error> {
        Ok(TokenPair {
            token: self.issue_access_token(user_id)?,
            refresh_token: self.issue_refresh_token(user_id).await?,
        })
    }

    /// Verifies signature, algorithm, expiry and class; returns the subject.
    pub fn validate(&self, token: &str, class: TokenClass) -> Result<i64, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.key(class).secret.as_bytes()),
            &validation,
        )?
        .claims;

        if claims.token_use != class {
            return Err(Error::Unauthenticated(format!("not a {} token", class)));
        }
        if claims.exp <= self.clock.now().timestamp() {
            return Err(Error::Unauthenticated("token has expired".into()));
        }

        claims
            .sub
            .parse::<i64>()
            .map_err(|_| Error::Unauthenticated("malformed subject claim".into()))
    }

    /// Validates a presented refresh token against its persisted record.
    pub async fn authenticate_refresh(&self, token: &str) -> Result<i64, Error> {
        let user_id = self.validate(token, TokenClass::Refresh)?;

        let record = self
            .store
            .find_refresh_token(&fingerprint(token))
            .await?
            .ok_or_else(|| Error::Unauthenticated("unknown refresh token".into()))?;

        let stored = self
            .cipher
            .decrypt(&EncryptedToken {
                encrypted_data: record.encrypted_token.clone(),
                nonce: record.nonce.clone(),
            })
            .map_err(|e| {
                warn!(refresh_token_id = record.id, "Stored refresh token unreadable: {}", e);
                Error::Unauthenticated("unknown refresh token".into())
            })?;

        if stored != token || record.user_id != user_id {
            return Err(Error::Unauthenticated("unknown refresh token".into()));
        }
        if record.is_expired(self.clock.now()) {
            return Err(Error::Unauthenticated("refresh token has expired".into()));
        }

        Ok(user_id)
    }

    /// Exchanges a refresh token for a fresh pair.
    pub async fn refresh(&self, token: &str) -> Result<TokenPair, Error> {
        let user_id = self.authenticate_refresh(token).await?;
        let pair = self.issue_pair(user_id).await?;
        info!("Refreshed tokens for user {}", user_id);
        Ok(pair)
    }

    fn sign(&self, user_id: i64, class: TokenClass) -> Result<String, Error> {
        let key = self.key(class);
        let now = self.clock.now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + key.ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_use: class,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(key.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
    }
}
