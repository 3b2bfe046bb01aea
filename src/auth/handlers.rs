use actix_web::{web, HttpResponse, HttpRequest};
use serde::Deserialize;
use tracing::{info, error};

use crate::auth::accounts::{Login, SignUp};
use crate::error::Error;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    req: web::Json<Login>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    info!("Received login request for email: {}", req.email);
    match state.accounts.login(&req).await {
        Ok(pair) => {
            info!("Login successful for email: {}", req.email);
            Ok(HttpResponse::Ok().json(ApiResponse::with_data("User logged in successfully", pair)))
        }
        Err(e) => {
            error!("Login failed for email: {}: {}", req.email, e);
            Err(e)
        }
    }
}

pub async fn sign_up(
    req: web::Json<SignUp>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    info!("Received sign-up request for email: {}", req.email);
    match state.accounts.sign_up(&req).await {
        Ok(_) => Ok(HttpResponse::Created().json(ApiResponse::message("User signed up successfully"))),
        Err(e) => {
            error!("Sign-up failed for email: {}: {}", req.email, e);
            Err(e)
        }
    }
}

pub async fn verify_credentials(
    req: web::Json<CredentialsRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    state.accounts.verify_credentials(&req.email, &req.password).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::message("User credentials are valid")))
}

pub async fn refresh_token(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = bearer_token(&req)
        .ok_or_else(|| Error::Unauthenticated("no refresh token provided".into()))?;

    let pair = state.accounts.refresh(token).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_data("Token refreshed successfully", pair)))
}

/// `Authorization` header value with an optional `Bearer ` prefix removed.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim())
        .filter(|t| !t.is_empty())
}
