use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, error};

use crate::error::Error;
use crate::db::models::{OtpAction, OtpType};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    #[serde(rename = "type")]
    pub otp_type: String,
    pub action: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub token: String,
    pub otp: String,
    pub action: String,
}

pub async fn send_otp(
    req: web::Json<SendOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let otp_type: OtpType = req.otp_type.parse()?;
    let action: OtpAction = req.action.parse()?;
    info!("Received OTP request ({}, {}) for {}", otp_type, action, req.key);

    match state.otp.generate(&req.key, otp_type, action).await {
        Ok(generated) => Ok(HttpResponse::Ok().json(ApiResponse::with_data(
            "OTP sent successfully",
            generated,
        ))),
        Err(e) => {
            error!("OTP request failed for {}: {}", req.key, e);
            Err(e)
        }
    }
}

pub async fn verify_otp(
    req: web::Json<VerifyOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let action: OtpAction = req.action.parse()?;

    state.otp.verify(&req.token, &req.otp, action).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::message("OTP verified successfully")))
}
