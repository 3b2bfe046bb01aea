use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{HttpResponse, ResponseError};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{error, warn};

use crate::admission::limiter::{caller_key, AdmissionController};
use crate::auth::{TokenClass, TokenIssuer};
use crate::ApiResponse;

/// Request gate applying the default admission policy to every request.
#[derive(Clone)]
pub struct Admission {
    controller: Arc<AdmissionController>,
    tokens: Arc<TokenIssuer>,
    fail_open: bool,
    trust_forwarded_for: bool,
}

impl Admission {
    pub fn new(controller: Arc<AdmissionController>, tokens: Arc<TokenIssuer>, fail_open: bool) -> Self {
        Self {
            controller,
            tokens,
            fail_open,
            trust_forwarded_for: false,
        }
    }

    /// Take the client address from `Forwarded`/`X-Forwarded-For`. Only
    /// safe behind a proxy that overwrites those headers.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

fn client_addr(req: &ServiceRequest, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return Some(addr.to_string());
        }
    }
    req.peer_addr().map(|addr| addr.ip().to_string())
}

impl<S, B> Transform<S, ServiceRequest> for Admission
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = AdmissionMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionMiddleware {
            service: Rc::new(service),
            gate: self.clone(),
        }))
    }
}

pub struct AdmissionMiddleware<S> {
    service: Rc<S>,
    gate: Admission,
}

impl<S, B> Service<ServiceRequest> for AdmissionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let gate = self.gate.clone();

        Box::pin(async move {
            let user_id = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .and_then(|token| gate.tokens.validate(token, TokenClass::Access).ok());
            let remote_addr = client_addr(&req, gate.trust_forwarded_for);
            let key = caller_key(user_id, remote_addr.as_deref());

            match gate.controller.allow_default(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Rate limit exceeded for {} on {}", key, req.path());
                    let response = HttpResponse::TooManyRequests()
                        .json(ApiResponse::message("Too Many Requests"));
                    return Ok(req.into_response(response).map_into_right_body());
                }
                Err(e) if gate.fail_open => {
                    error!("Rate counter store unavailable, admitting {}: {}", key, e);
                }
                Err(e) => {
                    error!("Rate counter store unavailable, rejecting {}: {}", key, e);
                    let response = e.error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }

            service.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}
