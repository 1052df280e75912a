//! Request Identity
//!
//! Students are authenticated upstream; the gateway forwards their id in
//! `x-user-id`. Operators present a bearer token from `OPERATOR_TOKENS`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use campus_billing::PaymentError;

use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated student id
#[derive(Debug, Clone)]
pub struct StudentId(pub String);

impl FromRequestParts<AppState> for StudentId {
    type Rejection = PaymentError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Self(id.to_string()))
            .ok_or_else(|| PaymentError::Unauthorized("missing user identity".into()))
    }
}

/// Authenticated operator id
#[derive(Debug, Clone)]
pub struct Operator(pub String);

impl FromRequestParts<AppState> for Operator {
    type Rejection = PaymentError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymentError::Unauthorized("missing bearer token".into()))?;

        match state.operators.get(token) {
            Some(id) => Ok(Self(id.clone())),
            None => {
                tracing::warn!(path = %parts.uri.path(), "Unknown operator token");
                Err(PaymentError::Forbidden("unknown operator token".into()))
            }
        }
    }
}
