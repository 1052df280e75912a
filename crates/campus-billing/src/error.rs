//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Billing errors
///
/// Activation failures are deliberately absent: they are recorded on the
/// payment session and reported to operators, never returned to a client.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Bad input (missing fields, malformed phone, unknown specialty)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Amount does not match the pricing table
    #[error("Invalid amount: expected {expected}, got {got}")]
    InvalidAmount { expected: i64, got: i64 },

    /// Unknown reference or document
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transition not allowed from the current status
    #[error("Invalid state: cannot {operation} while {status}")]
    InvalidState { operation: String, status: String },

    /// Mutation attempted on an approved or rejected session
    #[error("Payment {0} is already finalized")]
    AlreadyFinalized(String),

    /// Missing operator credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials present but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Polling quota exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Optimistic retries exhausted
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification dispatch failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    pub(crate) fn invalid_state(operation: &str, status: impl std::fmt::Display) -> Self {
        PaymentError::InvalidState {
            operation: operation.to_string(),
            status: status.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Conflict(_) | PaymentError::Storage(_) | PaymentError::Notification(_)
        )
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Validation(_)
            | PaymentError::InvalidAmount { .. }
            | PaymentError::InvalidState { .. } => 400,
            PaymentError::Unauthorized(_) => 401,
            PaymentError::Forbidden(_) => 403,
            PaymentError::NotFound(_) => 404,
            PaymentError::AlreadyFinalized(_) | PaymentError::Conflict(_) => 409,
            PaymentError::RateLimited => 429,
            PaymentError::Storage(_) | PaymentError::Notification(_) | PaymentError::Config(_) => {
                500
            }
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::InvalidAmount { .. } => "INVALID_AMOUNT",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::InvalidState { .. } => "INVALID_STATE",
            PaymentError::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            PaymentError::Unauthorized(_) => "UNAUTHORIZED",
            PaymentError::Forbidden(_) => "FORBIDDEN",
            PaymentError::RateLimited => "RATE_LIMITED",
            PaymentError::Conflict(_) => "CONFLICT",
            PaymentError::Storage(_) => "STORAGE_ERROR",
            PaymentError::Notification(_) => "NOTIFICATION_ERROR",
            PaymentError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) => msg.clone(),
            PaymentError::InvalidAmount { expected, .. } => {
                format!("The amount for your level is {expected}.")
            }
            PaymentError::NotFound(_) => "Payment not found.".into(),
            PaymentError::InvalidState { .. } => {
                "This action is not available for the payment in its current state.".into()
            }
            PaymentError::AlreadyFinalized(_) => "This payment has already been finalized.".into(),
            PaymentError::Unauthorized(_) => "Authentication required.".into(),
            PaymentError::Forbidden(_) => "You are not allowed to perform this action.".into(),
            PaymentError::RateLimited => "Too many requests. Please wait a moment.".into(),
            _ => "Your payment is being processed.".into(),
        }
    }
}

#[cfg(feature = "axum-handlers")]
mod axum_impl {
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    use super::PaymentError;

    impl IntoResponse for PaymentError {
        fn into_response(self) -> Response {
            let status =
                StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                tracing::error!(error = %self, "Request failed");
            }
            let body = serde_json::json!({
                "error": self.user_message(),
                "code": self.code(),
            });
            (status, Json(body)).into_response()
        }
    }
}
