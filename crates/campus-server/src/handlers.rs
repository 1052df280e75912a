//! HTTP Handlers

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use campus_billing::{
    InitializeRequest, PaymentError, PaymentMethod, PaymentSession, PaymentStatusView,
    ReferralLedger, RewardTier, SessionFilter, SessionPage, SessionStatus, StatsSnapshot,
    StatusUpdate,
};

use crate::auth::{Operator, StudentId};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, PaymentError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct InitializeBody {
    pub method: PaymentMethod,
    pub phone: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub reference: String,
    pub status: SessionStatus,
    pub amount: i64,
    pub currency: String,
    pub requires_code: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeBody {
    pub reference: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub status: SessionStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteBody {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    pub demoted: usize,
}

// ============================================================================
// Student Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Open a payment session for the calling student
pub async fn initialize_payment(
    State(state): State<AppState>,
    StudentId(user_id): StudentId,
    Json(body): Json<InitializeBody>,
) -> Result<(StatusCode, Json<InitializeResponse>), PaymentError> {
    let sessions = state.billing.sessions();
    let session = sessions
        .initialize(InitializeRequest {
            user_id,
            method: body.method,
            phone: body.phone,
            amount: body.amount,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitializeResponse {
            requires_code: session.payment_method.requires_code(),
            reference: session.reference,
            status: session.status,
            amount: session.amount,
            currency: sessions.pricing().currency().to_string(),
        }),
    ))
}

/// Submit the provider verification code
pub async fn verify_code(
    State(state): State<AppState>,
    Json(body): Json<VerifyCodeBody>,
) -> ApiResult<PaymentStatusView> {
    let session = state
        .billing
        .sessions()
        .submit_verification_code(&body.reference, &body.code)
        .await?;
    Ok(Json(PaymentStatusView::from(&session)))
}

/// Client status poll; drives activation once the payment is approved
pub async fn poll_status(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(reference): Path<String>,
) -> ApiResult<PaymentStatusView> {
    state.poll_limiter.check(addr.ip(), &reference)?;
    let view = state.billing.sessions().poll_status(&reference).await?;
    Ok(Json(view))
}

/// The calling student's referral ledger
pub async fn my_referrals(
    State(state): State<AppState>,
    StudentId(user_id): StudentId,
) -> ApiResult<ReferralLedger> {
    require_user(&state, &user_id).await?;
    let ledger = state.billing.referrals().ensure_ledger(&user_id).await?;
    Ok(Json(ledger))
}

/// Record that the calling student invited someone
pub async fn record_invite(
    State(state): State<AppState>,
    StudentId(user_id): StudentId,
    Json(body): Json<InviteBody>,
) -> ApiResult<ReferralLedger> {
    require_user(&state, &user_id).await?;
    let ledger = state
        .billing
        .referrals()
        .record_invite(&user_id, &body.email)
        .await?;
    Ok(Json(ledger))
}

pub async fn claim_reward(
    State(state): State<AppState>,
    StudentId(user_id): StudentId,
    Path(tier): Path<RewardTier>,
) -> ApiResult<ReferralLedger> {
    require_user(&state, &user_id).await?;
    let ledger = state.billing.referrals().claim_reward(&user_id, tier).await?;
    Ok(Json(ledger))
}

async fn require_user(state: &AppState, user_id: &str) -> Result<(), PaymentError> {
    match state.billing.user(user_id).await? {
        Some(_) => Ok(()),
        None => Err(PaymentError::NotFound(format!("user {user_id}"))),
    }
}

// ============================================================================
// Operator Handlers
// ============================================================================

/// Approve, reject or mark a session as processing
pub async fn set_status(
    State(state): State<AppState>,
    Operator(operator_id): Operator,
    Path(reference): Path<String>,
    Json(body): Json<SetStatusBody>,
) -> ApiResult<PaymentSession> {
    let session = state
        .billing
        .sessions()
        .set_status(
            &reference,
            StatusUpdate {
                status: body.status,
                operator_id,
                note: body.note,
            },
        )
        .await?;
    Ok(Json(session))
}

/// Retry a failed activation
pub async fn redrive_activation(
    State(state): State<AppState>,
    Operator(operator_id): Operator,
    Path(reference): Path<String>,
) -> ApiResult<PaymentSession> {
    let session = state
        .billing
        .sessions()
        .redrive_activation(&reference, &operator_id)
        .await?;
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<AppState>,
    _operator: Operator,
    Path(reference): Path<String>,
) -> ApiResult<PaymentSession> {
    Ok(Json(state.billing.sessions().get_session(&reference).await?))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    _operator: Operator,
    Query(filter): Query<SessionFilter>,
) -> ApiResult<SessionPage> {
    Ok(Json(state.billing.sessions().list_sessions(&filter).await?))
}

pub async fn payment_stats(
    State(state): State<AppState>,
    _operator: Operator,
) -> ApiResult<StatsSnapshot> {
    Ok(Json(state.billing.stats().snapshot(Utc::now()).await?))
}

/// Demote overdue subscriptions; called by an external scheduler
pub async fn sweep_subscriptions(
    State(state): State<AppState>,
    Operator(operator_id): Operator,
) -> ApiResult<SweepResponse> {
    let demoted = state
        .billing
        .activation()
        .sweep_expired_subscriptions(Utc::now())
        .await?;
    tracing::info!(operator_id = %operator_id, demoted, "Subscription sweep finished");
    Ok(Json(SweepResponse { demoted }))
}
