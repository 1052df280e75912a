//! Router

use axum::{
    Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    claim_reward, get_session, health_check, initialize_payment, list_sessions, my_referrals,
    payment_stats, poll_status, record_invite, redrive_activation, set_status,
    sweep_subscriptions, verify_code,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Student payments
        .route("/payments/initialize", post(initialize_payment))
        .route("/payments/verify-code", post(verify_code))
        .route("/payments/status/{reference}", get(poll_status))
        .route("/referrals/me", get(my_referrals))
        .route("/referrals/invites", post(record_invite))
        .route("/referrals/rewards/{tier}", post(claim_reward))
        // Operator
        .route("/payments", get(list_sessions))
        .route("/payments/stats", get(payment_stats))
        .route("/payments/{reference}", get(get_session))
        .route("/payments/{reference}/status", put(set_status))
        .route("/payments/{reference}/activation", post(redrive_activation))
        .route("/subscriptions/sweep", post(sweep_subscriptions))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
