//! Application State

use std::collections::HashMap;
use std::sync::Arc;

use campus_billing::Billing;

use crate::config::ServerConfig;
use crate::rate_limit::PollLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Payment sessions, activation, referrals and statistics
    pub billing: Arc<Billing>,

    /// Bearer token → operator id
    pub operators: Arc<HashMap<String, String>>,

    pub poll_limiter: Arc<PollLimiter>,
}

impl AppState {
    pub fn new(billing: Billing, config: &ServerConfig) -> Self {
        Self {
            billing: Arc::new(billing),
            operators: Arc::new(config.operator_tokens.clone()),
            poll_limiter: Arc::new(PollLimiter::new(config.poll_quota, config.poll_window)),
        }
    }
}
