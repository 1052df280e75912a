//! campus HTTP Server
//!
//! Axum-based server for mobile-money payment sessions, subscription
//! activation and referral ledgers.

mod auth;
mod config;
mod handlers;
mod rate_limit;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_billing::{Billing, BillingConfig, Stores, UserRecord};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let billing_config = BillingConfig::from_env().context("invalid billing configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    if billing_config.webhook.is_some() {
        tracing::info!("✓ Notification relay configured");
    } else {
        tracing::warn!("⚠ No notification relay - notifications are only logged");
        tracing::warn!("  Set NOTIFY_WEBHOOK_URL and NOTIFY_WEBHOOK_SECRET in .env");
    }
    if server_config.operator_tokens.is_empty() {
        tracing::warn!("⚠ OPERATOR_TOKENS not set - operator endpoints will refuse every request");
    }
    for (level, amount) in billing_config.pricing.levels() {
        tracing::info!("  Price: {} = {} {}", level, amount, billing_config.pricing.currency());
    }

    let billing = Billing::new(&billing_config, Stores::in_memory(), billing_config.notifier());

    if let Some(path) = &server_config.users_seed_path {
        let seeded = seed_users(&billing, path).await?;
        tracing::info!("Seeded {} users from {}", seeded, path.display());
    }

    let app = routes::router(AppState::new(billing, &server_config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 campus server running on http://{}", server_config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                          - Health check");
    tracing::info!("  POST /payments/initialize             - Open a payment session");
    tracing::info!("  POST /payments/verify-code            - Submit provider code");
    tracing::info!("  GET  /payments/status/{{reference}}     - Poll payment status");
    tracing::info!("  GET  /referrals/me                    - Referral ledger");
    tracing::info!("  PUT  /payments/{{reference}}/status     - Operator decision");
    tracing::info!("  POST /payments/{{reference}}/activation - Re-drive activation");
    tracing::info!("  GET  /payments, /payments/stats       - Operator views");
    tracing::info!("  POST /subscriptions/sweep             - Expire overdue subscriptions");
    tracing::info!("");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Load user records from a JSON array
async fn seed_users(billing: &Billing, path: &Path) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let users: Vec<UserRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let mut seeded = 0;
    for user in users {
        if billing.register_user(user).await? {
            seeded += 1;
        }
    }
    Ok(seeded)
}
