//! Notification Dispatch
//!
//! Templated messages to students and operators. Delivery is best-effort:
//! callers inside the payment flow log failures and carry on.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<sha2::Sha256>;

/// Header carrying the webhook body signature
pub const SIGNATURE_HEADER: &str = "x-campus-signature";

/// Message templates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// New payment waiting for operator review
    OperatorNewPayment,
    /// Student submitted a provider verification code
    OperatorCodeSubmitted,
    /// Activation failed and needs a manual re-drive
    OperatorActivationFailed,
    /// Student acknowledgement after initialize
    PaymentReceived,
    PaymentApproved,
    PaymentRejected,
    SubscriptionExpired,
}

impl Template {
    pub fn key(&self) -> &'static str {
        match self {
            Template::OperatorNewPayment => "operator_new_payment",
            Template::OperatorCodeSubmitted => "operator_code_submitted",
            Template::OperatorActivationFailed => "operator_activation_failed",
            Template::PaymentReceived => "payment_received",
            Template::PaymentApproved => "payment_approved",
            Template::PaymentRejected => "payment_rejected",
            Template::SubscriptionExpired => "subscription_expired",
        }
    }
}

/// An outbound message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub template: Template,
    pub recipient: String,
    pub vars: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: Template, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            vars: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn var(mut self, key: &str, value: impl ToString) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

/// Notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Send and swallow failures
pub(crate) async fn dispatch(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.send(&notification).await {
        tracing::warn!(
            template = notification.template.key(),
            recipient = %notification.recipient,
            error = %e,
            "Notification dispatch failed"
        );
    }
}

/// Writes notifications to the log only
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            template = notification.template.key(),
            recipient = %notification.recipient,
            vars = ?notification.vars,
            "Notification"
        );
        Ok(())
    }
}

/// Posts notifications as signed JSON to a mail relay
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            secret: secret.into(),
        }
    }

    /// Hex HMAC-SHA256 of the body
    pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PaymentError::Config(format!("Invalid webhook secret: {e}")))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_vec(notification)
            .map_err(|e| PaymentError::Notification(e.to_string()))?;
        let signature = Self::sign(&self.secret, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, format!("sha256={signature}"))
            .body(body)
            .send()
            .await
            .map_err(|e| PaymentError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::Notification(format!(
                "relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Records notifications in memory (for development and tests)
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, template: Template) -> usize {
        self.sent().iter().filter(|n| n.template == template).count()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Notification("transport down".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}
