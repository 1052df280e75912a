//! Billing Configuration
//!
//! Read from the environment (`.env` is loaded by the server before this runs).

use std::sync::Arc;

use crate::error::{PaymentError, Result};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pricing::{DEFAULT_CURRENCY, PricingTable};
use crate::store::DEFAULT_MAX_RETRIES;

const DEFAULT_OPERATOR_EMAIL: &str = "payments@campus.local";

/// Mail relay endpoint for notifications
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub pricing: PricingTable,

    /// Recipient of operator notifications
    pub operator_email: String,

    /// `None` logs notifications instead of sending them
    pub webhook: Option<WebhookConfig>,

    /// Retry bound for statistics updates
    pub stats_max_retries: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            pricing: PricingTable::default(),
            operator_email: DEFAULT_OPERATOR_EMAIL.into(),
            webhook: None,
            stats_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BillingConfig {
    /// Load from environment variables
    ///
    /// - `PRICING_TABLE`: `level=amount,...` (defaults to the built-in table)
    /// - `PRICING_CURRENCY`
    /// - `OPERATOR_EMAIL`
    /// - `NOTIFY_WEBHOOK_URL` and `NOTIFY_WEBHOOK_SECRET`, both or neither
    /// - `STATS_MAX_RETRIES`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let currency = var("PRICING_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.into());
        let pricing = match var("PRICING_TABLE") {
            Some(table) => PricingTable::parse(&currency, &table)?,
            None => PricingTable::default(),
        };

        let webhook = match (var("NOTIFY_WEBHOOK_URL"), var("NOTIFY_WEBHOOK_SECRET")) {
            (Some(url), Some(secret)) => Some(WebhookConfig { url, secret }),
            (None, None) => None,
            _ => {
                return Err(PaymentError::Config(
                    "NOTIFY_WEBHOOK_URL and NOTIFY_WEBHOOK_SECRET must be set together".into(),
                ));
            }
        };

        let stats_max_retries = match var("STATS_MAX_RETRIES") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                PaymentError::Config(format!("STATS_MAX_RETRIES '{raw}' is not a number"))
            })?,
            None => DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            pricing,
            operator_email: var("OPERATOR_EMAIL").unwrap_or_else(|| DEFAULT_OPERATOR_EMAIL.into()),
            webhook,
            stats_max_retries,
        })
    }

    /// Notifier for this configuration
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.webhook {
            Some(webhook) => Arc::new(WebhookNotifier::new(&webhook.url, &webhook.secret)),
            None => Arc::new(LogNotifier),
        }
    }
}
