//! Payment Statistics
//!
//! Incremental counters over payment outcomes: one `global` document and one
//! bucket per `YYYY-MM`. Concurrent activations for different users touch
//! the same documents, so every update is an optimistic read-modify-write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::PaymentMethod;
use crate::store::{DEFAULT_MAX_RETRIES, DocumentStore, modify};
use crate::subscription::PaymentOutcome;

/// Key of the all-time document
pub const GLOBAL_KEY: &str = "global";

/// Bucket key for a month: `YYYY-MM`
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// ISO week, e.g. `2026-W42`
fn week_key(at: DateTime<Utc>) -> String {
    at.format("%G-W%V").to_string()
}

/// Count and amount within one rolling window
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTotals {
    /// Window this total belongs to (day, ISO week or month key)
    pub key: String,
    pub count: u64,
    pub amount: i64,
}

impl WindowTotals {
    fn add(&mut self, key: String, amount: i64) {
        if self.key != key {
            *self = WindowTotals {
                key,
                count: 0,
                amount: 0,
            };
        }
        self.count += 1;
        self.amount += amount;
    }

    /// Totals as seen from `key`; zero when the stored window has rolled over
    fn as_of(&self, key: String) -> WindowTotals {
        if self.key == key {
            self.clone()
        } else {
            WindowTotals {
                key,
                count: 0,
                amount: 0,
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub approved: u64,
    pub rejected: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCounts {
    pub provider_a: u64,
    pub provider_b: u64,
    pub provider_c: u64,
}

impl MethodCounts {
    fn slot(&mut self, method: PaymentMethod) -> &mut u64 {
        match method {
            PaymentMethod::ProviderA => &mut self.provider_a,
            PaymentMethod::ProviderB => &mut self.provider_b,
            PaymentMethod::ProviderC => &mut self.provider_c,
        }
    }

    fn total(&self) -> u64 {
        self.provider_a + self.provider_b + self.provider_c
    }
}

/// A statistics document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentStats {
    pub key: String,
    pub total_count: u64,

    /// Sum of approved amounts
    pub total_amount: i64,

    pub by_status: StatusCounts,
    pub by_method: MethodCounts,

    /// Approved payments in the current day, ISO week and month
    pub today: WindowTotals,
    pub this_week: WindowTotals,
    pub this_month: WindowTotals,

    pub updated_at: Option<DateTime<Utc>>,
}

impl PaymentStats {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    fn apply(&mut self, event: &PaymentEvent) {
        self.total_count += 1;
        *self.by_method.slot(event.method) += 1;

        match event.outcome {
            PaymentOutcome::Approved => {
                self.by_status.approved += 1;
                self.total_amount += event.amount;
                self.today.add(day_key(event.at), event.amount);
                self.this_week.add(week_key(event.at), event.amount);
                self.this_month.add(month_key(event.at), event.amount);
            }
            PaymentOutcome::Rejected => {
                self.by_status.rejected += 1;
            }
        }
        self.updated_at = Some(Utc::now());
    }

    /// Per-status and per-method counts both sum to the total
    pub fn reconciles(&self) -> bool {
        self.by_status.approved + self.by_status.rejected == self.total_count
            && self.by_method.total() == self.total_count
    }

    /// Copy with stale rolling windows zeroed
    fn as_of(&self, now: DateTime<Utc>) -> Self {
        let mut view = self.clone();
        view.today = self.today.as_of(day_key(now));
        view.this_week = self.this_week.as_of(week_key(now));
        view.this_month = self.this_month.as_of(month_key(now));
        view
    }
}

/// A finalized payment outcome to be counted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentEvent {
    pub reference: String,
    pub amount: i64,
    pub method: PaymentMethod,
    pub outcome: PaymentOutcome,
    pub at: DateTime<Utc>,
}

/// Admin statistics view
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub global: PaymentStats,
    pub current_month: PaymentStats,
}

/// Statistics aggregator
pub struct StatsAggregator {
    store: Arc<dyn DocumentStore<PaymentStats>>,
    max_retries: u32,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn DocumentStore<PaymentStats>>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Count one outcome in the global document and its month bucket
    pub async fn record(&self, event: &PaymentEvent) -> Result<()> {
        for key in [GLOBAL_KEY.to_string(), month_key(event.at)] {
            self.store.insert(&key, PaymentStats::new(key.as_str())).await?;
            modify(self.store.as_ref(), &key, self.max_retries, |stats| {
                stats.apply(event);
                Ok(true)
            })
            .await?;
        }

        tracing::debug!(
            reference = %event.reference,
            outcome = ?event.outcome,
            amount = event.amount,
            "Payment statistics updated"
        );
        Ok(())
    }

    pub async fn record_approved(
        &self,
        reference: &str,
        amount: i64,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.record(&PaymentEvent {
            reference: reference.to_string(),
            amount,
            method,
            outcome: PaymentOutcome::Approved,
            at,
        })
        .await
    }

    pub async fn record_rejected(
        &self,
        reference: &str,
        amount: i64,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.record(&PaymentEvent {
            reference: reference.to_string(),
            amount,
            method,
            outcome: PaymentOutcome::Rejected,
            at,
        })
        .await
    }

    /// Global totals and the current month, with stale windows zeroed
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        let month = month_key(now);
        let global = self
            .store
            .get(GLOBAL_KEY)
            .await?
            .map_or_else(|| PaymentStats::new(GLOBAL_KEY), |v| v.doc);
        let current_month = self
            .store
            .get(&month)
            .await?
            .map_or_else(|| PaymentStats::new(month.as_str()), |v| v.doc);

        Ok(StatsSnapshot {
            global: global.as_of(now),
            current_month: current_month.as_of(now),
        })
    }
}
