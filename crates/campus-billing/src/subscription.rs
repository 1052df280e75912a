//! Subscriptions
//!
//! One active subscription per user, renewed month by month from approved
//! payments and demoted by the expiry sweep.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::session::PaymentMethod;

/// Subscription status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    Expired,
}

/// Outcome recorded in the payment history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Approved,
    Rejected,
}

/// One entry of a subscription's payment history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment session reference
    pub reference: String,
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub outcome: PaymentOutcome,
    pub method: PaymentMethod,
}

/// A subscription document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub specialty: String,
    pub status: SubscriptionStatus,
    pub monthly_amount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_payment_due: DateTime<Utc>,

    /// Append-only
    pub payment_history: Vec<PaymentRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Fresh subscription id
    pub fn new_id() -> String {
        format!("sub_{}", uuid::Uuid::new_v4().simple())
    }

    /// Start a subscription from its first approved payment
    pub fn start(
        id: impl Into<String>,
        user_id: impl Into<String>,
        specialty: impl Into<String>,
        first_payment: PaymentRecord,
        now: DateTime<Utc>,
    ) -> Self {
        let next_payment_due = add_one_month(now);
        Self {
            id: id.into(),
            user_id: user_id.into(),
            specialty: specialty.into(),
            status: SubscriptionStatus::Active,
            monthly_amount: first_payment.amount,
            start_date: now,
            end_date: Some(next_payment_due),
            next_payment_due,
            payment_history: vec![first_payment],
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a renewal payment.
    ///
    /// Returns `false` if this payment is already in the history or the
    /// subscription is no longer active. A lapsed subscription is never
    /// revived; the next payment starts a new one.
    pub fn renew(&mut self, payment: PaymentRecord, now: DateTime<Utc>) -> bool {
        if self.has_payment(&payment.reference) || !self.is_active() {
            return false;
        }

        let base = self.next_payment_due.max(now);
        self.next_payment_due = add_one_month(base);
        self.end_date = Some(self.next_payment_due);
        self.monthly_amount = payment.amount;
        self.payment_history.push(payment);
        self.updated_at = now;
        true
    }

    pub fn has_payment(&self, reference: &str) -> bool {
        self.payment_history.iter().any(|p| p.reference == reference)
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Active but past its due date
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_payment_due < now
    }
}

/// Same day next month, clamped to the month's last day
pub fn add_one_month(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or_else(|| at + Duration::days(30))
}
