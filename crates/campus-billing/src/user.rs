//! User Records
//!
//! The account service owns users; billing only reads contact details and
//! specialty, and writes the subscription and referral fields below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Referral status of a referred user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    #[default]
    None,
    Pending,
    Approved,
}

/// Subscription status mirrored onto the user record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserSubscriptionStatus {
    #[default]
    None,
    Active,
    Inactive,
}

/// A user record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub phone: String,

    /// Specialty level, key into the pricing table
    pub specialty: String,

    /// Referral code entered at registration
    #[serde(default)]
    pub referred_by_code: Option<String>,

    #[serde(default)]
    pub referral_status: ReferralStatus,

    #[serde(default)]
    pub subscription_status: UserSubscriptionStatus,

    #[serde(default)]
    pub subscription_id: Option<String>,

    #[serde(default)]
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
        specialty: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            phone: phone.into(),
            specialty: specialty.into(),
            referred_by_code: None,
            referral_status: ReferralStatus::None,
            subscription_status: UserSubscriptionStatus::None,
            subscription_id: None,
            last_payment_at: None,
        }
    }

    /// Mark this user as referred; credit is pending until the first approved payment
    #[must_use]
    pub fn referred_by(mut self, code: impl Into<String>) -> Self {
        self.referred_by_code = Some(code.into());
        self.referral_status = ReferralStatus::Pending;
        self
    }
}
