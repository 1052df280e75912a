//! # campus-billing
//!
//! Mobile-money payment sessions and subscription activation for campus.
//!
//! ## Payment Flow
//!
//! Payments are confirmed by a human operator rather than a provider callback.
//! The student polls until the operator decides, and the first poll that sees
//! an approval activates the subscription.
//!
//! ```text
//! ┌──────────┐ initialize  ┌───────────────┐ set_status ┌──────────────┐
//! │ Student  │────────────▶│ PaymentSession│◀───────────│   Operator   │
//! │          │ verify code │  (versioned)  │            │              │
//! │          │────────────▶│               │            └──────────────┘
//! │          │    poll     │               │
//! │          │────────────▶│  approved? ───┼──▶ ActivationPipeline
//! └──────────┘             └───────────────┘      │ claim (once)
//!                                                 ├─ Subscription create/renew
//!                                                 ├─ UserRecord → active
//!                                                 ├─ ReferralLedger credit
//!                                                 ├─ PaymentStats
//!                                                 └─ Notifier
//! ```
//!
//! There are no multi-document transactions. Each document guards itself
//! with a conditional write on its version (see [`store::modify`]), and the
//! activation claim on the session is what makes repeated polls safe.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use campus_billing::{Billing, BillingConfig, InitializeRequest, PaymentMethod, Stores};
//!
//! let config = BillingConfig::from_env()?;
//! let billing = Billing::new(&config, Stores::in_memory(), config.notifier());
//!
//! let session = billing.sessions().initialize(InitializeRequest {
//!     user_id: "user-42".into(),
//!     method: PaymentMethod::ProviderB,
//!     phone: "+237650000000".into(),
//!     amount: 5000,
//! }).await?;
//!
//! // ... operator approves ...
//! let view = billing.sessions().poll_status(&session.reference).await?;
//! ```

pub mod activation;
pub mod config;
pub mod error;
pub mod notify;
pub mod pricing;
pub mod referral;
pub mod service;
pub mod session;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod user;

pub use activation::ActivationPipeline;
pub use config::{BillingConfig, WebhookConfig};
pub use error::{PaymentError, Result};
pub use notify::{LogNotifier, MemoryNotifier, Notification, Notifier, Template, WebhookNotifier};
pub use pricing::PricingTable;
pub use referral::{CreditOutcome, ReferralLedger, ReferralProcessor, RewardTier, referral_code};
pub use service::{Billing, Stores};
pub use session::{
    InitializeRequest, PaymentMethod, PaymentSession, PaymentStatusView, SessionFilter,
    SessionManager, SessionPage, SessionStatus, StatusUpdate,
};
pub use stats::{PaymentStats, StatsAggregator, StatsSnapshot};
pub use store::{DocumentStore, MemoryStore, Versioned};
pub use subscription::{Subscription, SubscriptionStatus};
pub use user::{ReferralStatus, UserRecord, UserSubscriptionStatus};
