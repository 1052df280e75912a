//! Referral Credits
//!
//! Each referring user owns a ledger keyed by their id. A referred user's
//! first approved payment credits the referrer exactly once: the user's own
//! `referral_status` flip from `pending` to `approved` is the claim that
//! guards against crediting again on renewals or concurrent activations.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PaymentError, Result};
use crate::store::{DEFAULT_MAX_RETRIES, DocumentStore, Versioned, modify};
use crate::user::{ReferralStatus, UserRecord};

/// Referral code for a referrer: `REF-` + first 8 hex chars of SHA-256(id)
pub fn referral_code(referrer_id: &str) -> String {
    let digest = Sha256::digest(referrer_id.as_bytes());
    format!("REF-{}", hex::encode(digest)[..8].to_uppercase())
}

/// A referrer's ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferralLedger {
    pub referrer_id: String,
    pub referral_code: String,
    pub invited_emails: BTreeSet<String>,

    /// Referred user ids, each at most once
    pub registered_referrals: Vec<String>,

    /// Always `registered_referrals.len()`
    pub total_referrals: u32,

    pub claimed_rewards: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReferralLedger {
    pub fn new(referrer_id: impl Into<String>) -> Self {
        let referrer_id = referrer_id.into();
        let now = Utc::now();
        Self {
            referral_code: referral_code(&referrer_id),
            referrer_id,
            invited_emails: BTreeSet::new(),
            registered_referrals: Vec::new(),
            total_referrals: 0,
            claimed_rewards: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a referred user. Returns `false` if already registered.
    fn register(&mut self, user_id: &str) -> bool {
        if self.registered_referrals.iter().any(|id| id == user_id) {
            return false;
        }
        self.registered_referrals.push(user_id.to_string());
        self.total_referrals = u32::try_from(self.registered_referrals.len()).unwrap_or(u32::MAX);
        self.updated_at = Utc::now();
        true
    }
}

/// Reward tiers unlocked by referral count
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardTier {
    Bronze,
    Silver,
    Gold,
}

impl RewardTier {
    pub fn id(&self) -> &'static str {
        match self {
            RewardTier::Bronze => "bronze",
            RewardTier::Silver => "silver",
            RewardTier::Gold => "gold",
        }
    }

    /// Referrals required
    pub fn threshold(&self) -> u32 {
        match self {
            RewardTier::Bronze => 3,
            RewardTier::Silver => 5,
            RewardTier::Gold => 10,
        }
    }
}

/// Result of a credit attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CreditOutcome {
    /// User was not referred, or the referral is already settled
    NotEligible,
    /// No ledger carries the user's referral code
    UnknownCode { code: String },
    /// Another activation flipped the status first
    AlreadyCredited,
    Credited { referrer_id: String },
}

/// Referral credit processor
pub struct ReferralProcessor {
    users: Arc<dyn DocumentStore<UserRecord>>,
    ledgers: Arc<dyn DocumentStore<ReferralLedger>>,
}

impl ReferralProcessor {
    pub fn new(
        users: Arc<dyn DocumentStore<UserRecord>>,
        ledgers: Arc<dyn DocumentStore<ReferralLedger>>,
    ) -> Self {
        Self { users, ledgers }
    }

    /// Get or create the ledger for a referrer
    pub async fn ensure_ledger(&self, referrer_id: &str) -> Result<ReferralLedger> {
        self.ledgers
            .insert(referrer_id, ReferralLedger::new(referrer_id))
            .await?;
        self.ledger(referrer_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("referral ledger {referrer_id}")))
    }

    pub async fn ledger(&self, referrer_id: &str) -> Result<Option<ReferralLedger>> {
        Ok(self.ledgers.get(referrer_id).await?.map(|v| v.doc))
    }

    /// Ledger owning a referral code
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Versioned<ReferralLedger>>> {
        let code = code.trim().to_uppercase();
        let mut found = self
            .ledgers
            .find(&|ledger: &ReferralLedger| ledger.referral_code == code)
            .await?;
        Ok(found.pop().map(|(_, ledger)| ledger))
    }

    /// Remember an invitation sent by a referrer
    pub async fn record_invite(&self, referrer_id: &str, email: &str) -> Result<ReferralLedger> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') || email.len() < 3 {
            return Err(PaymentError::Validation(format!("Invalid email '{email}'")));
        }

        self.ensure_ledger(referrer_id).await?;
        let result = modify(self.ledgers.as_ref(), referrer_id, DEFAULT_MAX_RETRIES, |ledger| {
            let added = ledger.invited_emails.insert(email.clone());
            if added {
                ledger.updated_at = Utc::now();
            }
            Ok(added)
        })
        .await?;
        Ok(result.current.doc)
    }

    /// Claim a reward tier once the referral count allows it
    pub async fn claim_reward(&self, referrer_id: &str, tier: RewardTier) -> Result<ReferralLedger> {
        let result = modify(self.ledgers.as_ref(), referrer_id, DEFAULT_MAX_RETRIES, |ledger| {
            if ledger.claimed_rewards.contains(tier.id()) {
                return Err(PaymentError::Validation(format!(
                    "Reward '{}' already claimed",
                    tier.id()
                )));
            }
            if ledger.total_referrals < tier.threshold() {
                return Err(PaymentError::Validation(format!(
                    "Reward '{}' requires {} referrals",
                    tier.id(),
                    tier.threshold()
                )));
            }
            ledger.claimed_rewards.insert(tier.id().to_string());
            ledger.updated_at = Utc::now();
            Ok(true)
        })
        .await?;

        tracing::info!(referrer_id = %referrer_id, reward = tier.id(), "Referral reward claimed");
        Ok(result.current.doc)
    }

    /// Credit the referrer of a user who just paid.
    ///
    /// No-op unless the user's referral status is `pending`.
    pub async fn credit_referrer(&self, user_id: &str) -> Result<CreditOutcome> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("user {user_id}")))?
            .doc;

        if user.referral_status != ReferralStatus::Pending {
            return Ok(CreditOutcome::NotEligible);
        }
        let Some(code) = user.referred_by_code.clone() else {
            return Ok(CreditOutcome::NotEligible);
        };

        let Some(ledger) = self.find_by_code(&code).await? else {
            tracing::warn!(user_id = %user_id, code = %code, "Referral code has no ledger");
            return Ok(CreditOutcome::UnknownCode { code });
        };
        let referrer_id = ledger.doc.referrer_id;

        if referrer_id == user_id {
            tracing::warn!(user_id = %user_id, "Ignoring self-referral");
            return Ok(CreditOutcome::NotEligible);
        }

        // Claim: only the caller that flips pending → approved may credit
        let claim = modify(self.users.as_ref(), user_id, DEFAULT_MAX_RETRIES, |u| {
            if u.referral_status != ReferralStatus::Pending {
                return Ok(false);
            }
            u.referral_status = ReferralStatus::Approved;
            Ok(true)
        })
        .await?;
        if !claim.written {
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let registered = modify(self.ledgers.as_ref(), &referrer_id, DEFAULT_MAX_RETRIES, |l| {
            Ok(l.register(user_id))
        })
        .await
        .inspect_err(|e| {
            tracing::error!(
                user_id = %user_id,
                referrer_id = %referrer_id,
                error = %e,
                "Referral status claimed but ledger update failed"
            );
        })?;

        tracing::info!(
            user_id = %user_id,
            referrer_id = %referrer_id,
            total_referrals = registered.current.doc.total_referrals,
            "Referrer credited"
        );
        Ok(CreditOutcome::Credited { referrer_id })
    }
}
