//! Subscription Activation
//!
//! Turns an approved payment session into a live subscription plus its
//! side effects, at most once per session:
//!
//! ```text
//!  poll ─▶ claim activation_attempted (conditional write)
//!            │ lost ──▶ return session as stored
//!            ▼ won
//!   1. create or renew subscription   ┐ failure: activation_succeeded = false,
//!   2. mark user active               ┘          operator alerted, stop
//!   3. credit referrer        (logged on failure)
//!   4. record statistics      (logged on failure)
//!   5. notify student         (logged on failure)
//!            ▼
//!   write activation_succeeded + subscription_id
//! ```
//!
//! A failed activation stays failed until an operator re-drives it. Steps 1
//! and 2 are idempotent per session reference, so a re-drive cannot bill twice.
//! A claim whose outcome was never written can be re-driven once it is older
//! than [`STALE_CLAIM_MINUTES`].
//!
//! The user's `subscription_id` is the subscription slot. A new subscription
//! is only created after that slot has been claimed with a conditional write,
//! so concurrent activations for one user converge on one document.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{PaymentError, Result};
use crate::notify::{Notification, Notifier, Template, dispatch};
use crate::referral::ReferralProcessor;
use crate::session::{PaymentSession, SessionStatus};
use crate::stats::StatsAggregator;
use crate::store::{DEFAULT_MAX_RETRIES, DocumentStore, backoff, modify};
use crate::subscription::{PaymentOutcome, PaymentRecord, Subscription, SubscriptionStatus};
use crate::user::{UserRecord, UserSubscriptionStatus};

/// Age after which an unfinished activation claim may be re-driven
pub const STALE_CLAIM_MINUTES: i64 = 5;

/// Activation pipeline and owner of subscription documents
pub struct ActivationPipeline {
    sessions: Arc<dyn DocumentStore<PaymentSession>>,
    subscriptions: Arc<dyn DocumentStore<Subscription>>,
    users: Arc<dyn DocumentStore<UserRecord>>,
    referrals: Arc<ReferralProcessor>,
    stats: Arc<StatsAggregator>,
    notifier: Arc<dyn Notifier>,
    operator_email: String,
}

impl ActivationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn DocumentStore<PaymentSession>>,
        subscriptions: Arc<dyn DocumentStore<Subscription>>,
        users: Arc<dyn DocumentStore<UserRecord>>,
        referrals: Arc<ReferralProcessor>,
        stats: Arc<StatsAggregator>,
        notifier: Arc<dyn Notifier>,
        operator_email: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            subscriptions,
            users,
            referrals,
            stats,
            notifier,
            operator_email: operator_email.into(),
        }
    }

    /// Claim and run activation for an approved session.
    ///
    /// Callers that lose the claim get the session as currently stored,
    /// which may still show the winner's activation in flight.
    pub async fn activate(&self, reference: &str) -> Result<PaymentSession> {
        let claim = modify(self.sessions.as_ref(), reference, DEFAULT_MAX_RETRIES, |session| {
            if session.status != SessionStatus::Approved || session.activation_attempted {
                return Ok(false);
            }
            session.activation_attempted = true;
            session.activation_succeeded = None;
            session.updated_at = Utc::now();
            Ok(true)
        })
        .await?;

        if !claim.written {
            tracing::debug!(reference = %reference, "Activation already claimed");
            return Ok(claim.current.doc);
        }

        tracing::info!(reference = %reference, "Activation claimed");
        Ok(self.run(claim.current.doc).await)
    }

    /// Operator retry of a failed or abandoned activation
    pub async fn redrive(&self, reference: &str, operator_id: &str) -> Result<PaymentSession> {
        let now = Utc::now();
        let stale_before = now - Duration::minutes(STALE_CLAIM_MINUTES);

        let claim = modify(self.sessions.as_ref(), reference, DEFAULT_MAX_RETRIES, |session| {
            let state = match (session.status, session.activation_succeeded) {
                (SessionStatus::Approved, Some(false)) => None,
                (SessionStatus::Approved, None)
                    if session.activation_attempted && session.updated_at < stale_before =>
                {
                    None
                }
                (SessionStatus::Approved, None) if session.activation_attempted => {
                    Some("activation in progress".to_string())
                }
                (SessionStatus::Approved, Some(true)) => Some("activated".to_string()),
                (status, _) => Some(status.to_string()),
            };
            if let Some(state) = state {
                return Err(PaymentError::invalid_state("re-drive activation", state));
            }
            session.activation_attempted = true;
            session.activation_succeeded = None;
            session.updated_at = now;
            Ok(true)
        })
        .await?;

        tracing::warn!(reference = %reference, operator_id = %operator_id, "Activation re-driven");
        Ok(self.run(claim.current.doc).await)
    }

    async fn run(&self, session: PaymentSession) -> PaymentSession {
        let now = Utc::now();

        let subscription = match self.activate_subscription(&session, now).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(
                    reference = %session.reference,
                    user_id = %session.user_id,
                    error = %e,
                    "Activation failed"
                );
                dispatch(
                    self.notifier.as_ref(),
                    Notification::new(Template::OperatorActivationFailed, &self.operator_email)
                        .var("reference", &session.reference)
                        .var("user_id", &session.user_id)
                        .var("error", &e),
                )
                .await;
                return self.finish(session, false, None).await;
            }
        };

        match self.referrals.credit_referrer(&session.user_id).await {
            Ok(outcome) => {
                tracing::debug!(reference = %session.reference, outcome = ?outcome, "Referral step done");
            }
            Err(e) => {
                tracing::error!(reference = %session.reference, error = %e, "Referral credit failed");
            }
        }

        if let Err(e) = self
            .stats
            .record_approved(&session.reference, session.amount, session.payment_method, now)
            .await
        {
            tracing::error!(reference = %session.reference, error = %e, "Statistics update failed");
        }

        dispatch(
            self.notifier.as_ref(),
            Notification::new(Template::PaymentApproved, &session.student_email)
                .var("reference", &session.reference)
                .var("amount", session.amount)
                .var("next_payment_due", subscription.next_payment_due.to_rfc3339()),
        )
        .await;

        tracing::info!(
            reference = %session.reference,
            user_id = %session.user_id,
            subscription_id = %subscription.id,
            "Subscription activated"
        );
        self.finish(session, true, Some(subscription.id)).await
    }

    /// Steps 1 and 2
    async fn activate_subscription(
        &self,
        session: &PaymentSession,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let record = PaymentRecord {
            reference: session.reference.clone(),
            amount: session.amount,
            date: now,
            outcome: PaymentOutcome::Approved,
            method: session.payment_method,
        };

        let subscription = self.apply_to_slot(session, &record, now).await?;

        modify(self.users.as_ref(), &session.user_id, DEFAULT_MAX_RETRIES, |user| {
            user.subscription_status = UserSubscriptionStatus::Active;
            user.subscription_id = Some(subscription.id.clone());
            user.last_payment_at = Some(now);
            Ok(true)
        })
        .await?;

        Ok(subscription)
    }

    /// Apply the payment to the user's subscription slot.
    ///
    /// An active subscription in the slot is renewed. An empty slot, or one
    /// holding a lapsed subscription, is claimed for a fresh id first.
    async fn apply_to_slot(
        &self,
        session: &PaymentSession,
        record: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let user_id = session.user_id.as_str();

        for attempt in 0..=DEFAULT_MAX_RETRIES {
            let user = self
                .users
                .get(user_id)
                .await?
                .ok_or_else(|| PaymentError::NotFound(format!("user {user_id}")))?;

            if let Some(id) = user.doc.subscription_id.as_deref() {
                match self.subscriptions.get(id).await? {
                    // Claimed by a concurrent activation that has not created it yet
                    None => return self.start_or_renew(id, session, record, now).await,
                    Some(current)
                        if current.doc.is_active() || current.doc.has_payment(&record.reference) =>
                    {
                        if let Some(renewed) = self.renew(id, record, now).await? {
                            return Ok(renewed);
                        }
                    }
                    Some(_) => {}
                }
            }

            let id = Subscription::new_id();
            let mut claimed = user.doc.clone();
            claimed.subscription_id = Some(id.clone());
            if self.users.replace(user_id, claimed, user.version).await?.is_some() {
                return self.start_or_renew(&id, session, record, now).await;
            }

            tracing::debug!(user_id = %user_id, attempt, "Subscription slot changed, retrying");
            backoff(attempt).await;
        }

        Err(PaymentError::Conflict(format!("subscription slot of user {user_id}")))
    }

    /// Create the subscription in a claimed slot, or renew it if another
    /// activation created it first
    async fn start_or_renew(
        &self,
        id: &str,
        session: &PaymentSession,
        record: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let created =
            Subscription::start(id, &session.user_id, &session.specialty, record.clone(), now);
        if self.subscriptions.insert(id, created.clone()).await? {
            tracing::info!(subscription_id = %id, user_id = %session.user_id, "Subscription created");
            return Ok(created);
        }

        self.renew(id, record, now)
            .await?
            .ok_or_else(|| PaymentError::Conflict(format!("subscription {id}")))
    }

    /// Renew `id` with the payment.
    ///
    /// `None` when the subscription lapsed before the payment could be applied.
    async fn renew(
        &self,
        id: &str,
        record: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let renewed = modify(self.subscriptions.as_ref(), id, DEFAULT_MAX_RETRIES, |sub| {
            Ok(sub.renew(record.clone(), now))
        })
        .await?;

        if renewed.written {
            tracing::info!(subscription_id = %id, "Subscription renewed");
        }
        let subscription = renewed.current.doc;
        Ok(subscription
            .has_payment(&record.reference)
            .then_some(subscription))
    }

    /// Record the activation outcome on the session.
    ///
    /// A failed write leaves the claim unfinished. The operator is alerted
    /// and the session is returned as claimed.
    async fn finish(
        &self,
        session: PaymentSession,
        succeeded: bool,
        subscription_id: Option<String>,
    ) -> PaymentSession {
        let result = modify(self.sessions.as_ref(), &session.reference, DEFAULT_MAX_RETRIES, |doc| {
            doc.activation_succeeded = Some(succeeded);
            if subscription_id.is_some() {
                doc.subscription_id.clone_from(&subscription_id);
            }
            doc.updated_at = Utc::now();
            Ok(true)
        })
        .await;

        match result {
            Ok(result) => result.current.doc,
            Err(e) => {
                tracing::error!(
                    reference = %session.reference,
                    succeeded,
                    subscription_id = ?subscription_id,
                    error = %e,
                    "Could not record activation outcome"
                );
                dispatch(
                    self.notifier.as_ref(),
                    Notification::new(Template::OperatorActivationFailed, &self.operator_email)
                        .var("reference", &session.reference)
                        .var("user_id", &session.user_id)
                        .var("error", &e),
                )
                .await;
                session
            }
        }
    }

    /// The user's active subscription, newest first if several
    pub async fn active_subscription(&self, user_id: &str) -> Result<Option<Subscription>> {
        let found = self
            .subscriptions
            .find(&|sub: &Subscription| sub.user_id == user_id && sub.is_active())
            .await?;
        Ok(found
            .into_iter()
            .map(|(_, v)| v.doc)
            .max_by_key(|sub| sub.created_at))
    }

    pub async fn subscription(&self, id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(id).await?.map(|v| v.doc))
    }

    /// Demote active subscriptions whose next payment is overdue.
    ///
    /// Returns how many were demoted by this call.
    pub async fn sweep_expired_subscriptions(&self, now: DateTime<Utc>) -> Result<usize> {
        let overdue = self
            .subscriptions
            .find(&|sub: &Subscription| sub.is_overdue(now))
            .await?;

        let mut demoted = 0;
        for (id, _) in overdue {
            let result = modify(self.subscriptions.as_ref(), &id, DEFAULT_MAX_RETRIES, |sub| {
                if !sub.is_overdue(now) {
                    return Ok(false);
                }
                sub.status = SubscriptionStatus::Inactive;
                sub.updated_at = now;
                Ok(true)
            })
            .await;
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(subscription_id = %id, error = %e, "Could not expire subscription");
                    continue;
                }
            };
            if !result.written {
                continue;
            }
            demoted += 1;

            let subscription = result.current.doc;
            tracing::info!(subscription_id = %id, user_id = %subscription.user_id, "Subscription expired");
            self.mark_user_inactive(&subscription).await;
        }

        Ok(demoted)
    }

    async fn mark_user_inactive(&self, subscription: &Subscription) {
        let update = modify(
            self.users.as_ref(),
            &subscription.user_id,
            DEFAULT_MAX_RETRIES,
            |user| {
                if user.subscription_id.as_deref() != Some(subscription.id.as_str()) {
                    return Ok(false);
                }
                user.subscription_status = UserSubscriptionStatus::Inactive;
                Ok(true)
            },
        )
        .await;

        match update {
            Ok(user) if !user.written => {
                tracing::debug!(
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.id,
                    "User has moved to another subscription"
                );
            }
            Ok(user) => {
                dispatch(
                    self.notifier.as_ref(),
                    Notification::new(Template::SubscriptionExpired, &user.current.doc.email)
                        .var("subscription_id", &subscription.id)
                        .var("next_payment_due", subscription.next_payment_due.to_rfc3339()),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %subscription.user_id,
                    error = %e,
                    "Could not mark user inactive after expiry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::referral::ReferralLedger;
    use crate::session::PaymentMethod;
    use crate::stats::PaymentStats;
    use crate::store::{MemoryStore, Versioned};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose writes can be switched off, or limited to a number of
    /// successful replaces
    struct FlakyStore<T> {
        inner: MemoryStore<T>,
        down: AtomicBool,
        replace_budget: Mutex<Option<u32>>,
    }

    impl<T> Default for FlakyStore<T> {
        fn default() -> Self {
            Self {
                inner: MemoryStore::new(),
                down: AtomicBool::new(false),
                replace_budget: Mutex::new(None),
            }
        }
    }

    impl<T> FlakyStore<T> {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(PaymentError::Storage("store unavailable".into()));
            }
            Ok(())
        }

        fn check_replace(&self) -> Result<()> {
            self.check()?;
            let mut budget = self.replace_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => Err(PaymentError::Storage("write rejected".into())),
                Some(left) => {
                    *left -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }

        fn allow_replaces(&self, budget: Option<u32>) {
            *self.replace_budget.lock().unwrap() = budget;
        }
    }

    #[async_trait]
    impl<T> DocumentStore<T> for FlakyStore<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        async fn get(&self, id: &str) -> Result<Option<Versioned<T>>> {
            self.inner.get(id).await
        }

        async fn insert(&self, id: &str, doc: T) -> Result<bool> {
            self.check()?;
            self.inner.insert(id, doc).await
        }

        async fn replace(&self, id: &str, doc: T, expected_version: u64) -> Result<Option<u64>> {
            self.check_replace()?;
            self.inner.replace(id, doc, expected_version).await
        }

        async fn find(
            &self,
            filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        ) -> Result<Vec<(String, Versioned<T>)>> {
            self.inner.find(filter).await
        }
    }

    struct Fixture {
        pipeline: ActivationPipeline,
        sessions: Arc<FlakyStore<PaymentSession>>,
        subscriptions: Arc<FlakyStore<Subscription>>,
        users: Arc<MemoryStore<UserRecord>>,
        notifier: Arc<MemoryNotifier>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(FlakyStore::<PaymentSession>::default());
        let subscriptions = Arc::new(FlakyStore::<Subscription>::default());
        let users = Arc::new(MemoryStore::<UserRecord>::new());
        let ledgers = Arc::new(MemoryStore::<ReferralLedger>::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let referrals = Arc::new(ReferralProcessor::new(users.clone(), ledgers));
        let stats = Arc::new(StatsAggregator::new(Arc::new(MemoryStore::<PaymentStats>::new())));

        let pipeline = ActivationPipeline::new(
            sessions.clone(),
            subscriptions.clone(),
            users.clone(),
            referrals,
            stats,
            notifier.clone(),
            "ops@campus.test",
        );
        Fixture {
            pipeline,
            sessions,
            subscriptions,
            users,
            notifier,
        }
    }

    async fn approved_session(fx: &Fixture, reference: &str) {
        approved_session_for(fx, reference, "u1").await;
    }

    async fn approved_session_for(fx: &Fixture, reference: &str, user_id: &str) {
        let now = Utc::now();
        let email = format!("{user_id}@campus.test");
        fx.users
            .insert(user_id, UserRecord::new(user_id, &email, "+237650000000", "secondary"))
            .await
            .unwrap();
        let session = PaymentSession {
            reference: reference.into(),
            user_id: user_id.into(),
            student_email: email,
            student_phone: "+237650000000".into(),
            payment_method: PaymentMethod::ProviderB,
            payment_phone_number: "+237650000000".into(),
            amount: 5000,
            specialty: "secondary".into(),
            status: SessionStatus::Approved,
            verification_code: None,
            operator_note: None,
            processed_by: Some("op".into()),
            activation_attempted: false,
            activation_succeeded: None,
            subscription_id: None,
            created_at: now,
            updated_at: now,
        };
        fx.sessions.insert(reference, session).await.unwrap();
    }

    #[tokio::test]
    async fn test_activation_failure_is_recorded_and_redriven() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;
        fx.subscriptions.down.store(true, Ordering::SeqCst);

        let session = fx.pipeline.activate("PAY-1").await.unwrap();
        assert!(session.activation_attempted);
        assert_eq!(session.activation_succeeded, Some(false));
        assert_eq!(fx.notifier.count(Template::OperatorActivationFailed), 1);
        assert_eq!(fx.notifier.count(Template::PaymentApproved), 0);

        // Polling again does not retry
        let again = fx.pipeline.activate("PAY-1").await.unwrap();
        assert_eq!(again.activation_succeeded, Some(false));

        fx.subscriptions.down.store(false, Ordering::SeqCst);
        let redriven = fx.pipeline.redrive("PAY-1", "op-2").await.unwrap();
        assert_eq!(redriven.activation_succeeded, Some(true));
        assert!(redriven.subscription_id.is_some());

        let err = fx.pipeline.redrive("PAY-1", "op-2").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_activation_requires_approved_status() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;
        modify(fx.sessions.as_ref(), "PAY-1", 3, |s| {
            s.status = SessionStatus::Rejected;
            Ok(true)
        })
        .await
        .unwrap();

        let session = fx.pipeline.activate("PAY-1").await.unwrap();
        assert!(!session.activation_attempted);
        assert!(fx.pipeline.active_subscription("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_demotes_overdue_subscriptions() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;
        let session = fx.pipeline.activate("PAY-1").await.unwrap();
        let subscription_id = session.subscription_id.unwrap();

        assert_eq!(fx.pipeline.sweep_expired_subscriptions(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + Duration::days(45);
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 1);
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 0);

        let sub = fx.pipeline.subscription(&subscription_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Inactive);
        let user = fx.users.get("u1").await.unwrap().unwrap().doc;
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Inactive);
        assert_eq!(fx.notifier.count(Template::SubscriptionExpired), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_is_reported_and_redriven() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;

        // The claim is written, the outcome is not
        fx.sessions.allow_replaces(Some(1));
        let session = fx.pipeline.activate("PAY-1").await.unwrap();
        assert!(session.activation_attempted);
        assert_eq!(session.activation_succeeded, None);
        assert_eq!(fx.notifier.count(Template::OperatorActivationFailed), 1);
        fx.sessions.allow_replaces(None);

        let err = fx.pipeline.redrive("PAY-1", "op-2").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));

        modify(fx.sessions.as_ref(), "PAY-1", 3, |s| {
            s.updated_at = Utc::now() - Duration::minutes(STALE_CLAIM_MINUTES + 1);
            Ok(true)
        })
        .await
        .unwrap();

        let redriven = fx.pipeline.redrive("PAY-1", "op-2").await.unwrap();
        assert_eq!(redriven.activation_succeeded, Some(true));

        let sub = fx.pipeline.active_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.payment_history.len(), 1);
        assert_eq!(redriven.subscription_id.as_deref(), Some(sub.id.as_str()));
    }

    #[tokio::test]
    async fn test_lapsed_subscription_is_replaced_not_revived() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;
        let first = fx.pipeline.activate("PAY-1").await.unwrap();
        let first_id = first.subscription_id.unwrap();

        let later = Utc::now() + Duration::days(45);
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 1);

        approved_session(&fx, "PAY-2").await;
        let second = fx.pipeline.activate("PAY-2").await.unwrap();
        let second_id = second.subscription_id.unwrap();
        assert_ne!(first_id, second_id);

        let old = fx.pipeline.subscription(&first_id).await.unwrap().unwrap();
        assert_eq!(old.status, SubscriptionStatus::Inactive);
        assert_eq!(old.payment_history.len(), 1);

        let user = fx.users.get("u1").await.unwrap().unwrap().doc;
        assert_eq!(user.subscription_id.as_deref(), Some(second_id.as_str()));
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_skips_users_on_another_subscription() {
        let fx = fixture();
        approved_session(&fx, "PAY-1").await;
        fx.pipeline.activate("PAY-1").await.unwrap();
        modify(fx.users.as_ref(), "u1", 3, |user| {
            user.subscription_id = Some("sub_other".into());
            Ok(true)
        })
        .await
        .unwrap();

        let later = Utc::now() + Duration::days(45);
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 1);

        let user = fx.users.get("u1").await.unwrap().unwrap().doc;
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Active);
        assert_eq!(fx.notifier.count(Template::SubscriptionExpired), 0);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failed_documents() {
        let fx = fixture();
        approved_session_for(&fx, "PAY-1", "u1").await;
        approved_session_for(&fx, "PAY-2", "u2").await;
        fx.pipeline.activate("PAY-1").await.unwrap();
        fx.pipeline.activate("PAY-2").await.unwrap();

        let later = Utc::now() + Duration::days(45);
        fx.subscriptions.allow_replaces(Some(1));
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 1);

        fx.subscriptions.allow_replaces(None);
        assert_eq!(fx.pipeline.sweep_expired_subscriptions(later).await.unwrap(), 1);
        assert_eq!(fx.notifier.count(Template::SubscriptionExpired), 2);
    }
}
