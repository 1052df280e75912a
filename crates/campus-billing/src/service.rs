//! Billing Service
//!
//! Wires the stores, notifier and components together.

use std::sync::Arc;

use crate::activation::ActivationPipeline;
use crate::config::BillingConfig;
use crate::error::Result;
use crate::notify::Notifier;
use crate::referral::{ReferralLedger, ReferralProcessor};
use crate::session::{PaymentSession, SessionManager};
use crate::stats::{PaymentStats, StatsAggregator};
use crate::store::{DocumentStore, MemoryStore};
use crate::subscription::Subscription;
use crate::user::UserRecord;

/// One store per collection
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn DocumentStore<PaymentSession>>,
    pub subscriptions: Arc<dyn DocumentStore<Subscription>>,
    pub users: Arc<dyn DocumentStore<UserRecord>>,
    pub ledgers: Arc<dyn DocumentStore<ReferralLedger>>,
    pub stats: Arc<dyn DocumentStore<PaymentStats>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(MemoryStore::<PaymentSession>::new()),
            subscriptions: Arc::new(MemoryStore::<Subscription>::new()),
            users: Arc::new(MemoryStore::<UserRecord>::new()),
            ledgers: Arc::new(MemoryStore::<ReferralLedger>::new()),
            stats: Arc::new(MemoryStore::<PaymentStats>::new()),
        }
    }
}

/// Billing facade
pub struct Billing {
    sessions: SessionManager,
    activation: Arc<ActivationPipeline>,
    referrals: Arc<ReferralProcessor>,
    stats: Arc<StatsAggregator>,
    users: Arc<dyn DocumentStore<UserRecord>>,
}

impl Billing {
    pub fn new(config: &BillingConfig, stores: Stores, notifier: Arc<dyn Notifier>) -> Self {
        let referrals = Arc::new(ReferralProcessor::new(
            stores.users.clone(),
            stores.ledgers.clone(),
        ));
        let stats = Arc::new(
            StatsAggregator::new(stores.stats.clone()).with_max_retries(config.stats_max_retries),
        );
        let activation = Arc::new(ActivationPipeline::new(
            stores.sessions.clone(),
            stores.subscriptions.clone(),
            stores.users.clone(),
            referrals.clone(),
            stats.clone(),
            notifier.clone(),
            &config.operator_email,
        ));
        let sessions = SessionManager::new(
            stores.sessions,
            stores.users.clone(),
            config.pricing.clone(),
            notifier,
            activation.clone(),
            stats.clone(),
            &config.operator_email,
        );

        Self {
            sessions,
            activation,
            referrals,
            stats,
            users: stores.users,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn activation(&self) -> &ActivationPipeline {
        &self.activation
    }

    pub fn referrals(&self) -> &ReferralProcessor {
        &self.referrals
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Add a user record if absent (seeding and tests).
    ///
    /// Users who may refer others get their ledger created up front.
    pub async fn register_user(&self, user: UserRecord) -> Result<bool> {
        let id = user.id.clone();
        let created = self.users.insert(&id, user).await?;
        if created {
            self.referrals.ensure_ledger(&id).await?;
            tracing::debug!(user_id = %id, "User registered");
        }
        Ok(created)
    }

    pub async fn user(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.get(id).await?.map(|v| v.doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;
    use crate::notify::{MemoryNotifier, Template};
    use crate::referral::referral_code;
    use crate::session::{
        InitializeRequest, PaymentMethod, SessionFilter, SessionStatus, StatusUpdate,
    };
    use crate::subscription::add_one_month;
    use crate::user::{ReferralStatus, UserSubscriptionStatus};
    use chrono::Utc;

    struct Harness {
        billing: Arc<Billing>,
        stores: Stores,
        notifier: Arc<MemoryNotifier>,
    }

    async fn harness() -> Harness {
        let stores = Stores::in_memory();
        let notifier = Arc::new(MemoryNotifier::new());
        let billing = Arc::new(Billing::new(
            &BillingConfig::default(),
            stores.clone(),
            notifier.clone(),
        ));

        billing
            .register_user(UserRecord::new("mentor", "mentor@campus.test", "+237650000001", "university"))
            .await
            .unwrap();
        billing
            .register_user(
                UserRecord::new("student", "student@campus.test", "+237650000002", "secondary")
                    .referred_by(referral_code("mentor")),
            )
            .await
            .unwrap();

        Harness {
            billing,
            stores,
            notifier,
        }
    }

    fn request(method: PaymentMethod) -> InitializeRequest {
        InitializeRequest {
            user_id: "student".into(),
            method,
            phone: "+237 650 000 002".into(),
            amount: 5000,
        }
    }

    fn approve() -> StatusUpdate {
        StatusUpdate {
            status: SessionStatus::Approved,
            operator_id: "op-1".into(),
            note: None,
        }
    }

    async fn subscriptions_of(stores: &Stores, user_id: &str) -> Vec<Subscription> {
        stores
            .subscriptions
            .find(&|sub: &Subscription| sub.user_id == user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v.doc)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_polls_activate_once() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let session = sessions.initialize(request(PaymentMethod::ProviderC)).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.amount, 5000);
        sessions.set_status(&session.reference, approve()).await.unwrap();

        let polls = (0..3).map(|_| {
            let billing = h.billing.clone();
            let reference = session.reference.clone();
            tokio::spawn(async move { billing.sessions().poll_status(&reference).await })
        });
        for result in futures::future::join_all(polls).await {
            let view = result.unwrap().unwrap();
            assert_eq!(view.status, SessionStatus::Approved);
            assert!(view.activation_attempted);
        }

        let view = sessions.poll_status(&session.reference).await.unwrap();
        assert_eq!(view.activation_succeeded, Some(true));
        assert_eq!(view.message, "Payment approved. Your subscription is active.");

        let subs = subscriptions_of(&h.stores, "student").await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].payment_history.len(), 1);
        assert_eq!(view.subscription_id.as_deref(), Some(subs[0].id.as_str()));

        let stats = h.billing.stats().snapshot(Utc::now()).await.unwrap();
        assert_eq!(stats.global.by_status.approved, 1);
        assert_eq!(stats.global.by_method.provider_c, 1);
        assert!(stats.global.reconciles());

        let ledger = h.billing.referrals().ledger("mentor").await.unwrap().unwrap();
        assert_eq!(ledger.total_referrals, 1);
        assert_eq!(h.notifier.count(Template::PaymentApproved), 1);

        let user = h.billing.user("student").await.unwrap().unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Active);
        assert_eq!(user.referral_status, ReferralStatus::Approved);
        assert!(user.last_payment_at.is_some());
    }

    #[tokio::test]
    async fn test_code_flow_waits_for_code() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let session = sessions.initialize(request(PaymentMethod::ProviderA)).await.unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingCode);

        let view = sessions.poll_status(&session.reference).await.unwrap();
        assert_eq!(view.status, SessionStatus::AwaitingCode);
        assert!(!view.activation_attempted);
        assert!(subscriptions_of(&h.stores, "student").await.is_empty());

        let updated = sessions
            .submit_verification_code(&session.reference, "482913")
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Processing);
        assert_eq!(updated.verification_code.as_deref(), Some("482913"));
        assert_eq!(h.notifier.count(Template::OperatorCodeSubmitted), 1);

        // The code is single-use
        let err = sessions
            .submit_verification_code(&session.reference, "482913")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));

        sessions.set_status(&session.reference, approve()).await.unwrap();
        let view = sessions.poll_status(&session.reference).await.unwrap();
        assert_eq!(view.activation_succeeded, Some(true));
    }

    #[tokio::test]
    async fn test_renewal_reuses_subscription() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let first = sessions.initialize(request(PaymentMethod::ProviderB)).await.unwrap();
        sessions.set_status(&first.reference, approve()).await.unwrap();
        let first_view = sessions.poll_status(&first.reference).await.unwrap();
        let first_due = subscriptions_of(&h.stores, "student").await[0].next_payment_due;

        let second = sessions.initialize(request(PaymentMethod::ProviderC)).await.unwrap();
        sessions.set_status(&second.reference, approve()).await.unwrap();
        let second_view = sessions.poll_status(&second.reference).await.unwrap();

        assert_eq!(first_view.subscription_id, second_view.subscription_id);

        let subs = subscriptions_of(&h.stores, "student").await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].payment_history.len(), 2);
        assert_eq!(subs[0].next_payment_due, add_one_month(first_due));

        let ledger = h.billing.referrals().ledger("mentor").await.unwrap().unwrap();
        assert_eq!(ledger.total_referrals, 1);

        let stats = h.billing.stats().snapshot(Utc::now()).await.unwrap();
        assert_eq!(stats.global.by_status.approved, 2);
        assert_eq!(stats.global.total_amount, 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_share_one_subscription() {
        for _ in 0..25 {
            let h = harness().await;
            let sessions = h.billing.sessions();

            let mut references = Vec::new();
            for method in [PaymentMethod::ProviderB, PaymentMethod::ProviderC] {
                let session = sessions.initialize(request(method)).await.unwrap();
                sessions.set_status(&session.reference, approve()).await.unwrap();
                references.push(session.reference);
            }

            let polls = references.into_iter().map(|reference| {
                let billing = h.billing.clone();
                tokio::spawn(async move { billing.sessions().poll_status(&reference).await })
            });
            for result in futures::future::join_all(polls).await {
                assert_eq!(result.unwrap().unwrap().activation_succeeded, Some(true));
            }

            let subs = subscriptions_of(&h.stores, "student").await;
            assert_eq!(subs.len(), 1);
            assert!(subs[0].is_active());
            assert_eq!(subs[0].payment_history.len(), 2);

            let user = h.billing.user("student").await.unwrap().unwrap();
            assert_eq!(user.subscription_id.as_deref(), Some(subs[0].id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_rejected_session_never_activates() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let session = sessions.initialize(request(PaymentMethod::ProviderB)).await.unwrap();
        let rejected = sessions
            .set_status(
                &session.reference,
                StatusUpdate {
                    status: SessionStatus::Rejected,
                    operator_id: "op-1".into(),
                    note: Some("No transfer received".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.processed_by.as_deref(), Some("op-1"));

        let view = sessions.poll_status(&session.reference).await.unwrap();
        assert_eq!(view.status, SessionStatus::Rejected);
        assert_eq!(view.message, "No transfer received");
        assert!(!view.activation_attempted);
        assert!(subscriptions_of(&h.stores, "student").await.is_empty());

        let err = sessions.set_status(&session.reference, approve()).await.unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyFinalized(_)));

        let stats = h.billing.stats().snapshot(Utc::now()).await.unwrap();
        assert_eq!(stats.global.by_status.rejected, 1);
        assert_eq!(stats.global.total_amount, 0);
        assert_eq!(h.notifier.count(Template::PaymentRejected), 1);
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let mut wrong_amount = request(PaymentMethod::ProviderB);
        wrong_amount.amount = 4999;
        let err = sessions.initialize(wrong_amount).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidAmount {
                expected: 5000,
                got: 4999
            }
        ));

        let mut unknown_user = request(PaymentMethod::ProviderB);
        unknown_user.user_id = "ghost".into();
        assert!(matches!(
            sessions.initialize(unknown_user).await.unwrap_err(),
            PaymentError::NotFound(_)
        ));

        let mut bad_phone = request(PaymentMethod::ProviderB);
        bad_phone.phone = "call me".into();
        assert!(matches!(
            sessions.initialize(bad_phone).await.unwrap_err(),
            PaymentError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_operator_transitions() {
        let h = harness().await;
        let sessions = h.billing.sessions();
        let session = sessions.initialize(request(PaymentMethod::ProviderB)).await.unwrap();

        // Code submission only applies to the code flow
        let err = sessions
            .submit_verification_code(&session.reference, "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));

        let pending = StatusUpdate {
            status: SessionStatus::Pending,
            operator_id: "op-1".into(),
            note: None,
        };
        assert!(matches!(
            sessions.set_status(&session.reference, pending).await.unwrap_err(),
            PaymentError::Validation(_)
        ));

        let processing = StatusUpdate {
            status: SessionStatus::Processing,
            operator_id: "op-1".into(),
            note: Some("checking".into()),
        };
        let updated = sessions.set_status(&session.reference, processing).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Processing);

        // Nothing to re-drive before an activation has failed
        let err = sessions
            .redrive_activation(&session.reference, "op-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));

        assert!(matches!(
            sessions.poll_status("PAY-0000-0000-0000").await.unwrap_err(),
            PaymentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_notification_failures_do_not_block_payments() {
        let h = harness().await;
        h.notifier.set_failing(true);
        let sessions = h.billing.sessions();

        let session = sessions.initialize(request(PaymentMethod::ProviderC)).await.unwrap();
        sessions.set_status(&session.reference, approve()).await.unwrap();
        let view = sessions.poll_status(&session.reference).await.unwrap();
        assert_eq!(view.activation_succeeded, Some(true));
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let h = harness().await;
        let sessions = h.billing.sessions();

        let a = sessions.initialize(request(PaymentMethod::ProviderA)).await.unwrap();
        let b = sessions.initialize(request(PaymentMethod::ProviderB)).await.unwrap();
        let c = sessions.initialize(request(PaymentMethod::ProviderC)).await.unwrap();
        sessions.set_status(&c.reference, approve()).await.unwrap();

        let all = sessions.list_sessions(&SessionFilter::default()).await.unwrap();
        assert_eq!(all.total, 3);

        let awaiting = sessions
            .list_sessions(&SessionFilter {
                status: Some(SessionStatus::AwaitingCode),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(awaiting.total, 1);
        assert_eq!(awaiting.items[0].reference, a.reference);

        let by_method = sessions
            .list_sessions(&SessionFilter {
                method: Some(PaymentMethod::ProviderB),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_method.items[0].reference, b.reference);

        let page = sessions
            .list_sessions(&SessionFilter {
                offset: 1,
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
    }
}
