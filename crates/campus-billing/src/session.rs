//! Payment Sessions
//!
//! One session per payment attempt, driven through its state machine by
//! three actors: the student (initialize, code submission, polling), the
//! mobile-money provider (out of band), and an operator (status decisions).
//!
//! ```text
//!   initialize ──▶ pending ────────────────┐
//!        │                                 │  operator set_status
//!        └──(providerA)──▶ awaiting_code   ▼
//!                              │      processing ──▶ approved | rejected
//!                submit code ──┘                     (terminal)
//! ```
//!
//! Every transition is a conditional write on the session document, so the
//! session is its own unit of mutual exclusion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::ActivationPipeline;
use crate::error::{PaymentError, Result};
use crate::notify::{Notification, Notifier, Template, dispatch};
use crate::pricing::PricingTable;
use crate::stats::StatsAggregator;
use crate::store::{DEFAULT_MAX_RETRIES, DocumentStore, modify};
use crate::user::UserRecord;

/// Hard cap on admin list page size
pub const MAX_PAGE_SIZE: usize = 200;

const DEFAULT_REJECTION_REASON: &str = "Your payment could not be verified.";
const PROCESSING_MESSAGE: &str = "Your payment is being processed.";

/// Mobile-money payment methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Requires a verification-code round trip
    #[serde(rename = "providerA")]
    ProviderA,
    #[serde(rename = "providerB")]
    ProviderB,
    #[serde(rename = "providerC")]
    ProviderC,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::ProviderA => "providerA",
            PaymentMethod::ProviderB => "providerB",
            PaymentMethod::ProviderC => "providerC",
        }
    }

    /// Whether the student must submit a verification code
    pub fn requires_code(&self) -> bool {
        matches!(self, PaymentMethod::ProviderA)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "providerA" => Ok(PaymentMethod::ProviderA),
            "providerB" => Ok(PaymentMethod::ProviderB),
            "providerC" => Ok(PaymentMethod::ProviderC),
            other => Err(PaymentError::Validation(format!(
                "Unknown payment method '{other}'"
            ))),
        }
    }
}

/// Session status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    AwaitingCode,
    Processing,
    Approved,
    Rejected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::AwaitingCode => "awaiting_code",
            SessionStatus::Processing => "processing",
            SessionStatus::Approved => "approved",
            SessionStatus::Rejected => "rejected",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Approved | SessionStatus::Rejected)
    }

    /// Targets an operator may set
    pub fn is_operator_target(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a session reference (`PAY-XXXX-XXXX-XXXX`)
pub fn generate_reference() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("PAY-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12])
}

/// A payment session document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub reference: String,
    pub user_id: String,
    pub student_email: String,
    pub student_phone: String,
    pub payment_method: PaymentMethod,

    /// Number the mobile-money payment is made from
    pub payment_phone_number: String,

    /// Fixed at creation from the pricing table
    pub amount: i64,
    pub specialty: String,
    pub status: SessionStatus,

    /// Provider code submitted by the student (providerA only)
    pub verification_code: Option<String>,

    /// Operator note; the user-visible reason on rejection
    pub operator_note: Option<String>,
    pub processed_by: Option<String>,

    /// Set once, by whichever caller claims activation
    pub activation_attempted: bool,

    /// `None` until the claimed activation finishes
    pub activation_succeeded: Option<bool>,

    pub subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Student request to open a session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub user_id: String,
    pub method: PaymentMethod,
    pub phone: String,
    pub amount: i64,
}

/// Operator decision
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub operator_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// What a polling client sees
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub reference: String,
    pub status: SessionStatus,
    pub message: String,
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub activation_attempted: bool,
    pub activation_succeeded: Option<bool>,
    pub subscription_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PaymentSession> for PaymentStatusView {
    fn from(session: &PaymentSession) -> Self {
        let message = match session.status {
            SessionStatus::Rejected => session
                .operator_note
                .clone()
                .unwrap_or_else(|| DEFAULT_REJECTION_REASON.into()),
            SessionStatus::Approved if session.activation_succeeded == Some(true) => {
                "Payment approved. Your subscription is active.".into()
            }
            SessionStatus::AwaitingCode => {
                "Enter the verification code sent by your mobile-money provider.".into()
            }
            _ => PROCESSING_MESSAGE.into(),
        };

        Self {
            reference: session.reference.clone(),
            status: session.status,
            message,
            amount: session.amount,
            payment_method: session.payment_method,
            activation_attempted: session.activation_attempted,
            activation_succeeded: session.activation_succeeded,
            subscription_id: session.subscription_id.clone(),
            updated_at: session.updated_at,
        }
    }
}

/// Admin listing filter
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SessionFilter {
    fn matches(&self, session: &PaymentSession) -> bool {
        self.status.is_none_or(|s| s == session.status)
            && self.method.is_none_or(|m| m == session.payment_method)
            && self
                .user_id
                .as_deref()
                .is_none_or(|id| id == session.user_id)
    }
}

/// One page of sessions, newest first
#[derive(Clone, Debug, Serialize)]
pub struct SessionPage {
    pub total: usize,
    pub items: Vec<PaymentSession>,
}

/// Payment session manager
pub struct SessionManager {
    sessions: Arc<dyn DocumentStore<PaymentSession>>,
    users: Arc<dyn DocumentStore<UserRecord>>,
    pricing: PricingTable,
    notifier: Arc<dyn Notifier>,
    activation: Arc<ActivationPipeline>,
    stats: Arc<StatsAggregator>,
    operator_email: String,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn DocumentStore<PaymentSession>>,
        users: Arc<dyn DocumentStore<UserRecord>>,
        pricing: PricingTable,
        notifier: Arc<dyn Notifier>,
        activation: Arc<ActivationPipeline>,
        stats: Arc<StatsAggregator>,
        operator_email: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            users,
            pricing,
            notifier,
            activation,
            stats,
            operator_email: operator_email.into(),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Open a payment session
    pub async fn initialize(&self, request: InitializeRequest) -> Result<PaymentSession> {
        let user = self
            .users
            .get(&request.user_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("user {}", request.user_id)))?
            .doc;

        let phone = normalize_phone(&request.phone)?;
        let amount = self.pricing.check(&user.specialty, request.amount)?;

        let status = if request.method.requires_code() {
            SessionStatus::AwaitingCode
        } else {
            SessionStatus::Pending
        };

        let now = Utc::now();
        let mut session = PaymentSession {
            reference: generate_reference(),
            user_id: user.id.clone(),
            student_email: user.email.clone(),
            student_phone: user.phone.clone(),
            payment_method: request.method,
            payment_phone_number: phone,
            amount,
            specialty: user.specialty.clone(),
            status,
            verification_code: None,
            operator_note: None,
            processed_by: None,
            activation_attempted: false,
            activation_succeeded: None,
            subscription_id: None,
            created_at: now,
            updated_at: now,
        };

        while !self.sessions.insert(&session.reference, session.clone()).await? {
            session.reference = generate_reference();
        }

        tracing::info!(
            reference = %session.reference,
            user_id = %session.user_id,
            method = %session.payment_method,
            amount = session.amount,
            status = %session.status,
            "Payment session initialized"
        );

        dispatch(
            self.notifier.as_ref(),
            Notification::new(Template::OperatorNewPayment, &self.operator_email)
                .var("reference", &session.reference)
                .var("user_id", &session.user_id)
                .var("method", session.payment_method)
                .var("phone", &session.payment_phone_number)
                .var("amount", session.amount),
        )
        .await;
        dispatch(
            self.notifier.as_ref(),
            Notification::new(Template::PaymentReceived, &session.student_email)
                .var("reference", &session.reference)
                .var("amount", session.amount)
                .var("currency", self.pricing.currency()),
        )
        .await;

        Ok(session)
    }

    /// Attach the provider's verification code (providerA flow)
    pub async fn submit_verification_code(&self, reference: &str, code: &str) -> Result<PaymentSession> {
        let code = normalize_code(code)?;

        let result = modify(self.sessions.as_ref(), reference, DEFAULT_MAX_RETRIES, |session| {
            if session.status != SessionStatus::AwaitingCode {
                return Err(PaymentError::invalid_state(
                    "submit a verification code",
                    session.status,
                ));
            }
            session.verification_code = Some(code.clone());
            session.status = SessionStatus::Processing;
            session.updated_at = Utc::now();
            Ok(true)
        })
        .await?;
        let session = result.current.doc;

        tracing::info!(reference = %reference, "Verification code submitted");
        dispatch(
            self.notifier.as_ref(),
            Notification::new(Template::OperatorCodeSubmitted, &self.operator_email)
                .var("reference", reference)
                .var("code", &code)
                .var("phone", &session.payment_phone_number),
        )
        .await;

        Ok(session)
    }

    /// Operator transition. Terminal sessions refuse further changes.
    pub async fn set_status(&self, reference: &str, update: StatusUpdate) -> Result<PaymentSession> {
        if !update.status.is_operator_target() {
            return Err(PaymentError::Validation(format!(
                "Status '{}' cannot be set by an operator",
                update.status
            )));
        }
        let operator_id = update.operator_id.trim();
        if operator_id.is_empty() {
            return Err(PaymentError::Validation("Operator id is required".into()));
        }
        let note = update
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);

        let result = modify(self.sessions.as_ref(), reference, DEFAULT_MAX_RETRIES, |session| {
            if session.status.is_terminal() {
                return Err(PaymentError::AlreadyFinalized(reference.to_string()));
            }
            session.status = update.status;
            session.processed_by = Some(operator_id.to_string());
            if note.is_some() {
                session.operator_note.clone_from(&note);
            }
            if update.status == SessionStatus::Rejected && session.operator_note.is_none() {
                session.operator_note = Some(DEFAULT_REJECTION_REASON.into());
            }
            session.updated_at = Utc::now();
            Ok(true)
        })
        .await?;
        let session = result.current.doc;

        tracing::info!(
            reference = %reference,
            operator_id = %operator_id,
            status = %session.status,
            "Payment status set by operator"
        );

        if session.status == SessionStatus::Rejected {
            self.on_rejected(&session).await;
        }
        Ok(session)
    }

    async fn on_rejected(&self, session: &PaymentSession) {
        if let Err(e) = self
            .stats
            .record_rejected(
                &session.reference,
                session.amount,
                session.payment_method,
                session.updated_at,
            )
            .await
        {
            tracing::error!(reference = %session.reference, error = %e, "Failed to record rejection");
        }

        dispatch(
            self.notifier.as_ref(),
            Notification::new(Template::PaymentRejected, &session.student_email)
                .var("reference", &session.reference)
                .var(
                    "reason",
                    session.operator_note.as_deref().unwrap_or(DEFAULT_REJECTION_REASON),
                ),
        )
        .await;
    }

    /// Client poll. Drives activation the first time `approved` is observed.
    pub async fn poll_status(&self, reference: &str) -> Result<PaymentStatusView> {
        let session = self.get_session(reference).await?;

        let session = if session.status == SessionStatus::Approved && !session.activation_attempted {
            match self.activation.activate(reference).await {
                Ok(session) => session,
                Err(e) => {
                    // Left for the next poll or an operator re-drive
                    tracing::error!(reference = %reference, error = %e, "Activation could not start");
                    session
                }
            }
        } else {
            session
        };

        Ok(PaymentStatusView::from(&session))
    }

    /// Operator re-drive of a failed activation
    pub async fn redrive_activation(&self, reference: &str, operator_id: &str) -> Result<PaymentSession> {
        self.activation.redrive(reference, operator_id).await
    }

    pub async fn get_session(&self, reference: &str) -> Result<PaymentSession> {
        self.sessions
            .get(reference)
            .await?
            .map(|v| v.doc)
            .ok_or_else(|| PaymentError::NotFound(reference.to_string()))
    }

    /// Admin listing, newest first
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionPage> {
        let mut items: Vec<PaymentSession> = self
            .sessions
            .find(&|session: &PaymentSession| filter.matches(session))
            .await?
            .into_iter()
            .map(|(_, v)| v.doc)
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = items.len();
        let limit = filter.limit.unwrap_or(50).min(MAX_PAGE_SIZE);
        let items = items.into_iter().skip(filter.offset).take(limit).collect();
        Ok(SessionPage { total, items })
    }
}

/// Digits with an optional leading `+`, 8 to 15 digits
fn normalize_phone(phone: &str) -> Result<String> {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::Validation(format!(
            "Invalid payment phone number '{phone}'"
        )));
    }
    Ok(compact)
}

/// 4 to 10 digits
fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim();
    if !(4..=10).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::Validation(
            "Verification code must be 4 to 10 digits".into(),
        ));
    }
    Ok(code.to_string())
}
