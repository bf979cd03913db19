//! Persistence for the reconciliation flow
//!
//! [`BillingStore`] is the data-access seam: the user's subscription mirror,
//! the credit ledger, the two append-only logs, and the webhook idempotency
//! ledger. [`PgBillingStore`] is the production implementation and
//! [`InMemoryBillingStore`] backs tests and local development.

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use learnwell_shared::{SubscriptionStatus, SubscriptionTier};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A user's denormalized subscription fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingUser {
    pub id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: Option<SubscriptionStatus>,
    pub subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

impl BillingUser {
    /// A free-tier user with no subscription history
    pub fn new(email: impl Into<String>, stripe_customer_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            stripe_customer_id: Some(stripe_customer_id.into()),
            subscription_tier: SubscriptionTier::Free,
            subscription_status: None,
            subscription_id: None,
            subscription_period_end: None,
            cancel_at_period_end: false,
        }
    }

    /// True if `subscription_id` is this user's subscription and it has already been canceled
    pub fn is_canceled_subscription(&self, subscription_id: &str) -> bool {
        self.subscription_id.as_deref() == Some(subscription_id)
            && self
                .subscription_status
                .map(|s| s.is_terminal())
                .unwrap_or(false)
    }

    /// True if the user has moved on to a subscription other than `subscription_id`
    pub fn has_other_subscription(&self, subscription_id: &str) -> bool {
        self.subscription_id
            .as_deref()
            .is_some_and(|current| current != subscription_id)
    }
}

/// Partial update of a user's subscription mirror; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionRecordUpdate {
    pub tier: Option<SubscriptionTier>,
    pub status: Option<SubscriptionStatus>,
    pub subscription_id: Option<String>,
    pub period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
}

/// Per-user credit balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLedger {
    pub user_id: Uuid,
    pub remaining_credits: i64,
    pub used_credits: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_credit_refresh: Option<OffsetDateTime>,
}

impl CreditLedger {
    /// Balance reported for a user that has no ledger row yet
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            remaining_credits: 0,
            used_credits: 0,
            last_credit_refresh: None,
        }
    }
}

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    InvoicePaid,
    InvoicePaymentFailed,
}

impl SubscriptionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventType::SubscriptionCreated => "subscription_created",
            SubscriptionEventType::SubscriptionUpdated => "subscription_updated",
            SubscriptionEventType::SubscriptionCancelled => "subscription_cancelled",
            SubscriptionEventType::InvoicePaid => "invoice_paid",
            SubscriptionEventType::InvoicePaymentFailed => "invoice_payment_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subscription_created" => Some(SubscriptionEventType::SubscriptionCreated),
            "subscription_updated" => Some(SubscriptionEventType::SubscriptionUpdated),
            "subscription_cancelled" => Some(SubscriptionEventType::SubscriptionCancelled),
            "invoice_paid" => Some(SubscriptionEventType::InvoicePaid),
            "invoice_payment_failed" => Some(SubscriptionEventType::InvoicePaymentFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row to append to the subscription audit log
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionEvent {
    pub user_id: Uuid,
    pub event_type: SubscriptionEventType,
    pub tier: SubscriptionTier,
    pub stripe_subscription_id: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: SubscriptionEventType,
    pub tier: SubscriptionTier,
    pub stripe_subscription_id: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Row to append to the credit purchase log
#[derive(Debug, Clone, PartialEq)]
pub struct NewCreditPurchase {
    pub user_id: Uuid,
    pub amount: i64,
    pub stripe_session_id: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditPurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub stripe_session_id: String,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A `processing` claim older than this is treated as abandoned and may be reclaimed
pub const WEBHOOK_PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Processing state of a claimed webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProcessingResult {
    Processing,
    Success,
    Error,
}

impl WebhookProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProcessingResult::Processing => "processing",
            WebhookProcessingResult::Success => "success",
            WebhookProcessingResult::Error => "error",
        }
    }
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Users

    async fn find_user_by_customer_id(&self, customer_id: &str)
        -> BillingResult<Option<BillingUser>>;

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<BillingUser>>;

    async fn update_subscription_record(
        &self,
        user_id: Uuid,
        update: &SubscriptionRecordUpdate,
    ) -> BillingResult<()>;

    // Credit ledger

    async fn get_credit_ledger(&self, user_id: Uuid) -> BillingResult<Option<CreditLedger>>;

    /// Atomically add `amount` to `remaining_credits`, creating the row if absent.
    /// `refreshed_at` stamps `last_credit_refresh` when this is an allowance grant.
    async fn increment_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        refreshed_at: Option<OffsetDateTime>,
    ) -> BillingResult<CreditLedger>;

    /// Atomically move `amount` from remaining to used.
    /// Returns `None` (and changes nothing) if the balance is too small.
    async fn consume_credits(&self, user_id: Uuid, amount: i64)
        -> BillingResult<Option<CreditLedger>>;

    /// Increment the ledger and append the purchase row as one unit
    async fn record_credit_purchase(
        &self,
        purchase: NewCreditPurchase,
    ) -> BillingResult<(CreditLedger, CreditPurchase)>;

    // Audit logs

    async fn insert_subscription_event(
        &self,
        event: NewSubscriptionEvent,
    ) -> BillingResult<SubscriptionEvent>;

    async fn list_subscription_events(&self, user_id: Uuid)
        -> BillingResult<Vec<SubscriptionEvent>>;

    async fn list_credit_purchases(&self, user_id: Uuid) -> BillingResult<Vec<CreditPurchase>>;

    // Webhook idempotency

    /// Claim exclusive processing rights for a provider event id.
    ///
    /// Returns `false` if the event already succeeded or is being processed.
    /// Events that previously ended in `error` can be claimed again, as can
    /// `processing` claims older than [`WEBHOOK_PROCESSING_TIMEOUT_MINUTES`].
    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool>;

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<String>,
    ) -> BillingResult<()>;
}
