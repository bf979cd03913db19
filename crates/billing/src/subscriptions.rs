//! Subscription record maintenance
//!
//! The user row mirrors the provider's subscription state. Each webhook
//! handler applies one of the named partial updates below and appends a row
//! to the subscription audit log.

use std::sync::Arc;

use learnwell_shared::{SubscriptionStatus, SubscriptionTier};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::{
    BillingStore, BillingUser, NewSubscriptionEvent, SubscriptionEvent, SubscriptionRecordUpdate,
};

impl SubscriptionRecordUpdate {
    /// A new subscription has started
    pub fn activated(
        tier: SubscriptionTier,
        subscription_id: impl Into<String>,
        period_end: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            tier: Some(tier),
            status: Some(SubscriptionStatus::Active),
            subscription_id: Some(subscription_id.into()),
            period_end,
            cancel_at_period_end: None,
        }
    }

    /// Copy the provider's view of an existing subscription
    pub fn mirrored(
        tier: SubscriptionTier,
        status: SubscriptionStatus,
        period_end: Option<OffsetDateTime>,
        cancel_at_period_end: bool,
    ) -> Self {
        Self {
            tier: Some(tier),
            status: Some(status),
            subscription_id: None,
            period_end,
            cancel_at_period_end: Some(cancel_at_period_end),
        }
    }

    /// The subscription has ended; a pending cancellation is no longer pending
    pub fn cancelled() -> Self {
        Self {
            status: Some(SubscriptionStatus::Canceled),
            cancel_at_period_end: Some(false),
            ..Default::default()
        }
    }

    /// A renewal invoice was paid
    pub fn renewed(period_end: Option<OffsetDateTime>) -> Self {
        Self {
            status: Some(SubscriptionStatus::Active),
            period_end,
            ..Default::default()
        }
    }

    pub fn past_due() -> Self {
        Self {
            status: Some(SubscriptionStatus::PastDue),
            ..Default::default()
        }
    }
}

/// Convert a provider unix timestamp, dropping values out of range
pub fn period_end_from_unix(timestamp: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp).ok()
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Apply `update` to the user's record and append the audit row.
    ///
    /// The audit row is best-effort: a failed insert is logged, not returned,
    /// so the state change it describes is never rolled back by it.
    pub async fn apply(
        &self,
        user: &BillingUser,
        update: SubscriptionRecordUpdate,
        event: NewSubscriptionEvent,
    ) -> BillingResult<()> {
        self.store.update_subscription_record(user.id, &update).await?;

        let event_type = event.event_type;
        let tier = event.tier;

        if let Err(e) = self.store.insert_subscription_event(event).await {
            tracing::warn!(
                user_id = %user.id,
                event_type = %event_type,
                error = %e,
                "Failed to log subscription event"
            );
        }

        tracing::info!(
            user_id = %user.id,
            event_type = %event_type,
            tier = %tier,
            status = ?update.status,
            "Subscription record updated"
        );

        Ok(())
    }

    /// Audit log for a user, oldest first
    pub async fn history(&self, user_id: Uuid) -> BillingResult<Vec<SubscriptionEvent>> {
        self.store.list_subscription_events(user_id).await
    }
}
