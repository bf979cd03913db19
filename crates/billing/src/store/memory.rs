//! In-memory billing store for tests and local development

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    BillingStore, BillingUser, CreditLedger, CreditPurchase, NewCreditPurchase,
    NewSubscriptionEvent, SubscriptionEvent, SubscriptionRecordUpdate, WebhookProcessingResult,
    WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone)]
struct WebhookRecord {
    event_type: String,
    result: WebhookProcessingResult,
    error_message: Option<String>,
    processing_started_at: OffsetDateTime,
}

impl WebhookRecord {
    fn is_reclaimable(&self, now: OffsetDateTime) -> bool {
        match self.result {
            WebhookProcessingResult::Error => true,
            WebhookProcessingResult::Processing => {
                self.processing_started_at
                    < now - Duration::minutes(i64::from(WEBHOOK_PROCESSING_TIMEOUT_MINUTES))
            }
            WebhookProcessingResult::Success => false,
        }
    }
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, BillingUser>,
    ledgers: HashMap<Uuid, CreditLedger>,
    events: Vec<SubscriptionEvent>,
    purchases: Vec<CreditPurchase>,
    webhooks: HashMap<String, WebhookRecord>,
}

/// Billing store held in process memory. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user (replaces any user with the same id)
    pub async fn insert_user(&self, user: BillingUser) {
        let mut state = self.state.lock().await;
        state.users.insert(user.id, user);
    }

    /// Processing result recorded for a provider event id
    pub async fn webhook_result(&self, event_id: &str) -> Option<WebhookProcessingResult> {
        let state = self.state.lock().await;
        state.webhooks.get(event_id).map(|r| r.result)
    }

    /// Error message recorded for a failed provider event
    pub async fn webhook_error(&self, event_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .webhooks
            .get(event_id)
            .and_then(|r| r.error_message.clone())
    }

    /// Event type recorded when the provider event was claimed
    pub async fn webhook_event_type(&self, event_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.webhooks.get(event_id).map(|r| r.event_type.clone())
    }

    /// Move a claim's start time into the past, as if its worker had stalled
    pub async fn backdate_webhook_claim(&self, event_id: &str, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.webhooks.get_mut(event_id) {
            record.processing_started_at -= by;
        }
    }
}

fn increment(state: &mut State, user_id: Uuid, amount: i64) -> &mut CreditLedger {
    let ledger = state
        .ledgers
        .entry(user_id)
        .or_insert_with(|| CreditLedger::empty(user_id));
    ledger.remaining_credits += amount;
    ledger
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<BillingUser>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<BillingUser>> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn update_subscription_record(
        &self,
        user_id: Uuid,
        update: &SubscriptionRecordUpdate,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&user_id) else {
            tracing::warn!(user_id = %user_id, "Subscription record update matched no user");
            return Ok(());
        };

        if let Some(tier) = update.tier {
            user.subscription_tier = tier;
        }
        if let Some(status) = update.status {
            user.subscription_status = Some(status);
        }
        if let Some(subscription_id) = &update.subscription_id {
            user.subscription_id = Some(subscription_id.clone());
        }
        if let Some(period_end) = update.period_end {
            user.subscription_period_end = Some(period_end);
        }
        if let Some(cancel) = update.cancel_at_period_end {
            user.cancel_at_period_end = cancel;
        }

        Ok(())
    }

    async fn get_credit_ledger(&self, user_id: Uuid) -> BillingResult<Option<CreditLedger>> {
        let state = self.state.lock().await;
        Ok(state.ledgers.get(&user_id).cloned())
    }

    async fn increment_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        refreshed_at: Option<OffsetDateTime>,
    ) -> BillingResult<CreditLedger> {
        if amount < 0 {
            return Err(BillingError::InvalidInput(format!(
                "credit increment must not be negative: {}",
                amount
            )));
        }

        let mut state = self.state.lock().await;
        let ledger = increment(&mut state, user_id, amount);
        if refreshed_at.is_some() {
            ledger.last_credit_refresh = refreshed_at;
        }
        Ok(ledger.clone())
    }

    async fn consume_credits(
        &self,
        user_id: Uuid,
        amount: i64,
    ) -> BillingResult<Option<CreditLedger>> {
        let mut state = self.state.lock().await;
        match state.ledgers.get_mut(&user_id) {
            Some(ledger) if ledger.remaining_credits >= amount => {
                ledger.remaining_credits -= amount;
                ledger.used_credits += amount;
                Ok(Some(ledger.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_credit_purchase(
        &self,
        purchase: NewCreditPurchase,
    ) -> BillingResult<(CreditLedger, CreditPurchase)> {
        let mut state = self.state.lock().await;
        let ledger = increment(&mut state, purchase.user_id, purchase.amount).clone();

        let row = CreditPurchase {
            id: Uuid::new_v4(),
            user_id: purchase.user_id,
            amount: purchase.amount,
            stripe_session_id: purchase.stripe_session_id,
            metadata: purchase.metadata,
            created_at: OffsetDateTime::now_utc(),
        };
        state.purchases.push(row.clone());

        Ok((ledger, row))
    }

    async fn insert_subscription_event(
        &self,
        event: NewSubscriptionEvent,
    ) -> BillingResult<SubscriptionEvent> {
        let row = SubscriptionEvent {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            event_type: event.event_type,
            tier: event.tier,
            stripe_subscription_id: event.stripe_subscription_id,
            metadata: event.metadata,
            created_at: OffsetDateTime::now_utc(),
        };

        let mut state = self.state.lock().await;
        state.events.push(row.clone());
        Ok(row)
    }

    async fn list_subscription_events(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_credit_purchases(&self, user_id: Uuid) -> BillingResult<Vec<CreditPurchase>> {
        let state = self.state.lock().await;
        Ok(state
            .purchases
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;
        match state.webhooks.get_mut(event_id) {
            Some(record) if record.is_reclaimable(now) => {
                record.error_message = (record.result == WebhookProcessingResult::Processing)
                    .then(|| format!("Recovered from stuck state at {}", now));
                record.result = WebhookProcessingResult::Processing;
                record.processing_started_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                state.webhooks.insert(
                    event_id.to_string(),
                    WebhookRecord {
                        event_type: event_type.to_string(),
                        result: WebhookProcessingResult::Processing,
                        error_message: None,
                        processing_started_at: now,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<String>,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.webhooks.get_mut(event_id) {
            record.result = result;
            record.error_message = error_message;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_ledger_lazily() {
        let store = InMemoryBillingStore::new();
        let user_id = Uuid::new_v4();

        assert!(store.get_credit_ledger(user_id).await.unwrap().is_none());

        let ledger = store.increment_credits(user_id, 20, None).await.unwrap();
        assert_eq!(ledger.remaining_credits, 20);
        assert_eq!(ledger.used_credits, 0);
        assert!(ledger.last_credit_refresh.is_none());
    }

    #[tokio::test]
    async fn test_consume_refuses_overdraft() {
        let store = InMemoryBillingStore::new();
        let user_id = Uuid::new_v4();
        store.increment_credits(user_id, 5, None).await.unwrap();

        assert!(store.consume_credits(user_id, 6).await.unwrap().is_none());

        let ledger = store.consume_credits(user_id, 5).await.unwrap().unwrap();
        assert_eq!(ledger.remaining_credits, 0);
        assert_eq!(ledger.used_credits, 5);
    }

    #[tokio::test]
    async fn test_negative_increment_rejected() {
        let store = InMemoryBillingStore::new();
        let result = store.increment_credits(Uuid::new_v4(), -1, None).await;
        assert!(matches!(result, Err(BillingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_error() {
        let store = InMemoryBillingStore::new();

        assert!(store.claim_webhook_event("evt_1", "invoice.paid").await.unwrap());
        assert!(!store.claim_webhook_event("evt_1", "invoice.paid").await.unwrap());

        store
            .finish_webhook_event("evt_1", WebhookProcessingResult::Error, Some("boom".into()))
            .await
            .unwrap();
        assert!(store.claim_webhook_event("evt_1", "invoice.paid").await.unwrap());

        store
            .finish_webhook_event("evt_1", WebhookProcessingResult::Success, None)
            .await
            .unwrap();
        assert!(!store.claim_webhook_event("evt_1", "invoice.paid").await.unwrap());
        assert_eq!(
            store.webhook_result("evt_1").await,
            Some(WebhookProcessingResult::Success)
        );
    }

    #[tokio::test]
    async fn test_stalled_claim_is_reclaimed_after_timeout() {
        let store = InMemoryBillingStore::new();
        assert!(store.claim_webhook_event("evt_2", "invoice.paid").await.unwrap());

        // Still inside the window
        store
            .backdate_webhook_claim("evt_2", Duration::minutes(29))
            .await;
        assert!(!store.claim_webhook_event("evt_2", "invoice.paid").await.unwrap());

        store.backdate_webhook_claim("evt_2", Duration::minutes(2)).await;
        assert!(store.claim_webhook_event("evt_2", "invoice.paid").await.unwrap());
        assert!(store
            .webhook_error("evt_2")
            .await
            .unwrap()
            .starts_with("Recovered from stuck state"));

        // The fresh claim is exclusive again
        assert!(!store.claim_webhook_event("evt_2", "invoice.paid").await.unwrap());
    }
}
