//! Credit ledger operations
//!
//! Every mutation is a single atomic statement in the store, so concurrent
//! grants and spends for the same user never lose an update.

use std::sync::Arc;

use learnwell_shared::SubscriptionTier;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, CreditLedger, CreditPurchase, NewCreditPurchase};

#[derive(Clone)]
pub struct CreditLedgerService {
    store: Arc<dyn BillingStore>,
}

impl CreditLedgerService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Add the tier's monthly allowance to the balance and stamp the refresh time.
    ///
    /// Allowances accumulate; an unspent balance is never reset.
    pub async fn grant_allowance(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
    ) -> BillingResult<CreditLedger> {
        let amount = tier.monthly_credits();
        let ledger = self
            .store
            .increment_credits(user_id, amount, Some(OffsetDateTime::now_utc()))
            .await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            granted = amount,
            remaining = ledger.remaining_credits,
            "Granted monthly credit allowance"
        );

        Ok(ledger)
    }

    /// Credit a one-off purchase and append it to the purchase log
    pub async fn record_purchase(
        &self,
        user_id: Uuid,
        amount: i64,
        session_id: &str,
        metadata: serde_json::Value,
    ) -> BillingResult<(CreditLedger, CreditPurchase)> {
        if amount <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "credit purchase amount must be positive: {}",
                amount
            )));
        }

        let (ledger, purchase) = self
            .store
            .record_credit_purchase(NewCreditPurchase {
                user_id,
                amount,
                stripe_session_id: session_id.to_string(),
                metadata,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            session_id = %session_id,
            remaining = ledger.remaining_credits,
            "Recorded credit purchase"
        );

        Ok((ledger, purchase))
    }

    /// Current balance; a user without a ledger row has an empty one
    pub async fn balance(&self, user_id: Uuid) -> BillingResult<CreditLedger> {
        Ok(self
            .store
            .get_credit_ledger(user_id)
            .await?
            .unwrap_or_else(|| CreditLedger::empty(user_id)))
    }

    /// Spend credits. Fails without touching the ledger if the balance is too small.
    pub async fn consume(&self, user_id: Uuid, amount: i64) -> BillingResult<CreditLedger> {
        if amount <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "credit amount must be positive: {}",
                amount
            )));
        }

        match self.store.consume_credits(user_id, amount).await? {
            Some(ledger) => {
                tracing::debug!(
                    user_id = %user_id,
                    amount = amount,
                    remaining = ledger.remaining_credits,
                    "Consumed credits"
                );
                Ok(ledger)
            }
            None => {
                let available = self.balance(user_id).await?.remaining_credits;
                Err(BillingError::InsufficientCredits {
                    requested: amount,
                    available,
                })
            }
        }
    }
}
