//! Postgres-backed billing store

use async_trait::async_trait;
use learnwell_shared::{SubscriptionStatus, SubscriptionTier};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    BillingStore, BillingUser, CreditLedger, CreditPurchase, NewCreditPurchase,
    NewSubscriptionEvent, SubscriptionEvent, SubscriptionEventType, SubscriptionRecordUpdate,
    WebhookProcessingResult, WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};
use crate::error::{BillingError, BillingResult};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    stripe_customer_id: Option<String>,
    subscription_tier: String,
    subscription_status: Option<String>,
    subscription_id: Option<String>,
    subscription_period_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
}

impl TryFrom<UserRow> for BillingUser {
    type Error = BillingError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let subscription_tier: SubscriptionTier = row
            .subscription_tier
            .parse()
            .map_err(|e| BillingError::Internal(format!("user {}: {}", row.id, e)))?;
        let subscription_status = row
            .subscription_status
            .as_deref()
            .map(str::parse::<SubscriptionStatus>)
            .transpose()
            .map_err(|e| BillingError::Internal(format!("user {}: {}", row.id, e)))?;

        Ok(BillingUser {
            id: row.id,
            email: row.email,
            stripe_customer_id: row.stripe_customer_id,
            subscription_tier,
            subscription_status,
            subscription_id: row.subscription_id,
            subscription_period_end: row.subscription_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    user_id: Uuid,
    remaining_credits: i64,
    used_credits: i64,
    last_credit_refresh: Option<OffsetDateTime>,
}

impl From<LedgerRow> for CreditLedger {
    fn from(row: LedgerRow) -> Self {
        CreditLedger {
            user_id: row.user_id,
            remaining_credits: row.remaining_credits,
            used_credits: row.used_credits,
            last_credit_refresh: row.last_credit_refresh,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    user_id: Uuid,
    event_type: String,
    tier: String,
    stripe_subscription_id: Option<String>,
    metadata: serde_json::Value,
    created_at: OffsetDateTime,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = BillingError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = SubscriptionEventType::parse(&row.event_type).ok_or_else(|| {
            BillingError::Internal(format!("unknown subscription event type: {}", row.event_type))
        })?;
        let tier = row
            .tier
            .parse()
            .map_err(|e| BillingError::Internal(format!("event {}: {}", row.id, e)))?;

        Ok(SubscriptionEvent {
            id: row.id,
            user_id: row.user_id,
            event_type,
            tier,
            stripe_subscription_id: row.stripe_subscription_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    stripe_session_id: String,
    metadata: serde_json::Value,
    created_at: OffsetDateTime,
}

impl From<PurchaseRow> for CreditPurchase {
    fn from(row: PurchaseRow) -> Self {
        CreditPurchase {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            stripe_session_id: row.stripe_session_id,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = r#"
    id, email, stripe_customer_id, subscription_tier, subscription_status,
    subscription_id, subscription_period_end, cancel_at_period_end
"#;

/// Billing store over the `users`, `user_credits`, `subscription_events`,
/// `credit_purchases` and `stripe_webhook_events` tables
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<BillingUser>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE stripe_customer_id = $1",
            USER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BillingUser::try_from).transpose()
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<BillingUser>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(BillingUser::try_from).transpose()
    }

    async fn update_subscription_record(
        &self,
        user_id: Uuid,
        update: &SubscriptionRecordUpdate,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_tier = COALESCE($2, subscription_tier),
                subscription_status = COALESCE($3, subscription_status),
                subscription_id = COALESCE($4, subscription_id),
                subscription_period_end = COALESCE($5, subscription_period_end),
                cancel_at_period_end = COALESCE($6, cancel_at_period_end),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.tier.map(|t| t.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.subscription_id.as_deref())
        .bind(update.period_end)
        .bind(update.cancel_at_period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(user_id = %user_id, "Subscription record update matched no user");
        }

        Ok(())
    }

    async fn get_credit_ledger(&self, user_id: Uuid) -> BillingResult<Option<CreditLedger>> {
        let row: Option<LedgerRow> = sqlx::query_as(
            r#"
            SELECT user_id, remaining_credits, used_credits, last_credit_refresh
            FROM user_credits
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CreditLedger::from))
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

        // Single statement: concurrent grants for the same user cannot lose an increment
        let row: LedgerRow = sqlx::query_as(
            r#"
            INSERT INTO user_credits (user_id, remaining_credits, used_credits, last_credit_refresh)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                remaining_credits = user_credits.remaining_credits + EXCLUDED.remaining_credits,
                last_credit_refresh = COALESCE(EXCLUDED.last_credit_refresh, user_credits.last_credit_refresh),
                updated_at = NOW()
            RETURNING user_id, remaining_credits, used_credits, last_credit_refresh
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(refreshed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn consume_credits(
        &self,
        user_id: Uuid,
        amount: i64,
    ) -> BillingResult<Option<CreditLedger>> {
        let row: Option<LedgerRow> = sqlx::query_as(
            r#"
            UPDATE user_credits SET
                remaining_credits = remaining_credits - $2,
                used_credits = used_credits + $2,
                updated_at = NOW()
            WHERE user_id = $1 AND remaining_credits >= $2
            RETURNING user_id, remaining_credits, used_credits, last_credit_refresh
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CreditLedger::from))
    }

    async fn record_credit_purchase(
        &self,
        purchase: NewCreditPurchase,
    ) -> BillingResult<(CreditLedger, CreditPurchase)> {
        let mut tx = self.pool.begin().await?;

        let ledger: LedgerRow = sqlx::query_as(
            r#"
            INSERT INTO user_credits (user_id, remaining_credits, used_credits)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id) DO UPDATE SET
                remaining_credits = user_credits.remaining_credits + EXCLUDED.remaining_credits,
                updated_at = NOW()
            RETURNING user_id, remaining_credits, used_credits, last_credit_refresh
            "#,
        )
        .bind(purchase.user_id)
        .bind(purchase.amount)
        .fetch_one(&mut *tx)
        .await?;

        let row: PurchaseRow = sqlx::query_as(
            r#"
            INSERT INTO credit_purchases (id, user_id, amount, stripe_session_id, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, amount, stripe_session_id, metadata, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(purchase.user_id)
        .bind(purchase.amount)
        .bind(&purchase.stripe_session_id)
        .bind(&purchase.metadata)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((ledger.into(), row.into()))
    }

    async fn insert_subscription_event(
        &self,
        event: NewSubscriptionEvent,
    ) -> BillingResult<SubscriptionEvent> {
        let row: EventRow = sqlx::query_as(
            r#"
            INSERT INTO subscription_events
                (id, user_id, event_type, tier, stripe_subscription_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, event_type, tier, stripe_subscription_id, metadata, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(event.tier.as_str())
        .bind(&event.stripe_subscription_id)
        .bind(&event.metadata)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_subscription_events(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, event_type, tier, stripe_subscription_id, metadata, created_at
            FROM subscription_events
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    async fn list_credit_purchases(&self, user_id: Uuid) -> BillingResult<Vec<CreditPurchase>> {
        let rows: Vec<PurchaseRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, amount, stripe_session_id, metadata, created_at
            FROM credit_purchases
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CreditPurchase::from).collect())
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        // INSERT...ON CONFLICT...RETURNING: only one concurrent delivery gets a row back.
        // Events that ended in 'error' may be reclaimed by the provider's retry, and so may
        // claims stuck in 'processing' past the timeout (the claiming request died).
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (id, stripe_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CASE
                    WHEN stripe_webhook_events.processing_result = 'processing'
                        THEN CONCAT('Recovered from stuck state at ', NOW()::TEXT)
                    ELSE NULL
                END,
                processed_at = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at
                       < NOW() - make_interval(mins => $4))
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(event_type)
        .bind(WEBHOOK_PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<String>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $2, error_message = $3, processed_at = NOW()
            WHERE stripe_event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(result.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
