//! Stripe webhook handling
//!
//! Verifies the `Stripe-Signature` header, claims the event id for exclusive
//! processing, and routes subscription, invoice and checkout events to the
//! handlers that mirror them onto the user record and the credit ledger.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::checkout::CREDIT_AMOUNT_METADATA_KEY;
use crate::credits::CreditLedgerService;
use crate::error::{BillingError, BillingResult};
use crate::events::{CheckoutSessionObject, InvoiceObject, WebhookEvent, WebhookEventKind};
use crate::plans::SubscriptionPlans;
use crate::provider::{PaymentProvider, SubscriptionSnapshot};
use crate::store::{
    BillingStore, BillingUser, NewSubscriptionEvent, SubscriptionEventType,
    SubscriptionRecordUpdate, WebhookProcessingResult,
};
use crate::subscriptions::{period_end_from_unix, SubscriptionService};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a signed webhook timestamp, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Outcome of handling one verified event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A handler ran and changed state
    Processed,
    /// The event type or checkout mode isn't one we act on
    Ignored,
    /// The event id was already claimed
    Duplicate,
    /// A handler ran but had nothing to do (unknown customer, bad metadata, canceled subscription)
    Skipped,
}

/// Summary returned to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReceipt {
    pub event_id: String,
    pub event_type: String,
    pub outcome: WebhookOutcome,
}

/// Compute the hex HMAC-SHA256 Stripe signs a payload with
pub fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    if signatures.is_empty() {
        return None;
    }

    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn PaymentProvider>,
    webhook_secret: String,
    plans: SubscriptionPlans,
    dedupe: bool,
    subscriptions: SubscriptionService,
    credits: CreditLedgerService,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn PaymentProvider>,
        webhook_secret: impl Into<String>,
        plans: SubscriptionPlans,
    ) -> Self {
        Self {
            subscriptions: SubscriptionService::new(store.clone()),
            credits: CreditLedgerService::new(store.clone()),
            store,
            provider,
            webhook_secret: webhook_secret.into(),
            plans,
            dedupe: true,
        }
    }

    /// Toggle the event id idempotency gate
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Verify the signature header and parse the event.
    ///
    /// Every failure maps to [`BillingError::WebhookSignatureInvalid`]; nothing
    /// in the payload is acted on unless this succeeds.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        let header = parse_signature_header(signature).ok_or_else(|| {
            tracing::error!("Malformed Stripe-Signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let skew = (now - header.timestamp).abs();
        if skew > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = header.timestamp,
                now = now,
                skew = skew,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let expected = compute_signature(&self.webhook_secret, header.timestamp, payload)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to compute webhook signature");
                BillingError::WebhookSignatureInvalid
            })?;

        let matched = header
            .signatures
            .iter()
            .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

        if !matched {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Webhook signature verified"
        );

        Ok(event)
    }

    /// Verify and handle a raw delivery
    pub async fn process(&self, payload: &str, signature: &str) -> BillingResult<WebhookReceipt> {
        let event = self.verify_event(payload, signature)?;
        let event_id = event.id.clone();
        let event_type = event.event_type.clone();

        let outcome = self.handle_event(event).await?;

        Ok(WebhookReceipt {
            event_id,
            event_type,
            outcome,
        })
    }

    /// Handle a verified event.
    ///
    /// With dedupe enabled the event id is claimed first; only one delivery of
    /// an id runs its handler. A delivery that fails is recorded as `error` and
    /// can be claimed again by the provider's retry.
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<WebhookOutcome> {
        if self.dedupe {
            let claimed = self
                .store
                .claim_webhook_event(&event.id, &event.event_type)
                .await
                .map_err(|e| {
                    tracing::error!(
                        event_id = %event.id,
                        error = %e,
                        "Failed to claim webhook event for processing"
                    );
                    e
                })?;

            if !claimed {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Duplicate webhook event, skipping"
                );
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.dispatch(&event).await;

        if self.dedupe {
            let (processing_result, error_message) = match &result {
                Ok(_) => (WebhookProcessingResult::Success, None),
                Err(e) => (WebhookProcessingResult::Error, Some(e.to_string())),
            };

            self.finish_claim(&event, processing_result, error_message)
                .await;
        }

        if let Err(e) = &result {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Webhook handler failed"
            );
        }

        result
    }

    /// Record the outcome on the claim row, retrying once. A row left in
    /// `processing` is only reclaimed after the stale-claim timeout.
    async fn finish_claim(
        &self,
        event: &WebhookEvent,
        processing_result: WebhookProcessingResult,
        error_message: Option<String>,
    ) {
        let Err(first_error) = self
            .store
            .finish_webhook_event(&event.id, processing_result, error_message.clone())
            .await
        else {
            return;
        };

        tracing::warn!(
            event_id = %event.id,
            error = %first_error,
            "First attempt to update webhook event failed, retrying..."
        );

        if let Err(retry_error) = self
            .store
            .finish_webhook_event(&event.id, processing_result, error_message.clone())
            .await
        {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                processing_result = processing_result.as_str(),
                error_message = ?error_message,
                first_error = %first_error,
                retry_error = %retry_error,
                "Failed to update webhook audit record after retry; \
                 event stays in 'processing' until the claim times out"
            );
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        match event.kind() {
            WebhookEventKind::CheckoutSessionCompleted => {
                let session = event.checkout_session_object()?;
                match session.mode.as_str() {
                    "subscription" => self.handle_subscription_checkout(event, &session).await,
                    "payment" => self.handle_credit_purchase(event, &session).await,
                    mode => {
                        tracing::info!(
                            event_id = %event.id,
                            mode = %mode,
                            "Ignoring checkout session with unhandled mode"
                        );
                        Ok(WebhookOutcome::Ignored)
                    }
                }
            }
            WebhookEventKind::SubscriptionUpdated => self.handle_subscription_updated(event).await,
            WebhookEventKind::SubscriptionDeleted => self.handle_subscription_deleted(event).await,
            WebhookEventKind::InvoicePaymentSucceeded => self.handle_invoice_paid(event).await,
            WebhookEventKind::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event).await
            }
            WebhookEventKind::Other => {
                tracing::info!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Checkout completed in subscription mode: activate and grant the first allowance
    async fn handle_subscription_checkout(
        &self,
        event: &WebhookEvent,
        session: &CheckoutSessionObject,
    ) -> BillingResult<WebhookOutcome> {
        let Some(user) = self.resolve_user(session.customer_id(), event).await? else {
            return Ok(WebhookOutcome::Skipped);
        };

        let Some(subscription_id) = session.subscription_id() else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Subscription checkout completed without a subscription"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let subscription = self.lookup_subscription(subscription_id).await?;
        let tier = self
            .plans
            .tier_for_optional_price(subscription.price_id.as_deref());

        self.subscriptions
            .apply(
                &user,
                SubscriptionRecordUpdate::activated(
                    tier,
                    subscription_id,
                    period_end_from_unix(subscription.current_period_end),
                ),
                NewSubscriptionEvent {
                    user_id: user.id,
                    event_type: SubscriptionEventType::SubscriptionCreated,
                    tier,
                    stripe_subscription_id: Some(subscription_id.to_string()),
                    metadata: json!({
                        "checkoutSessionId": session.id,
                        "priceId": subscription.price_id,
                    }),
                },
            )
            .await?;

        self.credits.grant_allowance(user.id, tier).await?;

        tracing::info!(
            user_id = %user.id,
            subscription_id = %subscription_id,
            tier = %tier,
            "Subscription created"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// Mirror the provider's subscription state; credits untouched
    async fn handle_subscription_updated(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let subscription = event.subscription_object()?;
        let Some(user) = self
            .resolve_user(Some(subscription.customer.id()), event)
            .await?
        else {
            return Ok(WebhookOutcome::Skipped);
        };

        if self.is_superseded(&user, &subscription.id, event)
            || self.is_terminal_for(&user, &subscription.id, event)
        {
            return Ok(WebhookOutcome::Skipped);
        }

        let tier = self.plans.tier_for_optional_price(subscription.price_id());

        self.subscriptions
            .apply(
                &user,
                SubscriptionRecordUpdate::mirrored(
                    tier,
                    subscription.status,
                    subscription.period_end(),
                    subscription.cancel_at_period_end,
                ),
                NewSubscriptionEvent {
                    user_id: user.id,
                    event_type: SubscriptionEventType::SubscriptionUpdated,
                    tier,
                    stripe_subscription_id: Some(subscription.id.clone()),
                    metadata: json!({
                        "status": subscription.status.as_str(),
                        "cancelAtPeriodEnd": subscription.cancel_at_period_end,
                    }),
                },
            )
            .await?;

        Ok(WebhookOutcome::Processed)
    }

    /// Subscription ended: mark canceled; tier and credits stay as they are
    async fn handle_subscription_deleted(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let subscription = event.subscription_object()?;
        let Some(user) = self
            .resolve_user(Some(subscription.customer.id()), event)
            .await?
        else {
            return Ok(WebhookOutcome::Skipped);
        };

        if self.is_superseded(&user, &subscription.id, event) {
            return Ok(WebhookOutcome::Skipped);
        }

        self.subscriptions
            .apply(
                &user,
                SubscriptionRecordUpdate::cancelled(),
                NewSubscriptionEvent {
                    user_id: user.id,
                    event_type: SubscriptionEventType::SubscriptionCancelled,
                    tier: user.subscription_tier,
                    stripe_subscription_id: Some(subscription.id.clone()),
                    metadata: json!({
                        "previousStatus": user.subscription_status.map(|s| s.as_str()),
                    }),
                },
            )
            .await?;

        Ok(WebhookOutcome::Processed)
    }

    /// Renewal paid: reactivate, extend the period and add the monthly allowance
    async fn handle_invoice_paid(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        let invoice = event.invoice_object()?;
        let Some(subscription_id) = invoice.subscription_id() else {
            tracing::info!(
                event_id = %event.id,
                invoice_id = %invoice.id,
                "Invoice is not for a subscription, skipping"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let Some(user) = self.resolve_user(invoice.customer_id(), event).await? else {
            return Ok(WebhookOutcome::Skipped);
        };

        if self.is_terminal_for(&user, subscription_id, event) {
            return Ok(WebhookOutcome::Skipped);
        }

        let subscription = self.lookup_subscription(subscription_id).await?;
        let tier = self
            .plans
            .tier_for_optional_price(subscription.price_id.as_deref());

        self.subscriptions
            .apply(
                &user,
                SubscriptionRecordUpdate::renewed(period_end_from_unix(
                    subscription.current_period_end,
                )),
                NewSubscriptionEvent {
                    user_id: user.id,
                    event_type: SubscriptionEventType::InvoicePaid,
                    tier,
                    stripe_subscription_id: Some(subscription_id.to_string()),
                    metadata: invoice_paid_metadata(&invoice),
                },
            )
            .await?;

        self.credits.grant_allowance(user.id, tier).await?;

        Ok(WebhookOutcome::Processed)
    }

    /// Checkout completed in payment mode: grant the purchased credits
    async fn handle_credit_purchase(
        &self,
        event: &WebhookEvent,
        session: &CheckoutSessionObject,
    ) -> BillingResult<WebhookOutcome> {
        let Some(user) = self.resolve_user(session.customer_id(), event).await? else {
            return Ok(WebhookOutcome::Skipped);
        };

        let raw_amount = session.metadata_value(CREDIT_AMOUNT_METADATA_KEY);
        let amount = match raw_amount.and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(amount) if amount > 0 => amount,
            _ => {
                tracing::warn!(
                    event_id = %event.id,
                    session_id = %session.id,
                    user_id = %user.id,
                    credit_amount = ?raw_amount,
                    "Credit purchase has no usable creditAmount, granting nothing"
                );
                return Ok(WebhookOutcome::Skipped);
            }
        };

        self.credits
            .record_purchase(
                user.id,
                amount,
                &session.id,
                json!({
                    "eventId": event.id,
                    "creditAmount": amount,
                }),
            )
            .await?;

        Ok(WebhookOutcome::Processed)
    }

    /// Payment failed: mark past due only
    async fn handle_invoice_payment_failed(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let invoice = event.invoice_object()?;
        let Some(subscription_id) = invoice.subscription_id() else {
            tracing::info!(
                event_id = %event.id,
                invoice_id = %invoice.id,
                "Failed invoice is not for a subscription, skipping"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let Some(user) = self.resolve_user(invoice.customer_id(), event).await? else {
            return Ok(WebhookOutcome::Skipped);
        };

        if self.is_terminal_for(&user, subscription_id, event) {
            return Ok(WebhookOutcome::Skipped);
        }

        self.subscriptions
            .apply(
                &user,
                SubscriptionRecordUpdate::past_due(),
                NewSubscriptionEvent {
                    user_id: user.id,
                    event_type: SubscriptionEventType::InvoicePaymentFailed,
                    tier: user.subscription_tier,
                    stripe_subscription_id: Some(subscription_id.to_string()),
                    metadata: json!({
                        "invoiceId": invoice.id,
                        "amountDue": invoice.amount_due,
                        "attemptCount": invoice.attempt_count,
                    }),
                },
            )
            .await?;

        tracing::warn!(
            user_id = %user.id,
            subscription_id = %subscription_id,
            attempt_count = invoice.attempt_count,
            "Subscription payment failed"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// Look up the user behind a provider customer id; absence is logged, not an error
    async fn resolve_user(
        &self,
        customer_id: Option<&str>,
        event: &WebhookEvent,
    ) -> BillingResult<Option<BillingUser>> {
        let Some(customer_id) = customer_id else {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Webhook object has no customer"
            );
            return Ok(None);
        };

        let user = self.store.find_user_by_customer_id(customer_id).await?;
        if user.is_none() {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                customer_id = %customer_id,
                "No user for Stripe customer, skipping"
            );
        }
        Ok(user)
    }

    /// Canceled is terminal for a subscription id
    fn is_terminal_for(
        &self,
        user: &BillingUser,
        subscription_id: &str,
        event: &WebhookEvent,
    ) -> bool {
        let terminal = user.is_canceled_subscription(subscription_id);
        if terminal {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                user_id = %user.id,
                subscription_id = %subscription_id,
                "Event for a canceled subscription, skipping"
            );
        }
        terminal
    }

    /// Events for a subscription the user has since replaced must not touch the record
    fn is_superseded(
        &self,
        user: &BillingUser,
        subscription_id: &str,
        event: &WebhookEvent,
    ) -> bool {
        let superseded = user.has_other_subscription(subscription_id);
        if superseded {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                user_id = %user.id,
                subscription_id = %subscription_id,
                current_subscription_id = ?user.subscription_id,
                "Event for a replaced subscription, skipping"
            );
        }
        superseded
    }

    async fn lookup_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot> {
        self.provider
            .retrieve_subscription(subscription_id)
            .await
            .map_err(|e| {
                tracing::error!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to retrieve subscription"
                );
                BillingError::SubscriptionLookupFailed
            })
    }
}

fn invoice_paid_metadata(invoice: &InvoiceObject) -> serde_json::Value {
    json!({
        "invoiceId": invoice.id,
        "amountPaid": invoice.amount_paid,
        "currency": invoice.currency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::store::{
        CreditLedger, CreditPurchase, InMemoryBillingStore, NewCreditPurchase, SubscriptionEvent,
    };
    use crate::testing::{signature_header, signature_header_at, MockPaymentProvider};

    const SECRET: &str = "whsec_test_secret";

    fn handler() -> WebhookHandler {
        WebhookHandler::new(
            Arc::new(InMemoryBillingStore::new()),
            Arc::new(MockPaymentProvider::new()),
            SECRET,
            SubscriptionPlans::default(),
        )
    }

    fn payload() -> String {
        json!({
            "id": "evt_1",
            "type": "invoice.payment_failed",
            "created": 1_700_000_000,
            "data": {"object": {"id": "in_1"}}
        })
        .to_string()
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let body = payload();
        let header = signature_header(SECRET, &body).unwrap();

        let event = handler().verify_event(&body, &header).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind(), WebhookEventKind::InvoicePaymentFailed);
    }

    #[test]
    fn test_any_v1_candidate_may_match() {
        let body = payload();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let good = compute_signature(SECRET, now, &body).unwrap();
        let header = format!("t={},v1={},v1={}", now, "00".repeat(32), good);

        assert!(handler().verify_event(&body, &header).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let body = payload();
        let header = signature_header(SECRET, &body).unwrap();
        let tampered = body.replace("in_1", "in_2");

        assert!(matches!(
            handler().verify_event(&tampered, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = payload();
        let header = signature_header("whsec_other", &body).unwrap();

        assert!(matches!(
            handler().verify_event(&body, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = payload();
        let stale = OffsetDateTime::now_utc().unix_timestamp() - SIGNATURE_TOLERANCE_SECS - 60;
        let header = signature_header_at(SECRET, &body, stale).unwrap();

        assert!(matches!(
            handler().verify_event(&body, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let body = payload();
        for header in ["", "garbage", "t=abc,v1=00", "v1=00", "t=1700000000"] {
            assert!(
                matches!(
                    handler().verify_event(&body, header),
                    Err(BillingError::WebhookSignatureInvalid)
                ),
                "header {:?} should be rejected",
                header
            );
        }
    }

    /// Delegates to the in-memory store, failing the first `failing_finishes`
    /// outcome writes
    struct FlakyFinishStore {
        inner: InMemoryBillingStore,
        failing_finishes: AtomicUsize,
    }

    #[async_trait]
    impl BillingStore for FlakyFinishStore {
        async fn find_user_by_customer_id(
            &self,
            customer_id: &str,
        ) -> BillingResult<Option<BillingUser>> {
            self.inner.find_user_by_customer_id(customer_id).await
        }

        async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<BillingUser>> {
            self.inner.get_user(user_id).await
        }

        async fn update_subscription_record(
            &self,
            user_id: Uuid,
            update: &SubscriptionRecordUpdate,
        ) -> BillingResult<()> {
            self.inner.update_subscription_record(user_id, update).await
        }

        async fn get_credit_ledger(&self, user_id: Uuid) -> BillingResult<Option<CreditLedger>> {
            self.inner.get_credit_ledger(user_id).await
        }

        async fn increment_credits(
            &self,
            user_id: Uuid,
            amount: i64,
            refreshed_at: Option<OffsetDateTime>,
        ) -> BillingResult<CreditLedger> {
            self.inner
                .increment_credits(user_id, amount, refreshed_at)
                .await
        }

        async fn consume_credits(
            &self,
            user_id: Uuid,
            amount: i64,
        ) -> BillingResult<Option<CreditLedger>> {
            self.inner.consume_credits(user_id, amount).await
        }

        async fn record_credit_purchase(
            &self,
            purchase: NewCreditPurchase,
        ) -> BillingResult<(CreditLedger, CreditPurchase)> {
            self.inner.record_credit_purchase(purchase).await
        }

        async fn insert_subscription_event(
            &self,
            event: NewSubscriptionEvent,
        ) -> BillingResult<SubscriptionEvent> {
            self.inner.insert_subscription_event(event).await
        }

        async fn list_subscription_events(
            &self,
            user_id: Uuid,
        ) -> BillingResult<Vec<SubscriptionEvent>> {
            self.inner.list_subscription_events(user_id).await
        }

        async fn list_credit_purchases(
            &self,
            user_id: Uuid,
        ) -> BillingResult<Vec<CreditPurchase>> {
            self.inner.list_credit_purchases(user_id).await
        }

        async fn claim_webhook_event(
            &self,
            event_id: &str,
            event_type: &str,
        ) -> BillingResult<bool> {
            self.inner.claim_webhook_event(event_id, event_type).await
        }

        async fn finish_webhook_event(
            &self,
            event_id: &str,
            result: WebhookProcessingResult,
            error_message: Option<String>,
        ) -> BillingResult<()> {
            let remaining = self.failing_finishes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_finishes.store(remaining - 1, Ordering::SeqCst);
                return Err(BillingError::Database("connection reset".into()));
            }
            self.inner
                .finish_webhook_event(event_id, result, error_message)
                .await
        }
    }

    async fn deliver_with_failing_finishes(failing_finishes: usize) -> InMemoryBillingStore {
        let inner = InMemoryBillingStore::new();
        let store = FlakyFinishStore {
            inner: inner.clone(),
            failing_finishes: AtomicUsize::new(failing_finishes),
        };
        let handler = WebhookHandler::new(
            Arc::new(store),
            Arc::new(MockPaymentProvider::new()),
            SECRET,
            SubscriptionPlans::default(),
        );

        let body = json!({
            "id": "evt_audit",
            "type": "customer.created",
            "data": {"object": {"id": "cus_audit"}}
        })
        .to_string();
        let header = signature_header(SECRET, &body).unwrap();
        let receipt = handler.process(&body, &header).await.unwrap();
        assert_eq!(receipt.outcome, WebhookOutcome::Ignored);

        inner
    }

    #[tokio::test]
    async fn test_outcome_write_retried_once() {
        let store = deliver_with_failing_finishes(1).await;
        assert_eq!(
            store.webhook_result("evt_audit").await,
            Some(WebhookProcessingResult::Success)
        );
    }

    #[tokio::test]
    async fn test_outcome_write_gives_up_after_retry() {
        let store = deliver_with_failing_finishes(2).await;
        assert_eq!(
            store.webhook_result("evt_audit").await,
            Some(WebhookProcessingResult::Processing)
        );
    }

    #[test]
    fn test_signed_non_json_rejected() {
        let body = "not json";
        let header = signature_header(SECRET, body).unwrap();

        assert!(matches!(
            handler().verify_event(body, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }
}
