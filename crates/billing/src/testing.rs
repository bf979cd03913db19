//! Test doubles for the payment provider and webhook signing
//!
//! Compiled for this crate's tests and for downstream crates that enable the
//! `testing` feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use learnwell_shared::SubscriptionStatus;
use tokio::sync::Mutex;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CheckoutSessionParams, HostedCheckout, PaymentProvider, SubscriptionSnapshot,
};
use crate::webhooks::compute_signature;

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, SubscriptionSnapshot>,
    sessions: Vec<CheckoutSessionParams>,
    fail_checkout: bool,
    omit_checkout_url: bool,
    fail_lookup: bool,
}

/// In-process payment provider that records checkout sessions and serves
/// subscriptions registered with [`MockPaymentProvider::insert_subscription`]
#[derive(Clone, Default)]
pub struct MockPaymentProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subscription(&self, snapshot: SubscriptionSnapshot) {
        let mut state = self.state.lock().await;
        state.subscriptions.insert(snapshot.id.clone(), snapshot);
    }

    /// Checkout sessions created so far, in order
    pub async fn checkout_sessions(&self) -> Vec<CheckoutSessionParams> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn fail_checkout(&self, fail: bool) {
        self.state.lock().await.fail_checkout = fail;
    }

    pub async fn omit_checkout_url(&self, omit: bool) {
        self.state.lock().await.omit_checkout_url = omit;
    }

    pub async fn fail_subscription_lookup(&self, fail: bool) {
        self.state.lock().await.fail_lookup = fail;
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> BillingResult<HostedCheckout> {
        let mut state = self.state.lock().await;
        if state.fail_checkout {
            return Err(BillingError::StripeApi("card_declined".to_string()));
        }

        state.sessions.push(params);
        let session_id = format!("cs_test_{}", state.sessions.len());
        let url = (!state.omit_checkout_url)
            .then(|| format!("https://checkout.stripe.test/pay/{}", session_id));

        Ok(HostedCheckout { session_id, url })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot> {
        let state = self.state.lock().await;
        if state.fail_lookup {
            return Err(BillingError::StripeApi("api_connection_error".to_string()));
        }

        state
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such subscription: '{}'", subscription_id))
            })
    }
}

/// An active subscription on its first item price
pub fn active_subscription(
    subscription_id: &str,
    customer_id: &str,
    price_id: &str,
    current_period_end: i64,
) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        id: subscription_id.to_string(),
        customer_id: customer_id.to_string(),
        status: SubscriptionStatus::Active,
        price_id: Some(price_id.to_string()),
        current_period_end,
        cancel_at_period_end: false,
    }
}

/// `Stripe-Signature` header value for `payload` signed at `timestamp`
pub fn signature_header_at(
    secret: &str,
    payload: &str,
    timestamp: i64,
) -> BillingResult<String> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// `Stripe-Signature` header value for `payload` signed now
pub fn signature_header(secret: &str, payload: &str) -> BillingResult<String> {
    signature_header_at(secret, payload, time::OffsetDateTime::now_utc().unix_timestamp())
}
