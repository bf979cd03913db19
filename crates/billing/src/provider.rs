//! Payment provider abstraction
//!
//! The reconciliation flow only needs two things from the provider: creating a
//! hosted checkout session and reading the live state of a subscription.
//! [`crate::client::StripeClient`] is the production implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use learnwell_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};

use crate::error::BillingResult;

/// Checkout session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// Recurring price, optional trial
    Subscription,
    /// One-off payment for a credit package
    Payment,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Subscription => "subscription",
            CheckoutMode::Payment => "payment",
        }
    }
}

/// Provider-agnostic checkout session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionParams {
    pub mode: CheckoutMode,
    pub customer_id: String,
    pub price_id: String,
    pub quantity: u64,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
    pub metadata: HashMap<String, String>,
}

/// A created hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedCheckout {
    pub session_id: String,
    /// Absent if the provider didn't return a redirect URL
    pub url: Option<String>,
}

/// Live subscription state as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    /// Price of the first subscription item
    pub price_id: Option<String>,
    /// Unix timestamp
    pub current_period_end: i64,
    pub cancel_at_period_end: bool,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> BillingResult<HostedCheckout>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot>;
}
