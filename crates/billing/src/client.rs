//! Stripe client and configuration

use std::collections::HashMap;

use async_trait::async_trait;
use learnwell_shared::SubscriptionStatus;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId, Subscription, SubscriptionId,
    SubscriptionStatus as StripeSubStatus,
};

use crate::error::{BillingError, BillingResult};
use crate::plans::PriceIds;
use crate::provider::{
    CheckoutMode, CheckoutSessionParams, HostedCheckout, PaymentProvider, SubscriptionSnapshot,
};

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub prices: PriceIds,
    /// Claim provider event ids before processing so redelivered events are skipped
    pub dedupe_webhooks: bool,
}

impl StripeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        if secret_key.trim().is_empty() {
            return Err(BillingError::Config(
                "STRIPE_SECRET_KEY is empty".to_string(),
            ));
        }
        if webhook_secret.trim().is_empty() {
            return Err(BillingError::Config(
                "STRIPE_WEBHOOK_SECRET is empty".to_string(),
            ));
        }

        let dedupe_webhooks = std::env::var("BILLING_DEDUPE_WEBHOOKS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        Ok(Self {
            secret_key,
            webhook_secret,
            prices: PriceIds::from_env(),
            dedupe_webhooks,
        })
    }

    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_") || self.secret_key.starts_with("rk_test_")
    }
}

// Keys stay out of debug output
impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("test_mode", &self.is_test_mode())
            .field("prices", &self.prices)
            .field("dedupe_webhooks", &self.dedupe_webhooks)
            .finish_non_exhaustive()
    }
}

/// Thin wrapper over the async-stripe client
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            inner: stripe::Client::new(config.secret_key),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }
}

fn map_status(status: &StripeSubStatus) -> SubscriptionStatus {
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::PastDue => SubscriptionStatus::PastDue,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Unpaid => SubscriptionStatus::Unpaid,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::Incomplete => SubscriptionStatus::Incomplete,
        StripeSubStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        StripeSubStatus::Paused => SubscriptionStatus::Paused,
    }
}

fn snapshot_from_stripe(subscription: &Subscription) -> SubscriptionSnapshot {
    let customer_id = match &subscription.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    };

    let price_id = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|p| p.id.to_string());

    SubscriptionSnapshot {
        id: subscription.id.to_string(),
        customer_id,
        status: map_status(&subscription.status),
        price_id,
        current_period_end: subscription.current_period_end,
        cancel_at_period_end: subscription.cancel_at_period_end,
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> BillingResult<HostedCheckout> {
        let customer_id = params
            .customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;

        let mode = match params.mode {
            CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
            CheckoutMode::Payment => CheckoutSessionMode::Payment,
        };

        let line_items = vec![CreateCheckoutSessionLineItems {
            price: Some(params.price_id.clone()),
            quantity: Some(params.quantity),
            ..Default::default()
        }];

        let subscription_data = match (params.mode, params.trial_days) {
            (CheckoutMode::Subscription, Some(days)) if days > 0 => {
                Some(CreateCheckoutSessionSubscriptionData {
                    trial_period_days: Some(days),
                    ..Default::default()
                })
            }
            _ => None,
        };

        let metadata: HashMap<String, String> = params.metadata.clone();

        let create = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(mode),
            line_items: Some(line_items),
            success_url: Some(&params.success_url),
            cancel_url: Some(&params.cancel_url),
            subscription_data,
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.inner, create).await?;

        Ok(HostedCheckout {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSnapshot> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))?;

        let subscription = Subscription::retrieve(&self.inner, &sub_id, &[]).await?;

        Ok(snapshot_from_stripe(&subscription))
    }
}
