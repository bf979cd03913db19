// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Learnwell Billing Module
//!
//! Stripe subscription billing reconciled into a per-user credit ledger.
//!
//! ## Features
//!
//! - **Checkout**: Hosted checkout sessions for subscriptions and credit packages
//! - **Webhooks**: Verified, idempotent handling of Stripe events
//! - **Subscription Record**: The user row mirrors the provider's subscription state
//! - **Credit Ledger**: Monthly allowances and one-off purchases, spent atomically

pub mod checkout;
pub mod client;
pub mod credits;
pub mod error;
pub mod events;
pub mod plans;
pub mod provider;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Checkout
pub use checkout::{
    CheckoutService, CreditCheckoutRequest, SubscriptionCheckoutRequest,
    CREDIT_AMOUNT_METADATA_KEY,
};

// Client
pub use client::{StripeClient, StripeConfig};

// Credits
pub use credits::CreditLedgerService;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{WebhookEvent, WebhookEventKind};

// Plans
pub use plans::{CreditPackage, CreditPackages, PlanPrices, PriceIds, SubscriptionPlans};

// Provider
pub use provider::{
    CheckoutMode, CheckoutSessionParams, HostedCheckout, PaymentProvider, SubscriptionSnapshot,
};

// Store
pub use store::{
    BillingStore, BillingUser, CreditLedger, CreditPurchase, InMemoryBillingStore,
    PgBillingStore, SubscriptionEvent, SubscriptionEventType, SubscriptionRecordUpdate,
    WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};

// Subscriptions
pub use subscriptions::SubscriptionService;

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome, WebhookReceipt};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub credits: CreditLedgerService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::with_stripe(config, pool))
    }

    /// Create a Stripe and Postgres backed service with explicit config
    pub fn with_stripe(config: StripeConfig, pool: PgPool) -> Self {
        let webhook_secret = config.webhook_secret.clone();
        let prices = config.prices.clone();
        let dedupe = config.dedupe_webhooks;

        tracing::info!(
            test_mode = config.is_test_mode(),
            dedupe_webhooks = dedupe,
            "Billing enabled"
        );

        Self::new(
            Arc::new(PgBillingStore::new(pool)),
            Arc::new(StripeClient::new(config)),
            webhook_secret,
            prices,
            dedupe,
        )
    }

    /// Create a billing service over explicit store and provider implementations
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn PaymentProvider>,
        webhook_secret: impl Into<String>,
        prices: PriceIds,
        dedupe_webhooks: bool,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(provider.clone(), prices.credit_packages),
            credits: CreditLedgerService::new(store.clone()),
            subscriptions: SubscriptionService::new(store.clone()),
            webhooks: WebhookHandler::new(store, provider, webhook_secret, prices.plans)
                .with_dedupe(dedupe_webhooks),
        }
    }
}
