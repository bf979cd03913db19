//! Hosted checkout session creation
//!
//! Checkout only starts a payment; nothing is granted until the completion
//! webhook arrives.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{BillingError, BillingResult};
use crate::plans::CreditPackages;
use crate::provider::{CheckoutMode, CheckoutSessionParams, HostedCheckout, PaymentProvider};

/// Metadata key carrying the number of credits a payment-mode session grants
pub const CREDIT_AMOUNT_METADATA_KEY: &str = "creditAmount";

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditCheckoutRequest {
    pub customer_id: String,
    pub price_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
    pub success_url: String,
    pub cancel_url: String,
}

fn default_quantity() -> u64 {
    1
}

#[derive(Clone)]
pub struct CheckoutService {
    provider: Arc<dyn PaymentProvider>,
    credit_packages: CreditPackages,
}

impl CheckoutService {
    pub fn new(provider: Arc<dyn PaymentProvider>, credit_packages: CreditPackages) -> Self {
        Self {
            provider,
            credit_packages,
        }
    }

    /// Start a subscription checkout and return the hosted redirect URL
    pub async fn create_subscription_checkout(
        &self,
        request: SubscriptionCheckoutRequest,
    ) -> BillingResult<String> {
        let params = CheckoutSessionParams {
            mode: CheckoutMode::Subscription,
            customer_id: request.customer_id,
            price_id: request.price_id,
            quantity: 1,
            success_url: request.success_url,
            cancel_url: request.cancel_url,
            trial_days: request.trial_days,
            metadata: HashMap::new(),
        };

        self.create_session(params).await
    }

    /// Start a one-off credit package checkout and return the hosted redirect URL
    pub async fn create_credit_checkout(
        &self,
        request: CreditCheckoutRequest,
    ) -> BillingResult<String> {
        if request.quantity == 0 {
            return Err(BillingError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let package = self.credit_packages.find(&request.price_id).ok_or_else(|| {
            BillingError::InvalidInput(format!(
                "Unknown credit package price: {}",
                request.price_id
            ))
        })?;

        let quantity = i64::try_from(request.quantity)
            .map_err(|_| BillingError::InvalidInput("quantity out of range".to_string()))?;
        let credit_amount = package.credits.checked_mul(quantity).ok_or_else(|| {
            BillingError::InvalidInput("quantity out of range".to_string())
        })?;

        let mut metadata = HashMap::new();
        metadata.insert(
            CREDIT_AMOUNT_METADATA_KEY.to_string(),
            credit_amount.to_string(),
        );

        let params = CheckoutSessionParams {
            mode: CheckoutMode::Payment,
            customer_id: request.customer_id,
            price_id: request.price_id,
            quantity: request.quantity,
            success_url: request.success_url,
            cancel_url: request.cancel_url,
            trial_days: None,
            metadata,
        };

        self.create_session(params).await
    }

    async fn create_session(&self, params: CheckoutSessionParams) -> BillingResult<String> {
        let mode = params.mode;
        let customer_id = params.customer_id.clone();

        let session = self
            .provider
            .create_checkout_session(params)
            .await
            .map_err(|e| {
                tracing::error!(
                    customer_id = %customer_id,
                    mode = mode.as_str(),
                    error = %e,
                    "Failed to create checkout session"
                );
                BillingError::CheckoutFailed
            })?;

        match session {
            HostedCheckout {
                url: Some(url),
                session_id,
            } => {
                tracing::info!(
                    customer_id = %customer_id,
                    session_id = %session_id,
                    mode = mode.as_str(),
                    "Created checkout session"
                );
                Ok(url)
            }
            HostedCheckout {
                url: None,
                session_id,
            } => {
                tracing::error!(
                    customer_id = %customer_id,
                    session_id = %session_id,
                    "Checkout session has no redirect URL"
                );
                Err(BillingError::CheckoutFailed)
            }
        }
    }
}
