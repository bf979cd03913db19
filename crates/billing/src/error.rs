//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    /// Fixed, user-facing message; the provider error is logged where it happens
    #[error("Failed to create checkout session")]
    CheckoutFailed,

    /// Fixed, user-facing message; the provider error is logged where it happens
    #[error("Failed to retrieve subscription")]
    SubscriptionLookupFailed,

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the caller supplied something unusable (as opposed to an infrastructure failure)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::WebhookSignatureInvalid
                | BillingError::InvalidInput(_)
                | BillingError::InsufficientCredits { .. }
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        BillingError::Internal(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_provider_messages_hide_details() {
        assert_eq!(
            BillingError::CheckoutFailed.to_string(),
            "Failed to create checkout session"
        );
        assert_eq!(
            BillingError::SubscriptionLookupFailed.to_string(),
            "Failed to retrieve subscription"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(BillingError::WebhookSignatureInvalid.is_client_error());
        assert!(BillingError::InsufficientCredits {
            requested: 5,
            available: 1
        }
        .is_client_error());
        assert!(!BillingError::Database("down".into()).is_client_error());
        assert!(!BillingError::CheckoutFailed.is_client_error());
    }
}
