//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use learnwell_assessments::AssessmentError;
use learnwell_billing::BillingError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    PaymentRequired(String),

    #[error("Billing is not available")]
    BillingUnavailable,

    #[error("{0}")]
    BadGateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "Validation error".to_string(),
                Some(msg),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found".to_string(), Some(msg)),
            ApiError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg, None),
            ApiError::BillingUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Billing is not available".to_string(),
                None,
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            ApiError::Database(msg) | ApiError::Internal(msg) => {
                // Details stay in the logs
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::WebhookSignatureInvalid => ApiError::Validation(e.to_string()),
            BillingError::InsufficientCredits { .. } => ApiError::PaymentRequired(e.to_string()),
            BillingError::CheckoutFailed | BillingError::SubscriptionLookupFailed => {
                ApiError::BadGateway(e.to_string())
            }
            BillingError::Config(msg) => {
                tracing::warn!(error = %msg, "Billing misconfigured");
                ApiError::BillingUnavailable
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AssessmentError> for ApiError {
    fn from(e: AssessmentError) -> Self {
        match e {
            AssessmentError::ToolNotFound(_) | AssessmentError::AssessmentNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            AssessmentError::ToolFailed { .. } => ApiError::BadGateway(e.to_string()),
            AssessmentError::InvalidInput(msg) => ApiError::Validation(msg),
            AssessmentError::Database(msg) => ApiError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (
                BillingError::InvalidInput("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::CheckoutFailed, StatusCode::BAD_GATEWAY),
            (
                BillingError::InsufficientCredits {
                    requested: 3,
                    available: 1,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::Database("pool timed out".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }

    #[test]
    fn test_unknown_tool_is_not_found() {
        let error = ApiError::from(AssessmentError::ToolNotFound(uuid::Uuid::nil()));
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }
}
