//! Billing routes: Stripe webhook, checkout, credit balance, subscription history

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use learnwell_billing::{
    CreditCheckoutRequest, CreditLedger, SubscriptionCheckoutRequest, SubscriptionEvent,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl WebhookAck {
    fn rejected() -> Json<Self> {
        Json(Self {
            received: false,
            event: None,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Stripe webhook endpoint.
///
/// A bad signature or unusable input is answered with 400; any other handler
/// failure is answered with 500 so Stripe redelivers the event.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<WebhookAck>)> {
    let billing = state.billing_service()?;

    let Some(signature) = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("Webhook request without Stripe-Signature header");
        return Ok((StatusCode::BAD_REQUEST, WebhookAck::rejected()));
    };

    match billing.webhooks.process(&body, signature).await {
        Ok(receipt) => {
            tracing::info!(
                event_id = %receipt.event_id,
                event_type = %receipt.event_type,
                outcome = ?receipt.outcome,
                "Webhook acknowledged"
            );
            Ok((
                StatusCode::OK,
                Json(WebhookAck {
                    received: true,
                    event: Some(receipt.event_type),
                }),
            ))
        }
        Err(e) if e.is_client_error() => {
            tracing::warn!(error = %e, "Webhook rejected");
            Ok((StatusCode::BAD_REQUEST, WebhookAck::rejected()))
        }
        Err(e) => {
            tracing::error!(error = %e, "Webhook processing failed");
            Ok((StatusCode::INTERNAL_SERVER_ERROR, WebhookAck::rejected()))
        }
    }
}

pub async fn create_subscription_checkout(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionCheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let billing = state.billing_service()?;
    let url = billing.checkout.create_subscription_checkout(req).await?;
    Ok(Json(CheckoutResponse { url }))
}

pub async fn create_credit_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreditCheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let billing = state.billing_service()?;
    let url = billing.checkout.create_credit_checkout(req).await?;
    Ok(Json(CheckoutResponse { url }))
}

pub async fn get_credits(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<CreditLedger>> {
    let billing = state.billing_service()?;
    Ok(Json(billing.credits.balance(user_id).await?))
}

/// Subscription audit log for a user, oldest first
pub async fn get_subscription_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubscriptionEvent>>> {
    let billing = state.billing_service()?;
    Ok(Json(billing.subscriptions.history(user_id).await?))
}
