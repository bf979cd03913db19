//! HTTP routes

pub mod assessments;
pub mod billing;
pub mod health;

#[cfg(test)]
mod routes_tests;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let billing = Router::new()
        .route("/webhook", post(billing::stripe_webhook))
        .route(
            "/checkout/subscription",
            post(billing::create_subscription_checkout),
        )
        .route("/checkout/credits", post(billing::create_credit_checkout))
        .route("/users/{user_id}/credits", get(billing::get_credits))
        .route(
            "/users/{user_id}/subscription-events",
            get(billing::get_subscription_events),
        );

    let tenants = Router::new()
        .route(
            "/{tenant_id}/assessments/search",
            post(assessments::search_assessments),
        )
        .route(
            "/{tenant_id}/tools/{tool_id}/assessments/{assessment_id}/attempts",
            post(assessments::submit_attempt),
        );

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1/billing", billing)
        .nest("/api/v1/tenants", tenants)
        .with_state(state)
}
