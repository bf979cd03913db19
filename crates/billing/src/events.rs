//! Stripe webhook event payloads
//!
//! Events are decoded into narrow views of Stripe's objects rather than the
//! full `stripe::Event` tree. Unknown fields are ignored, so a newer Stripe API
//! version on the account doesn't break parsing.

use std::collections::HashMap;

use learnwell_shared::SubscriptionStatus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// A verified webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Event types the dispatcher routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutSessionCompleted,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Other,
}

impl WebhookEventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => WebhookEventKind::CheckoutSessionCompleted,
            "customer.subscription.updated" => WebhookEventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => WebhookEventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => WebhookEventKind::InvoicePaymentSucceeded,
            "invoice.payment_failed" => WebhookEventKind::InvoicePaymentFailed,
            _ => WebhookEventKind::Other,
        }
    }
}

impl WebhookEvent {
    pub fn kind(&self) -> WebhookEventKind {
        WebhookEventKind::from_type(&self.event_type)
    }

    pub fn subscription_object(&self) -> BillingResult<SubscriptionObject> {
        self.decode_object("Subscription")
    }

    pub fn invoice_object(&self) -> BillingResult<InvoiceObject> {
        self.decode_object("Invoice")
    }

    pub fn checkout_session_object(&self) -> BillingResult<CheckoutSessionObject> {
        self.decode_object("CheckoutSession")
    }

    fn decode_object<T: DeserializeOwned>(&self, expected: &str) -> BillingResult<T> {
        T::deserialize(&self.data.object).map_err(|e| {
            BillingError::WebhookEventNotSupported(format!("Expected {}: {}", expected, e))
        })
    }
}

/// A reference that Stripe sends either as a bare id or as the expanded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    pub fn id(&self) -> &str {
        match self {
            ExpandableId::Id(id) => id,
            ExpandableId::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<PriceRef>,
    /// Newer API versions moved the period onto the item
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: ExpandableId,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

impl SubscriptionObject {
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    pub fn period_end(&self) -> Option<OffsetDateTime> {
        self.current_period_end
            .or_else(|| {
                self.items
                    .data
                    .first()
                    .and_then(|item| item.current_period_end)
            })
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<ExpandableId>,
    #[serde(default)]
    pub subscription: Option<ExpandableId>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub attempt_count: i64,
    /// Newer API versions report the subscription here instead of top-level
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<ExpandableId>,
}

impl InvoiceObject {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(ExpandableId::id)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(ExpandableId::id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub mode: String,
    #[serde(default)]
    pub customer: Option<ExpandableId>,
    #[serde(default)]
    pub subscription: Option<ExpandableId>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl CheckoutSessionObject {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(ExpandableId::id)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(ExpandableId::id)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }
}
