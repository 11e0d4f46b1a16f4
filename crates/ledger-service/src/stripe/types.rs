//! Stripe API response types (the subset this service reads).

use serde::Deserialize;
use std::collections::HashMap;

/// A Stripe list envelope.
#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    /// The page of results.
    pub data: Vec<T>,
    /// Whether more results exist beyond this page.
    #[serde(default)]
    pub has_more: bool,
}

/// A Stripe customer.
#[derive(Debug, Deserialize)]
pub struct Customer {
    /// Customer id (`cus_...`).
    pub id: String,
    /// Email on file, if any.
    #[serde(default)]
    pub email: Option<String>,
    /// Invoice settings, carrying the default payment method.
    #[serde(default)]
    pub invoice_settings: Option<InvoiceSettings>,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Customer invoice settings.
#[derive(Debug, Deserialize)]
pub struct InvoiceSettings {
    /// Default payment method id (`pm_...`), if one is saved.
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

/// A Stripe subscription.
#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    /// Subscription id (`sub_...`).
    pub id: String,
    /// Lifecycle status (`active`, `canceled`, ...).
    pub status: String,
    /// Owning customer id.
    pub customer: String,
    /// Subscription-level default payment method, if set.
    #[serde(default)]
    pub default_payment_method: Option<String>,
    /// Line items; plan subscriptions carry exactly one.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One subscription line item.
#[derive(Debug, Deserialize)]
pub struct SubscriptionItem {
    /// Item id.
    pub id: String,
    /// The attached price.
    pub price: Price,
}

/// A Stripe price.
#[derive(Debug, Deserialize)]
pub struct Price {
    /// Price id.
    pub id: String,
    /// Product id this price belongs to.
    pub product: String,
}

/// A Stripe product.
#[derive(Debug, Deserialize)]
pub struct Product {
    /// Product id (`prod_...`).
    pub id: String,
    /// Display name; plans are matched on it.
    pub name: String,
}

/// A Stripe invoice.
#[derive(Debug, Deserialize)]
pub struct Invoice {
    /// Invoice id (`in_...`).
    pub id: String,
    /// Lifecycle status (`draft`, `open`, `paid`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Owning customer id.
    pub customer: String,
    /// Total in cents.
    #[serde(default)]
    pub amount_paid: i64,
    /// Reason the invoice exists (`subscription_create`,
    /// `subscription_cycle`, `subscription_update`, `manual`).
    #[serde(default)]
    pub billing_reason: Option<String>,
    /// Subscription that generated the invoice, if any.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Unix timestamp of payment, when paid.
    #[serde(default)]
    pub status_transitions: Option<InvoiceStatusTransitions>,
    /// Line items.
    #[serde(default)]
    pub lines: Option<StripeList<InvoiceLine>>,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Invoice status transition timestamps.
#[derive(Debug, Deserialize)]
pub struct InvoiceStatusTransitions {
    /// When the invoice was paid (unix seconds).
    #[serde(default)]
    pub paid_at: Option<i64>,
}

/// One invoice line item.
#[derive(Debug, Deserialize)]
pub struct InvoiceLine {
    /// Credits purchased on this line.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Line total in cents.
    pub amount: i64,
}

/// Stripe API error envelope.
#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    /// The error body.
    pub error: StripeErrorBody,
}

/// Stripe API error body.
#[derive(Debug, Deserialize)]
pub struct StripeErrorBody {
    /// Error type (`invalid_request_error`, `card_error`, ...).
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable code, if any.
    #[serde(default)]
    pub code: Option<String>,
}
