//! PayPal API integration.
//!
//! Subscription lookups, cancellation and webhook verification for
//! the PayPal billing flow.

mod client;
mod types;

pub use client::{PaypalClient, PaypalError};
pub use types::{
    Amount, BillingInfo, LastPayment, PaypalSubscription, Sale, VerifyWebhookRequest,
    WebhookHeaders,
};
