//! Stripe API integration.
//!
//! Covers customers, subscriptions and the invoice flow used by
//! one-off top-ups and auto-recharge.

mod client;
mod types;

pub use client::{StripeClient, StripeError};
pub use types::{
    Customer, Invoice, InvoiceLine, InvoiceSettings, Product, StripeList, StripeSubscription,
    SubscriptionItem,
};
