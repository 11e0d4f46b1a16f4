//! HTTP API service for the credit ledger.
//!
//! This crate exposes the ledger over HTTP:
//!
//! - Balance, ledger history and usage deductions
//! - Auto-recharge configuration and the background sweep
//! - Stripe/PayPal webhooks that reconcile payments into the ledger
//!
//! # Authentication
//!
//! Internal callers authenticate with a shared service API key;
//! webhooks authenticate by provider signature only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod auth;
pub mod auto_recharge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod paypal;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod stripe;

pub use auto_recharge::RechargeOutcome;
pub use config::ServiceConfig;
pub use error::ApiError;
pub use notify::Mailer;
pub use paypal::{PaypalClient, PaypalError};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
