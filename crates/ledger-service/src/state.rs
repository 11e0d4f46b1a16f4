//! Application state.

use std::sync::Arc;

use ledger_store::LedgerStore;

use crate::config::ServiceConfig;
use crate::notify::Mailer;
use crate::paypal::PaypalClient;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: LedgerStore,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// PayPal client (optional).
    pub paypal: Option<Arc<PaypalClient>>,

    /// Notification mailer (optional).
    pub mailer: Option<Arc<Mailer>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: LedgerStore, config: ServiceConfig) -> Self {
        let stripe = config.stripe_api_key.as_ref().map(|key| {
            tracing::info!("Stripe integration enabled");
            Arc::new(StripeClient::new(key))
        });
        if stripe.is_none() {
            tracing::warn!("Stripe not configured - Stripe payments will not be available");
        }

        let paypal = config
            .paypal_client_id
            .as_ref()
            .zip(config.paypal_client_secret.as_ref())
            .map(|(id, secret)| {
                tracing::info!(base_url = %config.paypal_base_url, "PayPal integration enabled");
                Arc::new(PaypalClient::new(
                    &config.paypal_base_url,
                    id,
                    secret,
                    config.paypal_webhook_id.clone(),
                ))
            });
        if paypal.is_none() {
            tracing::warn!("PayPal not configured - PayPal payments will not be available");
        }

        let mailer = config.postmark_server_token.as_ref().map(|token| {
            tracing::info!("Postmark mailer enabled");
            Arc::new(Mailer::new(token, &config.email_from))
        });
        if mailer.is_none() {
            tracing::warn!("Postmark not configured - notification email disabled");
        }

        Self {
            store,
            config,
            stripe,
            paypal,
            mailer,
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }

    /// Check if PayPal is configured.
    #[must_use]
    pub fn has_paypal(&self) -> bool {
        self.paypal.is_some()
    }
}
