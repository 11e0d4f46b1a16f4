//! Stripe API client implementation.

use reqwest::Client;
use std::time::Duration;

use super::types::{
    Customer, Invoice, Product, StripeErrorResponse, StripeList, StripeSubscription,
};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StripeClient {
    /// Stripe API base URL.
    const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: Self::BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Override the API base URL (used by tests against a mock server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get a customer by id, or `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, StripeError> {
        let response = self
            .client
            .get(format!("{}/customers/{}", self.base_url, customer_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Retrieve a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .get(format!(
                "{}/subscriptions/{}",
                self.base_url, subscription_id
            ))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a subscription immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .delete(format!(
                "{}/subscriptions/{}",
                self.base_url, subscription_id
            ))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Set a subscription's default payment method.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn set_subscription_default_payment_method(
        &self,
        subscription_id: &str,
        payment_method: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .post(format!(
                "{}/subscriptions/{}",
                self.base_url, subscription_id
            ))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[("default_payment_method", payment_method)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Set a customer's default payment method for invoices.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn set_customer_default_payment_method(
        &self,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<Customer, StripeError> {
        let response = self
            .client
            .post(format!("{}/customers/{}", self.base_url, customer_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[(
                "invoice_settings[default_payment_method]",
                payment_method,
            )])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a product (used to map subscriptions to plans).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn retrieve_product(&self, product_id: &str) -> Result<Product, StripeError> {
        let response = self
            .client
            .get(format!("{}/products/{}", self.base_url, product_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a setup intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<serde_json::Value, StripeError> {
        let response = self
            .client
            .get(format!("{}/setup_intents/{}", self.base_url, setup_intent_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List a customer's automatically collected invoices.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn list_invoices(
        &self,
        customer_id: &str,
    ) -> Result<StripeList<Invoice>, StripeError> {
        let response = self
            .client
            .get(format!("{}/invoices", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[
                ("customer", customer_id),
                ("collection_method", "charge_automatically"),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a draft invoice tagged with a metadata marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_invoice(
        &self,
        customer_id: &str,
        metadata_key: &str,
    ) -> Result<Invoice, StripeError> {
        let response = self
            .client
            .post(format!("{}/invoices", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[
                ("customer".to_string(), customer_id.to_string()),
                (
                    "collection_method".to_string(),
                    "charge_automatically".to_string(),
                ),
                (format!("metadata[{metadata_key}]"), "true".to_string()),
                ("auto_advance".to_string(), "false".to_string()),
                (
                    "pending_invoice_items_behavior".to_string(),
                    "exclude".to_string(),
                ),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Add a credits line item to a draft invoice.
    ///
    /// `unit_amount_decimal` is the price per credit in cents;
    /// `quantity` is the number of credits.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_invoice_item(
        &self,
        customer_id: &str,
        invoice_id: &str,
        product_id: &str,
        unit_amount_decimal: f64,
        quantity: i64,
        metadata_key: &str,
    ) -> Result<serde_json::Value, StripeError> {
        let response = self
            .client
            .post(format!("{}/invoiceitems", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[
                ("customer".to_string(), customer_id.to_string()),
                ("invoice".to_string(), invoice_id.to_string()),
                ("price_data[currency]".to_string(), "usd".to_string()),
                ("price_data[product]".to_string(), product_id.to_string()),
                (
                    "price_data[unit_amount_decimal]".to_string(),
                    unit_amount_decimal.to_string(),
                ),
                ("quantity".to_string(), quantity.to_string()),
                ("currency".to_string(), "usd".to_string()),
                (format!("metadata[{metadata_key}]"), "true".to_string()),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Finalize a draft invoice so it becomes payable.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn finalize_invoice(&self, invoice_id: &str) -> Result<Invoice, StripeError> {
        let response = self
            .client
            .post(format!("{}/invoices/{}/finalize", self.base_url, invoice_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&[("auto_advance", "true")])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Pay an open invoice with a specific payment method.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the payment is
    /// declined.
    pub async fn pay_invoice(
        &self,
        invoice_id: &str,
        payment_method: Option<&str>,
    ) -> Result<Invoice, StripeError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(pm) = payment_method {
            params.push(("payment_method", pm.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/invoices/{}/pay", self.base_url, invoice_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;
        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_override_trims_trailing_slash() {
        let client = StripeClient::new("sk_test_xxx").with_base_url("http://localhost:9999/");
        assert_eq!(client.base_url, "http://localhost:9999");
    }
}
