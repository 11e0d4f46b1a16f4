//! PayPal API client implementation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;

use super::types::{
    PaypalSubscription, TokenResponse, VerifyWebhookRequest, VerifyWebhookResponse, WebhookHeaders,
};

/// Error type for PayPal operations.
#[derive(Debug, thiserror::Error)]
pub enum PaypalError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// PayPal API returned an error.
    #[error("PayPal API error: {status} - {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw error body.
        body: String,
    },

    /// Webhook signature verification failed.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// PayPal API client with a cached OAuth bearer token.
pub struct PaypalClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalClient {
    /// Create a new PayPal client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        webhook_id: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_id,
            token: Mutex::new(None),
        }
    }

    /// Fetch or reuse a bearer token via the client-credentials grant.
    async fn access_token(&self) -> Result<String, PaypalError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() + chrono::Duration::seconds(60) {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let token: TokenResponse = Self::handle_response(response).await?;
        let access_token = token.access_token.clone();
        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    /// Retrieve a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or PayPal rejects it.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<PaypalSubscription, PaypalError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!(
                "{}/v1/billing/subscriptions/{}",
                self.base_url, subscription_id
            ))
            .bearer_auth(token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Cancel a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or PayPal rejects it.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        reason: &str,
    ) -> Result<(), PaypalError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v1/billing/subscriptions/{}/cancel",
                self.base_url, subscription_id
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PaypalError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Verify a webhook delivery against the configured webhook id.
    ///
    /// # Errors
    ///
    /// Returns [`PaypalError::InvalidSignature`] when PayPal reports
    /// verification failure, or a configuration error when no webhook
    /// id is set.
    pub async fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        event_body: &str,
    ) -> Result<(), PaypalError> {
        let webhook_id = self
            .webhook_id
            .as_ref()
            .ok_or_else(|| PaypalError::Configuration("Webhook id not configured".into()))?;

        let event: serde_json::Value = serde_json::from_str(event_body)
            .map_err(|_| PaypalError::InvalidSignature)?;

        let request = VerifyWebhookRequest {
            auth_algo: headers.auth_algo.clone(),
            cert_url: headers.cert_url.clone(),
            transmission_id: headers.transmission_id.clone(),
            transmission_sig: headers.transmission_sig.clone(),
            transmission_time: headers.transmission_time.clone(),
            webhook_id: webhook_id.clone(),
            webhook_event: event,
        };

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let outcome: VerifyWebhookResponse = Self::handle_response(response).await?;
        if outcome.verification_status == "SUCCESS" {
            Ok(())
        } else {
            Err(PaypalError::InvalidSignature)
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PaypalError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(PaypalError::Api {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
