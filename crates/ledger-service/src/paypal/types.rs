//! PayPal API types (the subset this service reads).

use serde::{Deserialize, Serialize};

/// OAuth token response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for subsequent calls.
    pub access_token: String,
    /// Seconds until expiry.
    #[serde(default)]
    pub expires_in: i64,
}

/// A monetary amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    /// ISO currency code.
    pub currency_code: String,
    /// Decimal string value, e.g. `"10.00"`.
    pub value: String,
}

/// A completed sale from a `PAYMENT.SALE.COMPLETED` event.
#[derive(Debug, Deserialize)]
pub struct Sale {
    /// Sale id; used as the ledger idempotency key.
    pub id: String,
    /// Subscription this sale belongs to, when it is a recurring
    /// payment.
    #[serde(default)]
    pub billing_agreement_id: Option<String>,
    /// Sale amount.
    pub amount: SaleAmount,
}

/// Sale amount as PayPal encodes it on sale objects.
#[derive(Debug, Deserialize)]
pub struct SaleAmount {
    /// Decimal string total, e.g. `"20.00"`.
    pub total: String,
    /// ISO currency code.
    pub currency: String,
}

/// A billing subscription.
#[derive(Debug, Deserialize)]
pub struct PaypalSubscription {
    /// Subscription id (`I-...`).
    pub id: String,
    /// Lifecycle status (`ACTIVE`, `CANCELLED`, ...).
    pub status: String,
    /// Workspace id we store when creating the subscription.
    #[serde(default)]
    pub custom_id: Option<String>,
    /// Plan id (`P-...`).
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Billing state, when expanded.
    #[serde(default)]
    pub billing_info: Option<BillingInfo>,
}

/// Subscription billing state.
#[derive(Debug, Deserialize)]
pub struct BillingInfo {
    /// Most recent successful payment.
    #[serde(default)]
    pub last_payment: Option<LastPayment>,
    /// Amount currently owed.
    #[serde(default)]
    pub outstanding_balance: Option<Amount>,
}

/// The last payment on a subscription.
#[derive(Debug, Deserialize)]
pub struct LastPayment {
    /// Payment amount.
    pub amount: Amount,
    /// RFC 3339 payment time.
    pub time: chrono::DateTime<chrono::Utc>,
}

/// Headers PayPal sends with each webhook, echoed back for
/// verification.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookHeaders {
    /// `paypal-auth-algo` header.
    pub auth_algo: String,
    /// `paypal-cert-url` header.
    pub cert_url: String,
    /// `paypal-transmission-id` header.
    pub transmission_id: String,
    /// `paypal-transmission-sig` header.
    pub transmission_sig: String,
    /// `paypal-transmission-time` header.
    pub transmission_time: String,
}

/// Body for the verify-webhook-signature endpoint.
#[derive(Debug, Serialize)]
pub struct VerifyWebhookRequest {
    /// `paypal-auth-algo` header value.
    pub auth_algo: String,
    /// `paypal-cert-url` header value.
    pub cert_url: String,
    /// `paypal-transmission-id` header value.
    pub transmission_id: String,
    /// `paypal-transmission-sig` header value.
    pub transmission_sig: String,
    /// `paypal-transmission-time` header value.
    pub transmission_time: String,
    /// Configured webhook id.
    pub webhook_id: String,
    /// The raw event, re-parsed as JSON.
    pub webhook_event: serde_json::Value,
}

/// Verification outcome envelope.
#[derive(Debug, Deserialize)]
pub struct VerifyWebhookResponse {
    /// `SUCCESS` or `FAILURE`.
    pub verification_status: String,
}
