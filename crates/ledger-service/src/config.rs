//! Service configuration.

use serde::Deserialize;
use std::path::Path;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe product id used on add-on credit line items.
    pub stripe_addon_product_id: Option<String>,

    /// PayPal API base URL (default: sandbox).
    pub paypal_base_url: String,

    /// PayPal OAuth client id (optional).
    pub paypal_client_id: Option<String>,

    /// PayPal OAuth client secret (optional).
    pub paypal_client_secret: Option<String>,

    /// PayPal webhook id used for signature verification (optional).
    pub paypal_webhook_id: Option<String>,

    /// Postmark server token for outbound email (optional).
    pub postmark_server_token: Option<String>,

    /// From address for notification email.
    pub email_from: String,

    /// Interval between auto-recharge sweeps, in seconds. Zero
    /// disables the background sweep.
    pub auto_recharge_sweep_seconds: u64,

    /// Cooldown after a paid top-up invoice before another may be
    /// created, in seconds.
    pub auto_recharge_cooldown_seconds: i64,

    /// Whether low-balance email is sent at all.
    pub low_balance_email_enabled: bool,

    /// Balance below which the low-balance email fires, in credits.
    pub low_balance_email_credits: i64,

    /// Days before the low-balance email may repeat for the same
    /// workspace.
    pub low_balance_email_days: i64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

/// PayPal secrets file structure.
#[derive(Debug, Deserialize)]
struct PaypalSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    webhook_id: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let paypal = load_paypal_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/ledger".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_addon_product_id: std::env::var("STRIPE_ADDON_CREDITS_PRODUCT_ID").ok(),
            paypal_base_url: paypal
                .as_ref()
                .and_then(|p| p.base_url.clone())
                .or_else(|| std::env::var("PAYPAL_BASE_URL").ok())
                .unwrap_or_else(|| "https://api-m.sandbox.paypal.com".into()),
            paypal_client_id: paypal
                .as_ref()
                .map(|p| p.client_id.clone())
                .or_else(|| std::env::var("PAYPAL_CLIENT_ID").ok()),
            paypal_client_secret: paypal
                .as_ref()
                .map(|p| p.client_secret.clone())
                .or_else(|| std::env::var("PAYPAL_CLIENT_SECRET").ok()),
            paypal_webhook_id: paypal
                .and_then(|p| p.webhook_id)
                .or_else(|| std::env::var("PAYPAL_WEBHOOK_ID").ok()),
            postmark_server_token: std::env::var("POSTMARK_SERVER_TOKEN").ok(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "billing@gooey.ai".into()),
            auto_recharge_sweep_seconds: std::env::var("AUTO_RECHARGE_SWEEP_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            auto_recharge_cooldown_seconds: std::env::var("AUTO_RECHARGE_COOLDOWN_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(24 * 60 * 60),
            low_balance_email_enabled: std::env::var("LOW_BALANCE_EMAIL_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            low_balance_email_credits: std::env::var("LOW_BALANCE_EMAIL_CREDITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            low_balance_email_days: std::env::var("LOW_BALANCE_EMAIL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024),
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "ledger/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load PayPal secrets from file, if present.
fn load_paypal_secrets() -> Option<PaypalSecrets> {
    let secret_paths = [
        ".secrets/paypal.json",
        "ledger/.secrets/paypal.json",
        "../.secrets/paypal.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaypalSecrets>(path) {
            tracing::info!(path = %path, "Loaded PayPal secrets from file");
            return Some(secrets);
        }
    }

    tracing::debug!("PayPal secrets file not found, using environment variables");
    None
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/ledger".into(),
            service_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_addon_product_id: None,
            paypal_base_url: "https://api-m.sandbox.paypal.com".into(),
            paypal_client_id: None,
            paypal_client_secret: None,
            paypal_webhook_id: None,
            postmark_server_token: None,
            email_from: "billing@gooey.ai".into(),
            auto_recharge_sweep_seconds: 300,
            auto_recharge_cooldown_seconds: 24 * 60 * 60,
            low_balance_email_enabled: true,
            low_balance_email_credits: 200,
            low_balance_email_days: 7,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
