//! Outbound notification email via Postmark.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

/// Postmark-backed mailer for billing notifications.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: Client,
    server_token: String,
    from_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
}

impl Mailer {
    const POSTMARK_URL: &'static str = "https://api.postmarkapp.com/email";

    /// Create a mailer.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub fn new(server_token: impl Into<String>, from_address: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            server_token: server_token.into(),
            from_address: from_address.into(),
        }
    }

    /// Send one email. Failures are logged, not propagated; billing
    /// state must never depend on email delivery.
    pub async fn send(&self, to: &str, subject: &str, html_body: &str) {
        let email = PostmarkEmail {
            from: &self.from_address,
            to,
            subject,
            html_body,
        };

        let result = self
            .client
            .post(Self::POSTMARK_URL)
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(&email)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(to, subject, "Notification email sent");
            }
            Ok(response) => {
                tracing::error!(
                    to,
                    subject,
                    status = %response.status(),
                    "Postmark rejected notification email"
                );
            }
            Err(e) => {
                tracing::error!(to, subject, error = %e, "Failed to send notification email");
            }
        }
    }

    /// Auto-recharge failure notice.
    pub async fn send_auto_recharge_failed(&self, to: &str, reason: &str) {
        let body = format!(
            "<p>Your account could not be auto-recharged because {reason}.</p>\
             <p>Please review your billing settings.</p>"
        );
        self.send(to, "[Gooey.AI] Auto-Recharge failed", &body).await;
    }

    /// Monthly spending budget reached; auto-recharge is paused for
    /// the rest of the month.
    pub async fn send_monthly_budget_reached(&self, to: &str, budget: i64, spending: f64) {
        let body = format!(
            "<p>Your workspace has reached its monthly recharge budget of ${budget}.</p>\
             <p>Spending so far this month: ${spending:.2}. Auto-recharge is paused until \
             next month.</p>"
        );
        self.send(to, "[Gooey.AI] Monthly Budget Reached", &body)
            .await;
    }

    /// Low balance warning for paying workspaces.
    pub async fn send_low_balance(&self, to: &str, balance: i64, credits_consumed: i64) {
        let body = format!(
            "<p>Your workspace balance is down to {balance} credits.</p>\
             <p>You have used {credits_consumed} credits over the last week. \
             Top up or enable auto-recharge to avoid interruptions.</p>"
        );
        self.send(to, "[Gooey.AI] Your credits are running low", &body)
            .await;
    }

    /// Monthly spending notification threshold crossed.
    pub async fn send_monthly_spending_threshold_reached(&self, to: &str, spending: f64) {
        let body = format!(
            "<p>Your workspace has spent ${spending:.2} this month, crossing your \
             notification threshold.</p>"
        );
        self.send(to, "[Gooey.AI] Monthly Spend Threshold Reached", &body)
            .await;
    }
}
