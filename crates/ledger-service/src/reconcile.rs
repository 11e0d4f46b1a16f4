//! Reconciliation of provider payment events into ledger state.
//!
//! Both webhook handlers funnel through this module so Stripe and
//! PayPal events produce identical ledger effects.

use std::collections::HashMap;

use chrono::Utc;

use ledger_core::{PaymentProvider, PricingPlan, Subscription, TransactionReason, WorkspaceId};
use ledger_store::AddBalanceFields;

use crate::error::ApiError;
use crate::state::AppState;

/// Classify a paid invoice into a ledger transaction reason.
///
/// Subscription invoices map by `billing_reason`; standalone invoices
/// are auto-recharge top-ups when tagged in metadata, add-on
/// purchases otherwise.
#[must_use]
pub fn classify_invoice_reason(
    billing_reason: Option<&str>,
    has_subscription: bool,
    metadata: &HashMap<String, String>,
) -> TransactionReason {
    if has_subscription {
        match billing_reason {
            Some("subscription_create") => TransactionReason::SubscriptionCreate,
            Some("subscription_cycle") => TransactionReason::SubscriptionCycle,
            Some("subscription_update") => TransactionReason::SubscriptionUpdate,
            _ => TransactionReason::Subscribe,
        }
    } else if metadata.contains_key("auto_recharge") {
        TransactionReason::AutoRecharge
    } else {
        TransactionReason::Addon
    }
}

/// Fields describing a provider payment to reconcile.
#[derive(Debug)]
pub struct PaymentEvent {
    /// External account uid the payment belongs to.
    pub uid: String,
    /// Credits to grant.
    pub amount: i64,
    /// Provider invoice or sale id; the idempotency key.
    pub invoice_id: String,
    /// The provider that charged.
    pub payment_provider: PaymentProvider,
    /// Money charged in cents.
    pub charged_amount: i64,
    /// Ledger reason.
    pub reason: TransactionReason,
    /// Plan override for subscription payments.
    pub plan: Option<i32>,
}

/// Apply a provider payment: grant credits, flip `is_paying`, and send
/// the monthly spending notification when its threshold is crossed.
pub async fn add_balance_for_payment(
    state: &AppState,
    event: PaymentEvent,
) -> Result<(), ApiError> {
    let workspace = state.store.get_or_create_workspace(&event.uid).await?;

    state
        .store
        .add_balance(
            workspace.id,
            event.amount,
            &event.invoice_id,
            event.reason,
            AddBalanceFields {
                user_id: Some(event.uid.clone()),
                payment_provider: Some(event.payment_provider),
                charged_amount: Some(event.charged_amount),
                plan: event.plan,
            },
        )
        .await?;

    if !workspace.is_paying {
        state.store.mark_paying(workspace.id).await?;
    }

    maybe_send_spending_notification(state, &event.uid, workspace.id).await?;

    Ok(())
}

async fn maybe_send_spending_notification(
    state: &AppState,
    uid: &str,
    workspace_id: WorkspaceId,
) -> Result<(), ApiError> {
    let Some(subscription) = state.store.get_subscription(workspace_id).await? else {
        return Ok(());
    };

    let now = Utc::now();
    let spent = state.store.get_dollars_spent_this_month(workspace_id).await?;
    if !subscription.should_send_monthly_spending_notification(spent, now) {
        return Ok(());
    }

    state
        .store
        .set_spending_notification_sent_at(subscription.id, now)
        .await?;

    if let Some(mailer) = &state.mailer {
        let mailer = mailer.clone();
        let to = uid.to_string();
        tokio::spawn(async move {
            mailer.send_monthly_spending_threshold_reached(&to, spent).await;
        });
    }

    Ok(())
}

/// Send the low-balance warning to a paying workspace, at most once
/// per top-up cycle.
///
/// Resend gates: never sent, sent longer than the configured window
/// ago, or a top-up landed after the last send (a fresh top-up re-arms
/// the warning).
pub async fn maybe_send_low_balance_email(state: &AppState, workspace_id: WorkspaceId) {
    let config = &state.config;
    if !config.low_balance_email_enabled {
        return;
    }
    let Some(mailer) = &state.mailer else {
        return;
    };
    let Ok(Some(workspace)) = state.store.get_workspace(workspace_id).await else {
        return;
    };
    if !workspace.is_paying || workspace.balance >= config.low_balance_email_credits {
        return;
    }

    let now = Utc::now();
    let window = chrono::Duration::days(config.low_balance_email_days);
    let last_positive = state
        .store
        .last_positive_transaction_at(workspace_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(now - window - chrono::Duration::days(1));

    let due = match workspace.low_balance_email_sent_at {
        None => true,
        Some(sent_at) => sent_at < now - window || last_positive > sent_at,
    };
    if !due {
        return;
    }

    let consumed = state
        .store
        .credits_consumed_since(workspace_id, now - window)
        .await
        .unwrap_or(0);

    if let Err(e) = state
        .store
        .set_low_balance_email_sent_at(workspace_id, now)
        .await
    {
        tracing::error!(%workspace_id, error = %e, "Failed to record low-balance email send");
        return;
    }

    let mailer = mailer.clone();
    let to = workspace.uid.clone();
    let balance = workspace.balance;
    tokio::spawn(async move {
        mailer.send_low_balance(&to, balance, consumed).await;
    });
}

/// Install or update the workspace subscription for an active
/// provider subscription, cancelling any displaced stale subscription
/// on its provider.
pub async fn set_workspace_subscription(
    state: &AppState,
    uid: &str,
    plan: PricingPlan,
    provider: PaymentProvider,
    external_id: &str,
) -> Result<Subscription, ApiError> {
    let workspace = state.store.get_or_create_workspace(uid).await?;

    let write = state
        .store
        .set_workspace_subscription(workspace.id, plan, provider, external_id)
        .await?;

    if let Some(stale) = write.replaced {
        tracing::error!(
            uid,
            stale_external_id = ?stale.external_id,
            new_external_id = external_id,
            "Displacing stale subscription; cancelling it provider-side"
        );
        cancel_provider_subscription(state, &stale).await;
    }

    Ok(write.subscription)
}

/// Detach the workspace subscription for a provider cancellation
/// event. Stale cancellations (an id that is no longer installed) are
/// ignored.
pub async fn detach_workspace_subscription(
    state: &AppState,
    uid: &str,
    provider: PaymentProvider,
    external_id: &str,
) -> Result<(), ApiError> {
    let workspace = state.store.get_or_create_workspace(uid).await?;

    let detached = state
        .store
        .detach_subscription(workspace.id, provider, external_id)
        .await?;

    if detached {
        tracing::info!(uid, external_id, "Subscription detached");
    } else {
        tracing::info!(uid, external_id, "Ignoring stale cancellation event");
    }

    Ok(())
}

/// Best-effort provider-side cancellation of a displaced
/// subscription. Failure is logged; local state already moved on and
/// a retry would come from the provider dashboard.
pub async fn cancel_provider_subscription(state: &AppState, subscription: &Subscription) {
    let Some(external_id) = subscription.external_id.as_deref() else {
        return;
    };

    let result = match subscription.payment_provider {
        Some(PaymentProvider::Stripe) => match &state.stripe {
            Some(stripe) => stripe
                .cancel_subscription(external_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            None => Err("Stripe not configured".to_string()),
        },
        Some(PaymentProvider::Paypal) => match &state.paypal {
            Some(paypal) => paypal
                .cancel_subscription(external_id, "Replaced by a newer subscription")
                .await
                .map_err(|e| e.to_string()),
            None => Err("PayPal not configured".to_string()),
        },
        None => return,
    };

    if let Err(error) = result {
        tracing::error!(
            external_id,
            error,
            "Failed to cancel stale subscription provider-side"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn subscription_invoices_map_by_billing_reason() {
        let empty = HashMap::new();
        assert_eq!(
            classify_invoice_reason(Some("subscription_create"), true, &empty),
            TransactionReason::SubscriptionCreate
        );
        assert_eq!(
            classify_invoice_reason(Some("subscription_cycle"), true, &empty),
            TransactionReason::SubscriptionCycle
        );
        assert_eq!(
            classify_invoice_reason(Some("subscription_update"), true, &empty),
            TransactionReason::SubscriptionUpdate
        );
        assert_eq!(
            classify_invoice_reason(Some("manual"), true, &empty),
            TransactionReason::Subscribe
        );
    }

    #[test]
    fn standalone_invoice_with_marker_is_auto_recharge() {
        assert_eq!(
            classify_invoice_reason(Some("manual"), false, &meta(&[("auto_recharge", "true")])),
            TransactionReason::AutoRecharge
        );
    }

    #[test]
    fn standalone_invoice_without_marker_is_addon() {
        assert_eq!(
            classify_invoice_reason(Some("manual"), false, &HashMap::new()),
            TransactionReason::Addon
        );
        assert_eq!(
            classify_invoice_reason(None, false, &HashMap::new()),
            TransactionReason::Addon
        );
    }

    #[test]
    fn billing_reason_is_ignored_without_a_subscription() {
        assert_eq!(
            classify_invoice_reason(Some("subscription_cycle"), false, &HashMap::new()),
            TransactionReason::Addon
        );
    }
}
