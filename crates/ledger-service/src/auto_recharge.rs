//! Auto-recharge: top up a workspace when its balance drops below the
//! configured threshold.
//!
//! The controller only creates and pays the provider invoice. It
//! never credits the ledger itself; the `invoice.paid` webhook does
//! that, so a missed webhook can be replayed without double-granting.

use std::sync::Arc;

use chrono::Utc;

use ledger_core::{PaymentProvider, Workspace, WorkspaceId, ADDON_CREDITS_PER_DOLLAR};

use crate::state::AppState;
use crate::stripe::{Invoice, StripeClient};

/// How one auto-recharge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RechargeOutcome {
    /// An open invoice was paid (or a payment was submitted).
    Charged,
    /// Topping up would exceed the monthly spending budget.
    BudgetReached {
        /// Configured budget in dollars.
        budget: i64,
        /// Dollars spent so far this month, in cents precision.
        spending_cents: i64,
    },
    /// A recent top-up invoice was already paid; wait out the
    /// cooldown.
    Cooldown,
    /// The subscription has no default payment method to charge.
    NoPaymentMethod,
    /// Nothing to do: recharge not needed, lock contended, or
    /// unsupported provider.
    Skipped,
    /// The provider rejected invoice creation or payment.
    PaymentFailed(String),
}

/// Run one auto-recharge attempt for a workspace.
///
/// Serialized per workspace with a Postgres advisory lock so
/// concurrent deduct paths and the background sweep cannot double
/// charge.
pub async fn run_auto_recharge(state: &AppState, workspace_id: WorkspaceId) -> RechargeOutcome {
    let lock = match state.store.try_advisory_lock(workspace_id.lock_key()).await {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            tracing::info!(%workspace_id, "Auto-recharge already in progress, skipping");
            return RechargeOutcome::Skipped;
        }
        Err(e) => return RechargeOutcome::PaymentFailed(e.to_string()),
    };

    let outcome = attempt_recharge(state, workspace_id).await;

    if let Err(e) = lock.release().await {
        tracing::warn!(%workspace_id, error = %e, "Failed to release auto-recharge lock cleanly");
    }

    if let RechargeOutcome::PaymentFailed(reason) = &outcome {
        tracing::error!(%workspace_id, reason, "Auto-recharge failed");
        send_failure_email(state, workspace_id, "the payment failed").await;
    }

    outcome
}

async fn attempt_recharge(state: &AppState, workspace_id: WorkspaceId) -> RechargeOutcome {
    // Re-check under the lock; another attempt may have topped up
    // while we waited.
    let workspace = match state.store.get_workspace(workspace_id).await {
        Ok(Some(ws)) => ws,
        Ok(None) => return RechargeOutcome::Skipped,
        Err(e) => return RechargeOutcome::PaymentFailed(e.to_string()),
    };
    let subscription = match state.store.get_subscription(workspace_id).await {
        Ok(sub) => sub,
        Err(e) => return RechargeOutcome::PaymentFailed(e.to_string()),
    };

    if !workspace.should_attempt_auto_recharge(subscription.as_ref()) {
        tracing::info!(%workspace_id, "Workspace does not need auto-recharge");
        return RechargeOutcome::Skipped;
    }
    let Some(subscription) = subscription else {
        return RechargeOutcome::Skipped;
    };

    // Top-ups are only billable through Stripe.
    if subscription.payment_provider != Some(PaymentProvider::Stripe) {
        tracing::info!(
            %workspace_id,
            provider = ?subscription.payment_provider,
            "Auto-recharge is only supported with Stripe, skipping"
        );
        return RechargeOutcome::Skipped;
    }

    let Some(topup_dollars) = subscription.auto_recharge_topup_amount else {
        return RechargeOutcome::PaymentFailed("top-up amount is not set".into());
    };

    // Budget gate.
    let spent = match state.store.get_dollars_spent_this_month(workspace_id).await {
        Ok(spent) => spent,
        Err(e) => return RechargeOutcome::PaymentFailed(e.to_string()),
    };
    if let Some(budget) = subscription.monthly_spending_budget {
        if budget_reached(spent, topup_dollars, budget) {
            handle_budget_reached(state, &workspace, subscription.id).await;
            #[allow(clippy::cast_possible_truncation)]
            return RechargeOutcome::BudgetReached {
                budget,
                spending_cents: (spent * 100.0).round() as i64,
            };
        }
    }

    let Some(stripe) = state.stripe.clone() else {
        return RechargeOutcome::PaymentFailed("Stripe is not configured".into());
    };
    let Some(customer_id) = workspace.stripe_customer_id.clone() else {
        return RechargeOutcome::PaymentFailed("workspace has no Stripe customer".into());
    };

    let Some(product_id) = state.config.stripe_addon_product_id.clone() else {
        return RechargeOutcome::PaymentFailed(
            "Stripe add-on product id is not configured".into(),
        );
    };
    let invoice = match get_or_create_auto_invoice(
        &stripe,
        &customer_id,
        topup_dollars,
        &product_id,
        state.config.auto_recharge_cooldown_seconds,
    )
    .await
    {
        Ok(invoice) => invoice,
        Err(e) => return RechargeOutcome::PaymentFailed(e.to_string()),
    };

    match invoice.status.as_deref() {
        // A paid invoice inside the cooldown window means we already
        // topped up; the webhook settles the credits.
        Some("paid") => {
            tracing::info!(%workspace_id, invoice_id = %invoice.id, "Recent top-up already paid");
            RechargeOutcome::Cooldown
        }
        Some("open") => {
            let pm = match default_payment_method(&stripe, &subscription.external_id).await {
                Ok(pm) => pm,
                Err(e) => return RechargeOutcome::PaymentFailed(e),
            };
            let Some(pm) = pm else {
                tracing::warn!(%workspace_id, "No default payment method for auto-recharge");
                return RechargeOutcome::NoPaymentMethod;
            };

            match stripe.pay_invoice(&invoice.id, Some(&pm)).await {
                Ok(paid) => {
                    tracing::info!(
                        %workspace_id,
                        invoice_id = %paid.id,
                        "Auto-recharge payment submitted"
                    );
                    RechargeOutcome::Charged
                }
                Err(e) => RechargeOutcome::PaymentFailed(e.to_string()),
            }
        }
        other => RechargeOutcome::PaymentFailed(format!(
            "unexpected invoice status {other:?} for invoice {}",
            invoice.id
        )),
    }
}

/// Fetch the relevant auto-recharge invoice, or create one.
///
/// Fallback order: an open tagged invoice, a tagged invoice paid
/// within the cooldown window, then a freshly created one.
pub async fn get_or_create_auto_invoice(
    stripe: &StripeClient,
    customer_id: &str,
    amount_dollars: i64,
    product_id: &str,
    cooldown_seconds: i64,
) -> Result<Invoice, crate::stripe::StripeError> {
    let invoices = stripe.list_invoices(customer_id).await?;
    let tagged: Vec<Invoice> = invoices
        .data
        .into_iter()
        .filter(|inv| inv.metadata.contains_key("auto_recharge"))
        .collect();

    let now = Utc::now().timestamp();

    let mut open = None;
    let mut recently_paid = None;
    for inv in tagged {
        match inv.status.as_deref() {
            Some("open") if open.is_none() => open = Some(inv),
            Some("paid") if recently_paid.is_none() => {
                let paid_at = inv
                    .status_transitions
                    .as_ref()
                    .and_then(|t| t.paid_at)
                    .unwrap_or(0);
                if now - paid_at < cooldown_seconds {
                    recently_paid = Some(inv);
                }
            }
            _ => {}
        }
    }
    if let Some(inv) = open {
        return Ok(inv);
    }
    if let Some(inv) = recently_paid {
        return Ok(inv);
    }

    let invoice = stripe.create_invoice(customer_id, "auto_recharge").await?;
    #[allow(clippy::cast_precision_loss)]
    stripe
        .create_invoice_item(
            customer_id,
            &invoice.id,
            product_id,
            // Price per credit in cents.
            100.0 / ADDON_CREDITS_PER_DOLLAR as f64,
            amount_dollars * ADDON_CREDITS_PER_DOLLAR,
            "auto_recharge",
        )
        .await?;
    stripe.finalize_invoice(&invoice.id).await
}

/// The payment method auto-recharge charges: the subscription's
/// default, falling back to the customer default used on invoices.
async fn default_payment_method(
    stripe: &Arc<StripeClient>,
    subscription_external_id: &Option<String>,
) -> Result<Option<String>, String> {
    let Some(sub_id) = subscription_external_id.as_deref() else {
        return Ok(None);
    };
    let sub = stripe
        .retrieve_subscription(sub_id)
        .await
        .map_err(|e| e.to_string())?;
    if sub.default_payment_method.is_some() {
        return Ok(sub.default_payment_method);
    }

    let customer = stripe
        .get_customer(&sub.customer)
        .await
        .map_err(|e| e.to_string())?;
    Ok(customer
        .and_then(|c| c.invoice_settings)
        .and_then(|s| s.default_payment_method))
}

async fn handle_budget_reached(state: &AppState, workspace: &Workspace, subscription_id: i64) {
    tracing::info!(
        workspace_id = %workspace.id,
        "Monthly spending budget reached, auto-recharge paused"
    );

    let Ok(Some(subscription)) = state.store.get_subscription(workspace.id).await else {
        return;
    };
    let now = Utc::now();
    if !subscription.should_send_budget_email(now) {
        return;
    }
    if state
        .store
        .set_budget_email_sent_at(subscription_id, now)
        .await
        .is_err()
    {
        return;
    }

    if let Some(mailer) = &state.mailer {
        let mailer = mailer.clone();
        let to = workspace.uid.clone();
        let budget = subscription.monthly_spending_budget.unwrap_or_default();
        let spent = state
            .store
            .get_dollars_spent_this_month(workspace.id)
            .await
            .unwrap_or_default();
        tokio::spawn(async move {
            mailer.send_monthly_budget_reached(&to, budget, spent).await;
        });
    }
}

async fn send_failure_email(state: &AppState, workspace_id: WorkspaceId, reason: &str) {
    let Some(mailer) = &state.mailer else { return };
    let Ok(Some(workspace)) = state.store.get_workspace(workspace_id).await else {
        return;
    };
    let mailer = mailer.clone();
    let to = workspace.uid;
    let reason = reason.to_string();
    tokio::spawn(async move {
        mailer.send_auto_recharge_failed(&to, &reason).await;
    });
}

/// Background sweep over all workspaces below their threshold. Each
/// workspace is attempted independently; one failure never stops the
/// sweep.
pub async fn auto_recharge_sweep(state: &AppState) {
    let candidates = match state.store.list_auto_recharge_candidates().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list auto-recharge candidates");
            return;
        }
    };

    tracing::info!(count = candidates.len(), "Running auto-recharge sweep");
    for workspace_id in candidates {
        let outcome = run_auto_recharge(state, workspace_id).await;
        tracing::info!(%workspace_id, ?outcome, "Auto-recharge sweep outcome");
    }
}

/// Spawn the periodic sweep task, if enabled.
pub fn spawn_sweep_task(state: AppState) {
    let interval_secs = state.config.auto_recharge_sweep_seconds;
    if interval_secs == 0 {
        tracing::info!("Auto-recharge sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            auto_recharge_sweep(&state).await;
        }
    });
}

/// Whether topping up would push this month's spending past the
/// budget.
#[allow(clippy::cast_precision_loss)]
fn budget_reached(spent_dollars: f64, topup_dollars: i64, budget_dollars: i64) -> bool {
    spent_dollars + topup_dollars as f64 > budget_dollars as f64
}
