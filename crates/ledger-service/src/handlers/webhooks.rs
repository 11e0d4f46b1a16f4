//! Webhook handlers for Stripe and PayPal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use ledger_core::{PaymentProvider, PricingPlan, TransactionReason};

use crate::crypto::verify_stripe_signature;
use crate::error::ApiError;
use crate::paypal::{PaypalClient, PaypalSubscription, Sale, WebhookHeaders};
use crate::reconcile::{
    add_balance_for_payment, classify_invoice_reason, detach_workspace_subscription,
    set_workspace_subscription, PaymentEvent,
};
use crate::state::AppState;
use crate::stripe::{Invoice, StripeClient, StripeSubscription};

/// Stripe webhook envelope.
#[derive(Debug, Deserialize)]
pub struct StripeWebhook {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event id.
    pub id: String,
    /// Event data.
    pub data: StripeEventData,
}

/// Stripe event data container.
#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    /// Event object.
    pub object: serde_json::Value,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;
        verify_stripe_signature(secret, &body, signature, Utc::now()).map_err(|e| {
            tracing::warn!(error = %e, "Invalid Stripe webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        tracing::warn!("Stripe webhook secret not configured - skipping signature verification");
    }

    let webhook: StripeWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received Stripe webhook"
    );

    let stripe = state
        .stripe
        .clone()
        .ok_or_else(|| ApiError::Internal("Stripe is not configured".into()))?;

    // Every handled event carries the customer; their metadata maps
    // back to our account uid.
    let Some(customer_id) = webhook.data.object.get("customer").and_then(|v| v.as_str()) else {
        tracing::debug!(event_type = %webhook.event_type, "Event has no customer, ignoring");
        return Ok(Json(WebhookResponse { received: true }));
    };
    let customer = stripe
        .get_customer(customer_id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown customer {customer_id}")))?;
    let Some(uid) = customer.metadata.get("uid").cloned() else {
        return Err(ApiError::BadRequest("customer.metadata.uid not found".into()));
    };

    // Record the customer mapping; auto-recharge invoices are billed
    // against this customer id.
    let workspace = state.store.get_or_create_workspace(&uid).await?;
    if workspace.stripe_customer_id.as_deref() != Some(customer_id) {
        state
            .store
            .set_stripe_customer_id(workspace.id, customer_id)
            .await?;
    }

    match webhook.event_type.as_str() {
        "invoice.paid" => {
            let invoice: Invoice = serde_json::from_value(webhook.data.object.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            handle_invoice_paid(&state, &stripe, &uid, invoice).await?;
        }
        "checkout.session.completed" => {
            handle_checkout_completed(&stripe, &webhook.data.object).await?;
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let sub: StripeSubscription = serde_json::from_value(webhook.data.object.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            handle_subscription_updated(&state, &stripe, &uid, sub).await?;
        }
        "customer.subscription.deleted" => {
            let sub: StripeSubscription = serde_json::from_value(webhook.data.object.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            detach_workspace_subscription(&state, &uid, PaymentProvider::Stripe, &sub.id).await?;
        }
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

/// Credit the ledger for a paid Stripe invoice.
///
/// Credits granted equal the first line's quantity; money charged is
/// the first line's amount.
async fn handle_invoice_paid(
    state: &AppState,
    stripe: &Arc<StripeClient>,
    uid: &str,
    invoice: Invoice,
) -> Result<(), ApiError> {
    let Some(line) = invoice.lines.as_ref().and_then(|l| l.data.first()) else {
        return Err(ApiError::BadRequest(format!(
            "Invoice {} has no line items",
            invoice.id
        )));
    };
    let amount = line.quantity.unwrap_or(0);
    let charged_amount = line.amount;

    let reason = classify_invoice_reason(
        invoice.billing_reason.as_deref(),
        invoice.subscription.is_some(),
        &invoice.metadata,
    );

    let plan = match &invoice.subscription {
        Some(sub_id) => stripe_subscription_plan(stripe, sub_id)
            .await?
            .map(PricingPlan::db_value),
        None => None,
    };

    add_balance_for_payment(
        state,
        PaymentEvent {
            uid: uid.to_string(),
            amount,
            invoice_id: invoice.id,
            payment_provider: PaymentProvider::Stripe,
            charged_amount,
            reason,
            plan,
        },
    )
    .await
}

/// Resolve the pricing plan behind a Stripe subscription via its
/// product name.
async fn stripe_subscription_plan(
    stripe: &Arc<StripeClient>,
    subscription_id: &str,
) -> Result<Option<PricingPlan>, ApiError> {
    let sub = stripe
        .retrieve_subscription(subscription_id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    subscription_plan(stripe, &sub).await
}

async fn subscription_plan(
    stripe: &Arc<StripeClient>,
    sub: &StripeSubscription,
) -> Result<Option<PricingPlan>, ApiError> {
    let Some(item) = sub.items.as_ref().and_then(|items| items.data.first()) else {
        return Ok(None);
    };
    let product = stripe
        .retrieve_product(&item.price.product)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    Ok(PricingPlan::get_by_stripe_product(&product.name))
}

/// Apply an active Stripe subscription to the workspace.
///
/// The live status is re-queried from Stripe; webhook delivery order
/// is not trusted.
async fn handle_subscription_updated(
    state: &AppState,
    stripe: &Arc<StripeClient>,
    uid: &str,
    sub: StripeSubscription,
) -> Result<(), ApiError> {
    let live = stripe
        .retrieve_subscription(&sub.id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    if !live.status.eq_ignore_ascii_case("active") {
        tracing::info!(
            subscription_id = %live.id,
            status = %live.status,
            "Subscription is not active, ignoring event"
        );
        return Ok(());
    }

    let plan = subscription_plan(stripe, &live).await?.ok_or_else(|| {
        ApiError::BadRequest(format!("No pricing plan for subscription {}", live.id))
    })?;

    set_workspace_subscription(state, uid, plan, PaymentProvider::Stripe, &live.id).await?;
    Ok(())
}

/// A completed setup-mode checkout saves a new default payment
/// method, on the subscription when one was named, on the customer
/// otherwise.
async fn handle_checkout_completed(
    stripe: &Arc<StripeClient>,
    session: &serde_json::Value,
) -> Result<(), ApiError> {
    let Some(setup_intent_id) = session.get("setup_intent").and_then(|v| v.as_str()) else {
        return Ok(());
    };

    let setup_intent = stripe
        .retrieve_setup_intent(setup_intent_id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    let Some(payment_method) = setup_intent.get("payment_method").and_then(|v| v.as_str())
    else {
        return Ok(());
    };

    let sub_id = setup_intent
        .get("metadata")
        .and_then(|m| m.get("subscription_id"))
        .and_then(|v| v.as_str());

    if let Some(sub_id) = sub_id {
        stripe
            .set_subscription_default_payment_method(sub_id, payment_method)
            .await
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    } else if let Some(customer_id) = session.get("customer").and_then(|v| v.as_str()) {
        stripe
            .set_customer_default_payment_method(customer_id, payment_method)
            .await
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    }

    Ok(())
}

/// PayPal webhook envelope.
#[derive(Debug, Deserialize)]
pub struct PaypalWebhook {
    /// Event type, e.g. `PAYMENT.SALE.COMPLETED`.
    pub event_type: String,
    /// The event subject.
    pub resource: serde_json::Value,
}

/// Handle PayPal webhooks.
pub async fn paypal_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let paypal = state
        .paypal
        .clone()
        .ok_or_else(|| ApiError::Internal("PayPal is not configured".into()))?;

    if state.config.paypal_webhook_id.is_some() {
        let webhook_headers = paypal_headers(&headers)?;
        paypal
            .verify_webhook(&webhook_headers, &body)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Invalid PayPal webhook signature");
                ApiError::BadRequest("Invalid webhook signature".into())
            })?;
    } else {
        tracing::warn!("PayPal webhook id not configured - skipping signature verification");
    }

    let webhook: PaypalWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(event_type = %webhook.event_type, "Received PayPal webhook");

    match webhook.event_type.as_str() {
        "PAYMENT.SALE.COMPLETED" => {
            let sale: Sale = serde_json::from_value(webhook.resource.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            handle_sale_completed(&state, &paypal, sale).await?;
        }
        "BILLING.SUBSCRIPTION.ACTIVATED" | "BILLING.SUBSCRIPTION.UPDATED" => {
            let sub: PaypalSubscription = serde_json::from_value(webhook.resource.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            handle_paypal_subscription_updated(&state, &paypal, sub).await?;
        }
        "BILLING.SUBSCRIPTION.CANCELLED" | "BILLING.SUBSCRIPTION.EXPIRED" => {
            let sub: PaypalSubscription = serde_json::from_value(webhook.resource.clone())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            handle_paypal_subscription_cancelled(&state, sub).await?;
        }
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled PayPal event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

fn paypal_headers(headers: &HeaderMap) -> Result<WebhookHeaders, ApiError> {
    let get = |name: &str| -> Result<String, ApiError> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| ApiError::BadRequest(format!("Missing {name} header")))
    };
    Ok(WebhookHeaders {
        auth_algo: get("paypal-auth-algo")?,
        cert_url: get("paypal-cert-url")?,
        transmission_id: get("paypal-transmission-id")?,
        transmission_sig: get("paypal-transmission-sig")?,
        transmission_time: get("paypal-transmission-time")?,
    })
}

/// A completed sale on a billing agreement grants the plan's credits.
async fn handle_sale_completed(
    state: &AppState,
    paypal: &Arc<PaypalClient>,
    sale: Sale,
) -> Result<(), ApiError> {
    let Some(agreement_id) = sale.billing_agreement_id.as_deref() else {
        tracing::info!(sale_id = %sale.id, "Sale is not a subscription sale, skipping");
        return Ok(());
    };

    let sub = paypal
        .get_subscription(agreement_id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    let uid = sub
        .custom_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest(format!("Subscription {} has no custom_id", sub.id)))?;
    let plan = sub
        .plan_id
        .as_deref()
        .and_then(PricingPlan::get_by_paypal_plan_id)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("No pricing plan for PayPal plan {:?}", sub.plan_id))
        })?;

    let charged_dollars = sale
        .amount
        .total
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest(format!("Bad sale amount {}", sale.amount.total)))?;
    #[allow(clippy::cast_possible_truncation)]
    let charged_dollars = charged_dollars as i64;
    if charged_dollars != plan.def().monthly_charge {
        // Record the payment as usual, but flag it for investigation.
        tracing::error!(
            sale_id = %sale.id,
            charged_dollars,
            plan_charge = plan.def().monthly_charge,
            "PayPal charge does not match the plan's monthly charge"
        );
    }

    add_balance_for_payment(
        state,
        PaymentEvent {
            uid,
            amount: plan.def().credits,
            invoice_id: sale.id,
            payment_provider: PaymentProvider::Paypal,
            charged_amount: charged_dollars * 100,
            reason: TransactionReason::Subscribe,
            plan: Some(plan.db_value()),
        },
    )
    .await
}

/// Apply an active PayPal subscription to the workspace.
///
/// The live status is re-queried from PayPal; webhook delivery order
/// is not trusted.
async fn handle_paypal_subscription_updated(
    state: &AppState,
    paypal: &Arc<PaypalClient>,
    sub: PaypalSubscription,
) -> Result<(), ApiError> {
    let live = paypal
        .get_subscription(&sub.id)
        .await
        .map_err(|e| ApiError::ExternalService(e.to_string()))?;
    let uid = live.custom_id.clone().ok_or_else(|| {
        ApiError::BadRequest(format!("Subscription {} has no custom_id", live.id))
    })?;
    let plan = live
        .plan_id
        .as_deref()
        .and_then(PricingPlan::get_by_paypal_plan_id)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("No pricing plan for PayPal plan {:?}", live.plan_id))
        })?;

    if !live.status.eq_ignore_ascii_case("active") {
        tracing::info!(
            subscription_id = %live.id,
            status = %live.status,
            "Subscription is not active, ignoring event"
        );
        return Ok(());
    }

    set_workspace_subscription(state, &uid, plan, PaymentProvider::Paypal, &live.id).await?;
    Ok(())
}

async fn handle_paypal_subscription_cancelled(
    state: &AppState,
    sub: PaypalSubscription,
) -> Result<(), ApiError> {
    let uid = sub
        .custom_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest(format!("Subscription {} has no custom_id", sub.id)))?;
    detach_workspace_subscription(state, &uid, PaymentProvider::Paypal, &sub.id).await
}
