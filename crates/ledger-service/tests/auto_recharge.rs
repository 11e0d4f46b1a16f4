//! Auto-recharge controller tests against a real PostgreSQL and a
//! mock Stripe API.
//!
//! These tests require a database; set `TEST_DATABASE_URL` to run
//! them. Without it each test returns early and passes vacuously.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledger_core::{PaymentProvider, PricingPlan, TransactionReason, WorkspaceId};
use ledger_service::auto_recharge::run_auto_recharge;
use ledger_service::{AppState, RechargeOutcome, ServiceConfig, StripeClient};
use ledger_store::{AddBalanceFields, AutoRechargeSettings, LedgerStore};

async fn test_state(stripe_base: String) -> Option<AppState> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = LedgerStore::connect(&url).await.expect("connect");
    store.migrate().await.expect("migrate");

    let config = ServiceConfig {
        database_url: url,
        stripe_api_key: Some("sk_test_x".into()),
        stripe_addon_product_id: Some("prod_credits".into()),
        ..ServiceConfig::default()
    };
    Some(AppState {
        store,
        config,
        stripe: Some(Arc::new(
            StripeClient::new("sk_test_x").with_base_url(stripe_base),
        )),
        paypal: None,
        mailer: None,
    })
}

/// A workspace with a Stripe customer, an active subscription and an
/// enabled auto-recharge policy, sitting below its balance threshold.
async fn recharge_ready_workspace(state: &AppState, budget: Option<i64>) -> WorkspaceId {
    let uid = format!("test-{}", WorkspaceId::generate());
    let ws = state.store.get_or_create_workspace(&uid).await.unwrap();
    state
        .store
        .set_stripe_customer_id(ws.id, "cus_auto")
        .await
        .unwrap();
    state
        .store
        .set_workspace_subscription(
            ws.id,
            PricingPlan::Creator,
            PaymentProvider::Stripe,
            &format!("sub_{}", WorkspaceId::generate()),
        )
        .await
        .unwrap();
    state
        .store
        .update_auto_recharge_settings(
            ws.id,
            AutoRechargeSettings {
                enabled: true,
                balance_threshold: Some(1000),
                topup_amount: Some(10),
                monthly_spending_budget: budget,
                monthly_spending_notification_threshold: None,
            },
        )
        .await
        .unwrap();
    ws.id
}

#[tokio::test]
async fn paid_invoice_within_cooldown_maps_to_cooldown() {
    let server = MockServer::start().await;
    let Some(state) = test_state(server.uri()).await else {
        return;
    };
    let workspace_id = recharge_ready_workspace(&state, None).await;

    let paid_at = chrono::Utc::now().timestamp() - 60;
    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "in_recent",
                "status": "paid",
                "customer": "cus_auto",
                "metadata": {"auto_recharge": "true"},
                "status_transitions": {"paid_at": paid_at},
            }],
            "has_more": false,
        })))
        .mount(&server)
        .await;
    // No invoice is created and nothing is paid.
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = run_auto_recharge(&state, workspace_id).await;
    assert_eq!(outcome, RechargeOutcome::Cooldown);
}

#[tokio::test]
async fn budget_gate_blocks_before_any_stripe_call() {
    let server = MockServer::start().await;
    let Some(state) = test_state(server.uri()).await else {
        return;
    };
    // Budget $10, top-up $10: any prior spending trips the gate.
    let workspace_id = recharge_ready_workspace(&state, Some(10)).await;

    // $5 spent this month, balance still below the threshold.
    state
        .store
        .add_balance(
            workspace_id,
            500,
            &format!("in_{}", WorkspaceId::generate()),
            TransactionReason::Addon,
            AddBalanceFields {
                payment_provider: Some(PaymentProvider::Stripe),
                charged_amount: Some(500),
                ..AddBalanceFields::default()
            },
        )
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = run_auto_recharge(&state, workspace_id).await;
    assert_eq!(
        outcome,
        RechargeOutcome::BudgetReached {
            budget: 10,
            spending_cents: 500,
        }
    );

    // The budget email latch is recorded even without a mailer, so at
    // most one email per month can go out.
    let sub = state
        .store
        .get_subscription(workspace_id)
        .await
        .unwrap()
        .unwrap();
    assert!(sub.monthly_budget_email_sent_at.is_some());

    // A repeat run is still blocked.
    let outcome = run_auto_recharge(&state, workspace_id).await;
    assert!(matches!(outcome, RechargeOutcome::BudgetReached { .. }));
}
