//! Ledger store integration tests against a real PostgreSQL.
//!
//! These tests require a database; set `TEST_DATABASE_URL` to run
//! them. Without it each test returns early and passes vacuously.
//!
//! Run with: `TEST_DATABASE_URL=postgres://... cargo test -p ledger-store`

use ledger_core::{
    PaymentProvider, PricingPlan, TransactionReason, Workspace, WorkspaceId,
    INTERNAL_INVOICE_PREFIX,
};
use ledger_store::{AddBalanceFields, AutoRechargeSettings, LedgerStore};

async fn test_store() -> Option<LedgerStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = LedgerStore::connect(&url).await.expect("connect");
    store.migrate().await.expect("migrate");
    Some(store)
}

fn fresh_uid() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

async fn fresh_workspace(store: &LedgerStore) -> Workspace {
    store
        .get_or_create_workspace(&fresh_uid())
        .await
        .expect("create workspace")
}

// ============================================================================
// Workspace resolution
// ============================================================================

#[tokio::test]
async fn get_or_create_is_stable_per_uid() {
    let Some(store) = test_store().await else {
        return;
    };
    let uid = fresh_uid();

    let first = store.get_or_create_workspace(&uid).await.unwrap();
    let second = store.get_or_create_workspace(&uid).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.balance, 0);
    assert!(!second.is_paying);
}

#[tokio::test]
async fn stripe_customer_id_persists_on_the_workspace() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;
    assert!(ws.stripe_customer_id.is_none());

    store
        .set_stripe_customer_id(ws.id, "cus_roundtrip")
        .await
        .unwrap();

    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.stripe_customer_id.as_deref(), Some("cus_roundtrip"));
}

// ============================================================================
// add_balance
// ============================================================================

#[tokio::test]
async fn add_balance_updates_balance_and_end_balance() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    let entry = store
        .add_balance(
            ws.id,
            500,
            &format!("in_{}", uuid::Uuid::new_v4()),
            TransactionReason::Addon,
            AddBalanceFields {
                payment_provider: Some(PaymentProvider::Stripe),
                charged_amount: Some(1000),
                ..AddBalanceFields::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(entry.amount, 500);
    assert_eq!(entry.end_balance, 500);

    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.balance, 500);
}

#[tokio::test]
async fn add_balance_is_idempotent_per_invoice_id() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;
    let invoice_id = format!("in_{}", uuid::Uuid::new_v4());

    let first = store
        .add_balance(
            ws.id,
            1000,
            &invoice_id,
            TransactionReason::Addon,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();
    let second = store
        .add_balance(
            ws.id,
            1000,
            &invoice_id,
            TransactionReason::Addon,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.balance, 1000, "replay must not re-apply the delta");
}

#[tokio::test]
async fn concurrent_deltas_serialize_to_an_exact_sum() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    let mut tasks = Vec::new();
    for task in 0..5 {
        let store = store.clone();
        let workspace_id = ws.id;
        tasks.push(tokio::spawn(async move {
            for i in 0..100 {
                let amount = if i % 2 == 0 { 7 } else { -3 };
                store
                    .add_balance(
                        workspace_id,
                        amount,
                        &format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4()),
                        TransactionReason::Deduct,
                        AddBalanceFields {
                            user_id: Some(format!("task-{task}")),
                            ..AddBalanceFields::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // 5 tasks x (50 * 7 - 50 * 3)
    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.balance, 5 * (50 * 7 - 50 * 3));

    // Each end_balance is the running sum in ledger order.
    let entries = store.list_entries(ws.id, 1000, 0).await.unwrap();
    assert_eq!(entries.len(), 500);
    let mut running = 0;
    for entry in entries.iter().rev() {
        running += entry.amount;
    }
    assert_eq!(running, ws.balance);
}

#[tokio::test]
async fn concurrent_same_invoice_applies_once() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;
    let invoice_id = format!("in_{}", uuid::Uuid::new_v4());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let workspace_id = ws.id;
        let invoice_id = invoice_id.clone();
        tasks.push(tokio::spawn(async move {
            store
                .add_balance(
                    workspace_id,
                    250,
                    &invoice_id,
                    TransactionReason::AutoRecharge,
                    AddBalanceFields::default(),
                )
                .await
                .unwrap()
        }));
    }
    let entries: Vec<_> = futures_join(tasks).await;

    let first_id = entries[0].id;
    assert!(entries.iter().all(|e| e.id == first_id));
    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.balance, 250);
}

async fn futures_join(
    tasks: Vec<tokio::task::JoinHandle<ledger_core::LedgerEntry>>,
) -> Vec<ledger_core::LedgerEntry> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap());
    }
    out
}

#[tokio::test]
async fn deduction_retry_with_same_internal_invoice_is_a_noop() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    store
        .add_balance(
            ws.id,
            50,
            &format!("in_{}", uuid::Uuid::new_v4()),
            TransactionReason::Addon,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();

    let invoice_id = format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4());
    let entry = store
        .add_balance(
            ws.id,
            -20,
            &invoice_id,
            TransactionReason::Deduct,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();
    assert_eq!(entry.end_balance, 30);

    // A crashed caller retries with the same internal invoice id.
    let retry = store
        .add_balance(
            ws.id,
            -20,
            &invoice_id,
            TransactionReason::Deduct,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();
    assert_eq!(retry.id, entry.id);

    let ws = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert_eq!(ws.balance, 30);
    let deductions: Vec<_> = store
        .list_entries(ws.id, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.invoice_id == invoice_id)
        .collect();
    assert_eq!(deductions.len(), 1);
}

#[tokio::test]
async fn balance_may_go_negative() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    let entry = store
        .add_balance(
            ws.id,
            -42,
            &format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4()),
            TransactionReason::Deduct,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();

    assert_eq!(entry.end_balance, -42);
}

// ============================================================================
// Spending aggregates
// ============================================================================

#[tokio::test]
async fn dollars_spent_counts_only_credit_entries() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    store
        .add_balance(
            ws.id,
            1000,
            &format!("in_{}", uuid::Uuid::new_v4()),
            TransactionReason::Addon,
            AddBalanceFields {
                charged_amount: Some(1000),
                payment_provider: Some(PaymentProvider::Stripe),
                ..AddBalanceFields::default()
            },
        )
        .await
        .unwrap();
    store
        .add_balance(
            ws.id,
            -500,
            &format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4()),
            TransactionReason::Deduct,
            AddBalanceFields {
                charged_amount: Some(9999),
                ..AddBalanceFields::default()
            },
        )
        .await
        .unwrap();

    let spent = store.get_dollars_spent_this_month(ws.id).await.unwrap();
    assert!((spent - 10.0).abs() < f64::EPSILON);

    assert!(store
        .last_positive_transaction_at(ws.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn credits_consumed_counts_only_deductions() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    store
        .add_balance(
            ws.id,
            100,
            &format!("in_{}", uuid::Uuid::new_v4()),
            TransactionReason::Addon,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();
    for amount in [-30, -12] {
        store
            .add_balance(
                ws.id,
                amount,
                &format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4()),
                TransactionReason::Deduct,
                AddBalanceFields::default(),
            )
            .await
            .unwrap();
    }

    let since = chrono::Utc::now() - chrono::Duration::days(7);
    let consumed = store.credits_consumed_since(ws.id, since).await.unwrap();
    assert_eq!(consumed, 42);

    let sent_at = chrono::Utc::now();
    store
        .set_low_balance_email_sent_at(ws.id, sent_at)
        .await
        .unwrap();
    let reloaded = store.get_workspace(ws.id).await.unwrap().unwrap();
    assert!(reloaded.low_balance_email_sent_at.is_some());
}

// ============================================================================
// Subscription lifecycle
// ============================================================================

#[tokio::test]
async fn subscription_install_update_replace_and_detach() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    // Install
    let write = store
        .set_workspace_subscription(ws.id, PricingPlan::Creator, PaymentProvider::Stripe, "sub_a")
        .await
        .unwrap();
    assert!(write.replaced.is_none());
    assert_eq!(write.subscription.plan, PricingPlan::Creator.db_value());

    // Update in place on the same external id
    let write = store
        .set_workspace_subscription(ws.id, PricingPlan::Business, PaymentProvider::Stripe, "sub_a")
        .await
        .unwrap();
    assert!(write.replaced.is_none());
    assert_eq!(write.subscription.plan, PricingPlan::Business.db_value());

    // Enable auto-recharge so we can check the policy carries over
    store
        .update_auto_recharge_settings(
            ws.id,
            AutoRechargeSettings {
                enabled: true,
                balance_threshold: Some(300),
                topup_amount: Some(10),
                monthly_spending_budget: Some(100),
                monthly_spending_notification_threshold: Some(50),
            },
        )
        .await
        .unwrap();

    // Replace: different external id displaces the old row
    let write = store
        .set_workspace_subscription(ws.id, PricingPlan::Creator, PaymentProvider::Stripe, "sub_b")
        .await
        .unwrap();
    let replaced = write.replaced.expect("stale subscription returned");
    assert_eq!(replaced.external_id.as_deref(), Some("sub_a"));
    assert!(write.subscription.auto_recharge_enabled);
    assert_eq!(write.subscription.auto_recharge_balance_threshold, Some(300));

    // Stale cancellation is ignored
    let detached = store
        .detach_subscription(ws.id, PaymentProvider::Stripe, "sub_a")
        .await
        .unwrap();
    assert!(!detached);
    assert!(store.get_subscription(ws.id).await.unwrap().is_some());

    // Matching cancellation detaches
    let detached = store
        .detach_subscription(ws.id, PaymentProvider::Stripe, "sub_b")
        .await
        .unwrap();
    assert!(detached);
    assert!(store.get_subscription(ws.id).await.unwrap().is_none());
}

#[tokio::test]
async fn auto_recharge_candidates_require_low_balance() {
    let Some(store) = test_store().await else {
        return;
    };
    let ws = fresh_workspace(&store).await;

    store
        .set_workspace_subscription(
            ws.id,
            PricingPlan::Creator,
            PaymentProvider::Stripe,
            &format!("sub_{}", uuid::Uuid::new_v4()),
        )
        .await
        .unwrap();
    store
        .update_auto_recharge_settings(
            ws.id,
            AutoRechargeSettings {
                enabled: true,
                balance_threshold: Some(1000),
                topup_amount: Some(10),
                monthly_spending_budget: None,
                monthly_spending_notification_threshold: None,
            },
        )
        .await
        .unwrap();

    // Balance 0 < threshold 1000: candidate
    let candidates = store.list_auto_recharge_candidates().await.unwrap();
    assert!(candidates.contains(&ws.id));

    store
        .add_balance(
            ws.id,
            2000,
            &format!("in_{}", uuid::Uuid::new_v4()),
            TransactionReason::Addon,
            AddBalanceFields::default(),
        )
        .await
        .unwrap();

    let candidates = store.list_auto_recharge_candidates().await.unwrap();
    assert!(!candidates.contains(&ws.id));
}

// ============================================================================
// Advisory locks
// ============================================================================

#[tokio::test]
async fn advisory_lock_is_exclusive_until_released() {
    let Some(store) = test_store().await else {
        return;
    };
    let key = WorkspaceId::generate().lock_key();

    let guard = store.try_advisory_lock(key).await.unwrap().expect("lock");
    assert!(store.try_advisory_lock(key).await.unwrap().is_none());

    guard.release().await.unwrap();
    let again = store.try_advisory_lock(key).await.unwrap();
    assert!(again.is_some());
    again.unwrap().release().await.unwrap();
}
