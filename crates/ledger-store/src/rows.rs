//! Row-to-domain mapping.

use sqlx::postgres::PgRow;
use sqlx::Row;

use ledger_core::{
    LedgerEntry, PaymentProvider, Subscription, TransactionReason, Workspace, WorkspaceId,
};

use crate::error::{Result, StoreError};

pub(crate) const WORKSPACE_COLUMNS: &str = "id, uid, name, balance, is_paying, \
     stripe_customer_id, subscription_id, low_balance_email_sent_at, created_at, updated_at";

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, plan, payment_provider, external_id, \
     auto_recharge_enabled, auto_recharge_balance_threshold, auto_recharge_topup_amount, \
     monthly_spending_budget, monthly_spending_notification_threshold, \
     monthly_spending_notification_sent_at, monthly_budget_email_sent_at, created_at, updated_at";

pub(crate) const LEDGER_ENTRY_COLUMNS: &str = "id, workspace_id, user_id, invoice_id, amount, \
     end_balance, payment_provider, charged_amount, reason, plan, created_at";

fn provider_from_column(value: Option<i16>, table: &'static str) -> Result<Option<PaymentProvider>> {
    value
        .map(|v| {
            PaymentProvider::from_db_value(v).ok_or(StoreError::CorruptRow {
                table,
                message: format!("unknown payment_provider {v}"),
            })
        })
        .transpose()
}

pub(crate) fn workspace_from_row(row: &PgRow) -> Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId::from_uuid(row.try_get("id")?),
        uid: row.try_get("uid")?,
        name: row.try_get("name")?,
        balance: row.try_get("balance")?,
        is_paying: row.try_get("is_paying")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        subscription_id: row.try_get("subscription_id")?,
        low_balance_email_sent_at: row.try_get("low_balance_email_sent_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    Ok(Subscription {
        id: row.try_get("id")?,
        plan: row.try_get("plan")?,
        payment_provider: provider_from_column(row.try_get("payment_provider")?, "subscriptions")?,
        external_id: row.try_get("external_id")?,
        auto_recharge_enabled: row.try_get("auto_recharge_enabled")?,
        auto_recharge_balance_threshold: row.try_get("auto_recharge_balance_threshold")?,
        auto_recharge_topup_amount: row.try_get("auto_recharge_topup_amount")?,
        monthly_spending_budget: row.try_get("monthly_spending_budget")?,
        monthly_spending_notification_threshold: row
            .try_get("monthly_spending_notification_threshold")?,
        monthly_spending_notification_sent_at: row
            .try_get("monthly_spending_notification_sent_at")?,
        monthly_budget_email_sent_at: row.try_get("monthly_budget_email_sent_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    let reason: i16 = row.try_get("reason")?;
    Ok(LedgerEntry {
        id: id.parse().map_err(|_| StoreError::CorruptRow {
            table: "ledger_entries",
            message: format!("invalid entry id {id}"),
        })?,
        workspace_id: WorkspaceId::from_uuid(row.try_get("workspace_id")?),
        user_id: row.try_get("user_id")?,
        invoice_id: row.try_get("invoice_id")?,
        amount: row.try_get("amount")?,
        end_balance: row.try_get("end_balance")?,
        payment_provider: provider_from_column(row.try_get("payment_provider")?, "ledger_entries")?,
        charged_amount: row.try_get("charged_amount")?,
        reason: TransactionReason::from_db_value(reason).ok_or(StoreError::CorruptRow {
            table: "ledger_entries",
            message: format!("unknown reason {reason}"),
        })?,
        plan: row.try_get("plan")?,
        created_at: row.try_get("created_at")?,
    })
}
