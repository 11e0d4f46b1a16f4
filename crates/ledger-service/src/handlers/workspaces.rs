//! Workspace balance, ledger and settings handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledger_core::{
    LedgerEntry, TransactionReason, Workspace, WorkspaceId, ADDON_AMOUNT_CHOICES,
    AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES,
};
use ledger_store::AutoRechargeSettings;

use crate::auth::ServiceAuth;
use crate::auto_recharge;
use crate::error::ApiError;
use crate::reconcile;
use crate::state::AppState;

/// Resolve a path segment as a workspace: a UUID looks up by id, any
/// other string by account uid (creating the workspace on first use).
async fn resolve_workspace(state: &AppState, id_or_uid: &str) -> Result<Workspace, ApiError> {
    if let Ok(id) = WorkspaceId::from_str(id_or_uid) {
        return state
            .store
            .get_workspace(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("workspace {id_or_uid}")));
    }
    Ok(state.store.get_or_create_workspace(id_or_uid).await?)
}

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Workspace id.
    pub workspace_id: String,
    /// Current balance in credits; may be negative.
    pub balance: i64,
    /// Whether the workspace has ever paid.
    pub is_paying: bool,
}

/// `GET /v1/workspaces/:id/balance`
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    Ok(Json(BalanceResponse {
        workspace_id: workspace.id.to_string(),
        balance: workspace.balance,
        is_paying: workspace.is_paying,
    }))
}

/// Pagination query for the ledger listing.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Page size (default 50, max 200).
    #[serde(default)]
    pub limit: Option<i64>,
    /// Offset into the history.
    #[serde(default)]
    pub offset: Option<i64>,
}

/// One ledger entry as returned by the API.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    /// Entry id.
    pub id: String,
    /// Provider invoice id or internal idempotency key.
    pub invoice_id: String,
    /// Signed credit delta.
    pub amount: i64,
    /// Balance after this entry.
    pub end_balance: i64,
    /// Ledger reason as a stable integer.
    pub reason: i16,
    /// Money charged in cents, for payments.
    pub charged_amount: Option<i64>,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            invoice_id: entry.invoice_id,
            amount: entry.amount,
            end_balance: entry.end_balance,
            reason: entry.reason.db_value(),
            charged_amount: entry.charged_amount,
            created_at: entry.created_at,
        }
    }
}

/// Ledger listing response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntryResponse>,
}

/// `GET /v1/workspaces/:id/ledger`
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let entries = state.store.list_entries(workspace.id, limit, offset).await?;
    Ok(Json(LedgerResponse {
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

/// Deduction request body.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Credits to deduct; must be positive.
    pub amount: i64,
    /// Acting user uid, recorded on the entry.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Deduction response.
#[derive(Debug, Serialize)]
pub struct DeductResponse {
    /// The recorded entry id.
    pub entry_id: String,
    /// The generated internal invoice id.
    pub invoice_id: String,
    /// Balance after the deduction.
    pub balance: i64,
}

/// `POST /v1/workspaces/:id/deduct`
///
/// Records a usage deduction with a generated internal invoice id,
/// then kicks an auto-recharge check in the background.
pub async fn deduct(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(request): Json<DeductRequest>,
) -> Result<Json<DeductResponse>, ApiError> {
    if request.amount <= 0 {
        return Err(ApiError::BadRequest(
            "deduction amount must be positive".into(),
        ));
    }

    let workspace = resolve_workspace(&state, &id).await?;
    let invoice_id = LedgerEntry::internal_invoice_id();

    let entry = state
        .store
        .add_balance(
            workspace.id,
            -request.amount,
            &invoice_id,
            TransactionReason::Deduct,
            ledger_store::AddBalanceFields {
                user_id: request.user_id,
                ..ledger_store::AddBalanceFields::default()
            },
        )
        .await?;

    // Deductions are what drain the balance; check the threshold now
    // rather than waiting for the sweep. Outcome is logged, never
    // surfaced to the caller.
    let bg_state = (*state).clone();
    let workspace_id = workspace.id;
    tokio::spawn(async move {
        let outcome = auto_recharge::run_auto_recharge(&bg_state, workspace_id).await;
        tracing::debug!(%workspace_id, ?outcome, "Post-deduction auto-recharge check");
        reconcile::maybe_send_low_balance_email(&bg_state, workspace_id).await;
    });

    Ok(Json(DeductResponse {
        entry_id: entry.id.to_string(),
        invoice_id,
        balance: entry.end_balance,
    }))
}

/// Auto-recharge settings request body.
#[derive(Debug, Deserialize)]
pub struct AutoRechargeRequest {
    /// Whether auto-recharge is on.
    pub enabled: bool,
    /// Trigger threshold in credits; must be one of the published
    /// choices.
    #[serde(default)]
    pub balance_threshold: Option<i64>,
    /// Top-up amount in dollars; must be one of the published choices.
    #[serde(default)]
    pub topup_amount: Option<i64>,
    /// Monthly spending cap in dollars.
    #[serde(default)]
    pub monthly_spending_budget: Option<i64>,
    /// Spending notification threshold in dollars.
    #[serde(default)]
    pub monthly_spending_notification_threshold: Option<i64>,
}

/// Auto-recharge settings response.
#[derive(Debug, Serialize)]
pub struct AutoRechargeResponse {
    /// Whether auto-recharge is on.
    pub enabled: bool,
    /// Trigger threshold in credits.
    pub balance_threshold: Option<i64>,
    /// Top-up amount in dollars.
    pub topup_amount: Option<i64>,
    /// Monthly spending cap in dollars.
    pub monthly_spending_budget: Option<i64>,
    /// Spending notification threshold in dollars.
    pub monthly_spending_notification_threshold: Option<i64>,
    /// Valid values for `balance_threshold`.
    pub balance_threshold_choices: Vec<i64>,
    /// Valid values for `topup_amount`.
    pub topup_amount_choices: Vec<i64>,
}

/// `PUT /v1/workspaces/:id/auto-recharge`
pub async fn update_auto_recharge(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(request): Json<AutoRechargeRequest>,
) -> Result<Json<AutoRechargeResponse>, ApiError> {
    let workspace = resolve_workspace(&state, &id).await?;

    let subscription = state
        .store
        .update_auto_recharge_settings(
            workspace.id,
            AutoRechargeSettings {
                enabled: request.enabled,
                balance_threshold: request.balance_threshold,
                topup_amount: request.topup_amount,
                monthly_spending_budget: request.monthly_spending_budget,
                monthly_spending_notification_threshold: request
                    .monthly_spending_notification_threshold,
            },
        )
        .await?;

    Ok(Json(AutoRechargeResponse {
        enabled: subscription.auto_recharge_enabled,
        balance_threshold: subscription.auto_recharge_balance_threshold,
        topup_amount: subscription.auto_recharge_topup_amount,
        monthly_spending_budget: subscription.monthly_spending_budget,
        monthly_spending_notification_threshold: subscription
            .monthly_spending_notification_threshold,
        balance_threshold_choices: AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES.to_vec(),
        topup_amount_choices: ADDON_AMOUNT_CHOICES.to_vec(),
    }))
}
