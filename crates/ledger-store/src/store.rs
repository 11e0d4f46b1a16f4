//! The PostgreSQL-backed ledger store.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use ledger_core::{
    LedgerEntry, PaymentProvider, PricingPlan, Subscription, TransactionId, TransactionReason,
    Workspace, WorkspaceId,
};

use crate::error::{is_unique_violation, Result, StoreError};
use crate::rows::{
    ledger_entry_from_row, subscription_from_row, workspace_from_row, LEDGER_ENTRY_COLUMNS,
    SUBSCRIPTION_COLUMNS, WORKSPACE_COLUMNS,
};

/// Optional fields for a ledger entry beyond amount and reason.
#[derive(Debug, Clone, Default)]
pub struct AddBalanceFields {
    /// Acting user uid, if known.
    pub user_id: Option<String>,
    /// Provider that moved real money.
    pub payment_provider: Option<PaymentProvider>,
    /// Money charged, in cents.
    pub charged_amount: Option<i64>,
    /// Plan override; defaults to the workspace's current plan.
    pub plan: Option<i32>,
}

/// Auto-recharge policy settings written from the settings surface.
#[derive(Debug, Clone)]
pub struct AutoRechargeSettings {
    /// Whether auto-recharge is enabled.
    pub enabled: bool,
    /// Trigger threshold in credits.
    pub balance_threshold: Option<i64>,
    /// Top-up amount in dollars.
    pub topup_amount: Option<i64>,
    /// Monthly spending cap in dollars.
    pub monthly_spending_budget: Option<i64>,
    /// Spending notification threshold in dollars.
    pub monthly_spending_notification_threshold: Option<i64>,
}

/// Result of applying an active-subscription event.
#[derive(Debug)]
pub struct SubscriptionWrite {
    /// The subscription now attached to the workspace.
    pub subscription: Subscription,
    /// A stale subscription that was displaced and still needs a
    /// provider-side cancellation.
    pub replaced: Option<Subscription>,
}

/// PostgreSQL storage for workspaces, subscriptions and the ledger.
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Workspaces
    // =========================================================================

    /// Fetch a workspace by id.
    pub async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    /// Fetch a workspace by its external account uid.
    pub async fn get_workspace_by_uid(&self, uid: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE uid = $1"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    /// Resolve a workspace for an external account uid, creating it if
    /// missing. Creation races resolve through the unique uid
    /// constraint.
    pub async fn get_or_create_workspace(&self, uid: &str) -> Result<Workspace> {
        if let Some(ws) = self.get_workspace_by_uid(uid).await? {
            return Ok(ws);
        }

        let ws = Workspace::new(uid, "");
        let res = sqlx::query(
            "INSERT INTO workspaces (id, uid, name, balance, is_paying, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(ws.id.as_uuid())
        .bind(&ws.uid)
        .bind(&ws.name)
        .bind(ws.balance)
        .bind(ws.is_paying)
        .bind(ws.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(ws),
            Err(e) if is_unique_violation(&e) => self
                .get_workspace_by_uid(uid)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "workspace",
                    id: uid.to_string(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the Stripe customer id on a workspace.
    pub async fn set_stripe_customer_id(&self, id: WorkspaceId, customer_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workspaces SET stripe_customer_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip `is_paying` on the first successful payment.
    pub async fn mark_paying(&self, id: WorkspaceId) -> Result<()> {
        sqlx::query(
            "UPDATE workspaces SET is_paying = TRUE, updated_at = now() \
             WHERE id = $1 AND NOT is_paying",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that a low-balance email went out.
    pub async fn set_low_balance_email_sent_at(
        &self,
        id: WorkspaceId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workspaces SET low_balance_email_sent_at = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Fetch a ledger entry by its idempotency key.
    pub async fn get_entry_by_invoice_id(&self, invoice_id: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_ENTRY_COLUMNS} FROM ledger_entries WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ledger_entry_from_row).transpose()
    }

    /// List a workspace's ledger entries, newest first.
    pub async fn list_entries(
        &self,
        workspace_id: WorkspaceId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_ENTRY_COLUMNS} FROM ledger_entries \
             WHERE workspace_id = $1 ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(workspace_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    /// Apply a signed balance delta and append the matching ledger
    /// entry, at most once per `invoice_id`.
    ///
    /// The workspace row is locked with `SELECT ... FOR UPDATE` so
    /// concurrent calls on the same workspace serialize; the balance
    /// update and the entry insert commit together or not at all. A
    /// duplicate `invoice_id` returns the existing entry without
    /// re-applying the delta; the unique constraint is the authority,
    /// the pre-check only skips the lock in the common case.
    pub async fn add_balance(
        &self,
        workspace_id: WorkspaceId,
        amount: i64,
        invoice_id: &str,
        reason: TransactionReason,
        fields: AddBalanceFields,
    ) -> Result<LedgerEntry> {
        if let Some(existing) = self.get_entry_by_invoice_id(invoice_id).await? {
            tracing::info!(
                %workspace_id,
                invoice_id,
                "invoice already recorded, returning existing ledger entry"
            );
            return Ok(existing);
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT balance, subscription_id FROM workspaces WHERE id = $1 FOR UPDATE",
        )
        .bind(workspace_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "workspace",
            id: workspace_id.to_string(),
        })?;

        let balance: i64 = sqlx::Row::try_get(&row, "balance")?;
        let subscription_id: Option<i64> = sqlx::Row::try_get(&row, "subscription_id")?;
        let new_balance = balance + amount;

        sqlx::query("UPDATE workspaces SET balance = $2, updated_at = now() WHERE id = $1")
            .bind(workspace_id.as_uuid())
            .bind(new_balance)
            .execute(&mut *tx)
            .await?;

        let plan = match (fields.plan, subscription_id) {
            (Some(plan), _) => Some(plan),
            (None, Some(sub_id)) => {
                sqlx::query_scalar::<_, i32>("SELECT plan FROM subscriptions WHERE id = $1")
                    .bind(sub_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            (None, None) => None,
        };

        let entry = LedgerEntry {
            id: TransactionId::generate(),
            workspace_id,
            user_id: fields.user_id,
            invoice_id: invoice_id.to_string(),
            amount,
            end_balance: new_balance,
            payment_provider: fields.payment_provider,
            charged_amount: fields.charged_amount,
            reason,
            plan,
            created_at: Utc::now(),
        };

        let res = sqlx::query(
            "INSERT INTO ledger_entries \
             (id, workspace_id, user_id, invoice_id, amount, end_balance, \
              payment_provider, charged_amount, reason, plan, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.id.to_string())
        .bind(entry.workspace_id.as_uuid())
        .bind(&entry.user_id)
        .bind(&entry.invoice_id)
        .bind(entry.amount)
        .bind(entry.end_balance)
        .bind(entry.payment_provider.map(PaymentProvider::db_value))
        .bind(entry.charged_amount)
        .bind(entry.reason.db_value())
        .bind(entry.plan)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await;

        match res {
            Ok(_) => {
                tx.commit().await?;
                Ok(entry)
            }
            // Lost the race with a concurrent caller holding the same
            // invoice id: roll the balance update back and return the
            // winner's entry.
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                tracing::info!(
                    %workspace_id,
                    invoice_id,
                    "concurrent insert for invoice, returning existing ledger entry"
                );
                self.get_entry_by_invoice_id(invoice_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "ledger entry",
                        id: invoice_id.to_string(),
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sum of money charged this calendar month, in dollars.
    ///
    /// Aggregates `charged_amount` over credit entries only.
    pub async fn get_dollars_spent_this_month(&self, workspace_id: WorkspaceId) -> Result<f64> {
        let cents: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(charged_amount), 0)::BIGINT FROM ledger_entries \
             WHERE workspace_id = $1 AND amount > 0 \
               AND created_at >= date_trunc('month', now())",
        )
        .bind(workspace_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        #[allow(clippy::cast_precision_loss)]
        Ok(cents as f64 / 100.0)
    }

    /// Total credits consumed since `since` (deductions only, returned
    /// as a positive number).
    pub async fn credits_consumed_since(
        &self,
        workspace_id: WorkspaceId,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let consumed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(-SUM(amount), 0)::BIGINT FROM ledger_entries \
             WHERE workspace_id = $1 AND amount < 0 AND created_at >= $2",
        )
        .bind(workspace_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(consumed)
    }

    /// Timestamp of the most recent credit entry, if any.
    pub async fn last_positive_transaction_at(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM ledger_entries WHERE workspace_id = $1 AND amount > 0",
        )
        .bind(workspace_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Fetch the subscription attached to a workspace.
    pub async fn get_subscription(&self, workspace_id: WorkspaceId) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE id = (SELECT subscription_id FROM workspaces WHERE id = $1)"
        ))
        .bind(workspace_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    /// Apply an active-subscription event under the workspace row lock.
    ///
    /// Installs a new subscription, swaps the plan in place when the
    /// (provider, external id) pair matches, or displaces a stale
    /// subscription. The displaced subscription is returned so the
    /// caller can cancel it provider-side; auto-recharge policy carries
    /// over to the replacement.
    pub async fn set_workspace_subscription(
        &self,
        workspace_id: WorkspaceId,
        plan: PricingPlan,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<SubscriptionWrite> {
        let mut tx = self.pool.begin().await?;

        let sub_id: Option<i64> = sqlx::query_scalar(
            "SELECT subscription_id FROM workspaces WHERE id = $1 FOR UPDATE",
        )
        .bind(workspace_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "workspace",
            id: workspace_id.to_string(),
        })?;

        let current = match sub_id {
            Some(id) => {
                let row = sqlx::query(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
                row.as_ref().map(subscription_from_row).transpose()?
            }
            None => None,
        };

        use ledger_core::SubscriptionTransition;
        let transition = ledger_core::plan_transition(current.as_ref(), provider, external_id);

        let write = match transition {
            SubscriptionTransition::UpdateInPlace => {
                // `current` is Some by construction of the transition.
                let mut sub = current.ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: external_id.to_string(),
                })?;
                sub.plan = plan.db_value();
                sub.validate()?;
                sqlx::query(
                    "UPDATE subscriptions SET plan = $2, updated_at = now() WHERE id = $1",
                )
                .bind(sub.id)
                .bind(sub.plan)
                .execute(&mut *tx)
                .await?;
                SubscriptionWrite {
                    subscription: sub,
                    replaced: None,
                }
            }
            SubscriptionTransition::Install | SubscriptionTransition::Replace => {
                let mut sub = Subscription::new(plan);
                sub.payment_provider = Some(provider);
                sub.external_id = Some(external_id.to_string());
                if let Some(old) = &current {
                    sub.auto_recharge_enabled = old.auto_recharge_enabled;
                    sub.auto_recharge_balance_threshold = old.auto_recharge_balance_threshold;
                    sub.auto_recharge_topup_amount = old.auto_recharge_topup_amount;
                    sub.monthly_spending_budget = old.monthly_spending_budget;
                    sub.monthly_spending_notification_threshold =
                        old.monthly_spending_notification_threshold;
                }
                sub.validate()?;

                if let Some(old) = &current {
                    sqlx::query("DELETE FROM subscriptions WHERE id = $1")
                        .bind(old.id)
                        .execute(&mut *tx)
                        .await?;
                }

                sub.id = insert_subscription(&mut tx, &sub).await?;
                sqlx::query(
                    "UPDATE workspaces SET subscription_id = $2, updated_at = now() WHERE id = $1",
                )
                .bind(workspace_id.as_uuid())
                .bind(sub.id)
                .execute(&mut *tx)
                .await?;

                SubscriptionWrite {
                    subscription: sub,
                    replaced: current,
                }
            }
        };

        tx.commit().await?;
        Ok(write)
    }

    /// Apply a subscription-cancelled event under the workspace row
    /// lock. Returns true when the installed subscription matched and
    /// was detached; a non-matching (stale) cancellation is a no-op.
    pub async fn detach_subscription(
        &self,
        workspace_id: WorkspaceId,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let sub_id: Option<i64> = sqlx::query_scalar(
            "SELECT subscription_id FROM workspaces WHERE id = $1 FOR UPDATE",
        )
        .bind(workspace_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "workspace",
            id: workspace_id.to_string(),
        })?;

        let current = match sub_id {
            Some(id) => {
                let row = sqlx::query(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
                row.as_ref().map(subscription_from_row).transpose()?
            }
            None => None,
        };

        use ledger_core::CancellationTransition;
        match ledger_core::cancellation_transition(current.as_ref(), provider, external_id) {
            CancellationTransition::Detach => {
                let sub = current.ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: external_id.to_string(),
                })?;
                sqlx::query(
                    "UPDATE workspaces SET subscription_id = NULL, updated_at = now() \
                     WHERE id = $1",
                )
                .bind(workspace_id.as_uuid())
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM subscriptions WHERE id = $1")
                    .bind(sub.id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(true)
            }
            CancellationTransition::IgnoreStale => {
                tx.rollback().await?;
                Ok(false)
            }
        }
    }

    /// Update a workspace's auto-recharge policy.
    ///
    /// Requires an installed subscription; validates the merged state
    /// before writing.
    pub async fn update_auto_recharge_settings(
        &self,
        workspace_id: WorkspaceId,
        settings: AutoRechargeSettings,
    ) -> Result<Subscription> {
        let mut sub = self.get_subscription(workspace_id).await?.ok_or_else(|| {
            StoreError::NotFound {
                entity: "subscription",
                id: workspace_id.to_string(),
            }
        })?;

        sub.auto_recharge_enabled = settings.enabled;
        sub.auto_recharge_balance_threshold = settings.balance_threshold;
        sub.auto_recharge_topup_amount = settings.topup_amount;
        sub.monthly_spending_budget = settings.monthly_spending_budget;
        sub.monthly_spending_notification_threshold =
            settings.monthly_spending_notification_threshold;
        sub.validate()?;

        sqlx::query(
            "UPDATE subscriptions SET auto_recharge_enabled = $2, \
             auto_recharge_balance_threshold = $3, auto_recharge_topup_amount = $4, \
             monthly_spending_budget = $5, monthly_spending_notification_threshold = $6, \
             updated_at = now() WHERE id = $1",
        )
        .bind(sub.id)
        .bind(sub.auto_recharge_enabled)
        .bind(sub.auto_recharge_balance_threshold)
        .bind(sub.auto_recharge_topup_amount)
        .bind(sub.monthly_spending_budget)
        .bind(sub.monthly_spending_notification_threshold)
        .execute(&self.pool)
        .await?;

        Ok(sub)
    }

    /// Record that the budget-reached email went out.
    pub async fn set_budget_email_sent_at(
        &self,
        subscription_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET monthly_budget_email_sent_at = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that the spending-threshold email went out.
    pub async fn set_spending_notification_sent_at(
        &self,
        subscription_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET monthly_spending_notification_sent_at = $2, \
             updated_at = now() WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Workspaces whose balance has dropped below their auto-recharge
    /// threshold, for the background sweep.
    pub async fn list_auto_recharge_candidates(&self) -> Result<Vec<WorkspaceId>> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            "SELECT w.id FROM workspaces w \
             JOIN subscriptions s ON s.id = w.subscription_id \
             WHERE s.auto_recharge_enabled \
               AND s.payment_provider IS NOT NULL \
               AND s.auto_recharge_balance_threshold IS NOT NULL \
               AND w.balance < s.auto_recharge_balance_threshold",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(WorkspaceId::from_uuid).collect())
    }
}

async fn insert_subscription(
    tx: &mut Transaction<'_, Postgres>,
    sub: &Subscription,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO subscriptions \
         (plan, payment_provider, external_id, auto_recharge_enabled, \
          auto_recharge_balance_threshold, auto_recharge_topup_amount, \
          monthly_spending_budget, monthly_spending_notification_threshold, \
          created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) RETURNING id",
    )
    .bind(sub.plan)
    .bind(sub.payment_provider.map(PaymentProvider::db_value))
    .bind(&sub.external_id)
    .bind(sub.auto_recharge_enabled)
    .bind(sub.auto_recharge_balance_threshold)
    .bind(sub.auto_recharge_topup_amount)
    .bind(sub.monthly_spending_budget)
    .bind(sub.monthly_spending_notification_threshold)
    .bind(sub.created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}
