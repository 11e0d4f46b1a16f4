//! Workspace (billing account) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::WorkspaceId;
use crate::subscription::Subscription;

/// A billing workspace holding a credit balance.
///
/// `balance` is a cached counter; it is mutated only through the
/// store's `add_balance`, which holds a row lock and appends a ledger
/// entry in the same transaction, so it always equals the sum of the
/// workspace's ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// The workspace id.
    pub id: WorkspaceId,

    /// External account uid (from the auth subsystem).
    pub uid: String,

    /// Display name.
    pub name: String,

    /// Cached credit balance (signed).
    pub balance: i64,

    /// Set to true on the first successful payment.
    pub is_paying: bool,

    /// Stripe customer id, once one has been created.
    pub stripe_customer_id: Option<String>,

    /// Id of the attached subscription, if any.
    pub subscription_id: Option<i64>,

    /// When the last low-balance email was sent.
    pub low_balance_email_sent_at: Option<DateTime<Utc>>,

    /// When the workspace was created.
    pub created_at: DateTime<Utc>,

    /// When the workspace was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Create a new workspace with zero balance.
    #[must_use]
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkspaceId::generate(),
            uid: uid.into(),
            name: name.into(),
            balance: 0,
            is_paying: false,
            stripe_customer_id: None,
            subscription_id: None,
            low_balance_email_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the auto-recharge controller should consider this
    /// workspace: enabled policy, a configured provider, and balance
    /// below the threshold.
    #[must_use]
    pub fn should_attempt_auto_recharge(&self, subscription: Option<&Subscription>) -> bool {
        let Some(sub) = subscription else {
            return false;
        };
        let Some(threshold) = sub.auto_recharge_balance_threshold else {
            return false;
        };
        sub.auto_recharge_enabled && sub.payment_provider.is_some() && self.balance < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PaymentProvider;
    use crate::plan::PricingPlan;

    fn recharge_sub() -> Subscription {
        let mut sub = Subscription::new(PricingPlan::Creator);
        sub.payment_provider = Some(PaymentProvider::Stripe);
        sub.external_id = Some("sub_1".into());
        sub.auto_recharge_enabled = true;
        sub.auto_recharge_balance_threshold = Some(1_000);
        sub.auto_recharge_topup_amount = Some(10);
        sub
    }

    #[test]
    fn new_workspace_has_zero_balance() {
        let ws = Workspace::new("uid-1", "Acme");
        assert_eq!(ws.balance, 0);
        assert!(!ws.is_paying);
        assert!(ws.subscription_id.is_none());
    }

    #[test]
    fn auto_recharge_requires_enabled_policy_and_low_balance() {
        let mut ws = Workspace::new("uid-1", "Acme");
        ws.balance = 500;
        let sub = recharge_sub();

        assert!(ws.should_attempt_auto_recharge(Some(&sub)));

        ws.balance = 1_000;
        assert!(!ws.should_attempt_auto_recharge(Some(&sub)));

        ws.balance = 500;
        let mut disabled = recharge_sub();
        disabled.auto_recharge_enabled = false;
        assert!(!ws.should_attempt_auto_recharge(Some(&disabled)));

        let mut no_provider = recharge_sub();
        no_provider.payment_provider = None;
        no_provider.external_id = None;
        assert!(!ws.should_attempt_auto_recharge(Some(&no_provider)));

        assert!(!ws.should_attempt_auto_recharge(None));
    }
}
