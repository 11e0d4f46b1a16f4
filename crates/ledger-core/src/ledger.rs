//! Ledger entry types.
//!
//! Every balance change creates exactly one immutable `LedgerEntry`.
//! The `invoice_id` is the idempotency key: re-processing the same
//! external event must find the existing entry instead of creating a
//! second one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TransactionId, WorkspaceId};

/// Prefix for internally generated invoice ids (run deductions).
///
/// Provider payments use the provider's own invoice/sale id instead.
pub const INTERNAL_INVOICE_PREFIX: &str = "gooey_in_";

/// External payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Stripe.
    Stripe,
    /// PayPal.
    Paypal,
}

impl PaymentProvider {
    /// The stable integer stored in the database.
    #[must_use]
    pub const fn db_value(self) -> i16 {
        match self {
            Self::Stripe => 1,
            Self::Paypal => 2,
        }
    }

    /// Resolve a provider by its stored integer value.
    #[must_use]
    pub const fn from_db_value(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Stripe),
            2 => Some(Self::Paypal),
            _ => None,
        }
    }
}

/// Why a ledger entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    /// Credits consumed by a workflow run.
    Deduct,
    /// One-time credit purchase.
    Addon,
    /// Subscription payment (provider did not say which cycle).
    Subscribe,
    /// First invoice of a new subscription.
    SubscriptionCreate,
    /// Recurring monthly invoice.
    SubscriptionCycle,
    /// Invoice caused by a plan change.
    SubscriptionUpdate,
    /// Automatic top-up triggered by low balance.
    AutoRecharge,
}

impl TransactionReason {
    /// The stable integer stored in the database.
    #[must_use]
    pub const fn db_value(self) -> i16 {
        match self {
            Self::Deduct => 1,
            Self::Addon => 2,
            Self::Subscribe => 3,
            Self::SubscriptionCreate => 4,
            Self::SubscriptionCycle => 5,
            Self::SubscriptionUpdate => 6,
            Self::AutoRecharge => 7,
        }
    }

    /// Resolve a reason by its stored integer value.
    #[must_use]
    pub const fn from_db_value(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Deduct),
            2 => Some(Self::Addon),
            3 => Some(Self::Subscribe),
            4 => Some(Self::SubscriptionCreate),
            5 => Some(Self::SubscriptionCycle),
            6 => Some(Self::SubscriptionUpdate),
            7 => Some(Self::AutoRecharge),
            _ => None,
        }
    }
}

/// One immutable, signed credit transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id (ULID, time-ordered).
    pub id: TransactionId,

    /// The workspace whose balance changed.
    pub workspace_id: WorkspaceId,

    /// The acting user's uid, when one is known.
    pub user_id: Option<String>,

    /// Globally unique idempotency key.
    ///
    /// `gooey_in_{uuid}` for internal deductions, the provider's own
    /// invoice/sale id for payments.
    pub invoice_id: String,

    /// Signed credit amount. Negative = deduction.
    pub amount: i64,

    /// Workspace balance immediately after this entry was applied.
    pub end_balance: i64,

    /// Provider that moved real money, if any.
    pub payment_provider: Option<PaymentProvider>,

    /// Money charged, in cents. `None` for internal deductions.
    pub charged_amount: Option<i64>,

    /// Why this entry exists.
    pub reason: TransactionReason,

    /// `db_value` of the plan active when the entry was created.
    pub plan: Option<i32>,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this entry credits the workspace.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        self.amount > 0
    }

    /// Generate an internal invoice id for a run deduction.
    #[must_use]
    pub fn internal_invoice_id() -> String {
        format!("{INTERNAL_INVOICE_PREFIX}{}", uuid::Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_db_values_roundtrip() {
        for reason in [
            TransactionReason::Deduct,
            TransactionReason::Addon,
            TransactionReason::Subscribe,
            TransactionReason::SubscriptionCreate,
            TransactionReason::SubscriptionCycle,
            TransactionReason::SubscriptionUpdate,
            TransactionReason::AutoRecharge,
        ] {
            assert_eq!(TransactionReason::from_db_value(reason.db_value()), Some(reason));
        }
        assert_eq!(TransactionReason::from_db_value(0), None);
    }

    #[test]
    fn provider_db_values_roundtrip() {
        assert_eq!(
            PaymentProvider::from_db_value(PaymentProvider::Stripe.db_value()),
            Some(PaymentProvider::Stripe)
        );
        assert_eq!(
            PaymentProvider::from_db_value(PaymentProvider::Paypal.db_value()),
            Some(PaymentProvider::Paypal)
        );
        assert_eq!(PaymentProvider::from_db_value(9), None);
    }

    #[test]
    fn internal_invoice_ids_are_prefixed_and_unique() {
        let a = LedgerEntry::internal_invoice_id();
        let b = LedgerEntry::internal_invoice_id();
        assert!(a.starts_with(INTERNAL_INVOICE_PREFIX));
        assert_ne!(a, b);
    }
}
