//! Core types for the workspace credit ledger.
//!
//! This crate provides the domain types shared by the store and service:
//!
//! - **Identifiers**: `WorkspaceId`, `TransactionId`
//! - **Workspaces**: `Workspace` (the billing account)
//! - **Ledger**: `LedgerEntry`, `TransactionReason`, `PaymentProvider`
//! - **Subscriptions**: `Subscription` and its validation rules
//! - **Plans**: the static `PricingPlan` catalogue
//!
//! # Credits
//!
//! Balances are signed integer credits. `charged_amount` on ledger
//! entries is in the smallest currency unit (cents) and is the field
//! that monthly spending is computed from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod ledger;
pub mod plan;
pub mod subscription;
pub mod workspace;

pub use error::{LedgerError, Result};
pub use ids::{IdError, TransactionId, WorkspaceId};
pub use ledger::{LedgerEntry, PaymentProvider, TransactionReason, INTERNAL_INVOICE_PREFIX};
pub use plan::{PlanDef, PricingPlan, ADDON_CREDITS_PER_DOLLAR};
pub use subscription::{
    cancellation_transition, plan_transition, CancellationTransition, Subscription,
    SubscriptionTransition, ADDON_AMOUNT_CHOICES, AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES,
};
pub use workspace::Workspace;
