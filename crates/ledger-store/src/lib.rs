//! PostgreSQL persistence for the credit ledger.
//!
//! [`LedgerStore`] owns the connection pool and exposes the balance,
//! ledger and subscription operations. All balance mutations go
//! through [`LedgerStore::add_balance`], which serializes on the
//! workspace row and enforces at-most-once application per invoice id.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

mod error;
mod lock;
mod rows;
mod store;

pub use error::{is_unique_violation, Result, StoreError};
pub use lock::AdvisoryLock;
pub use store::{AddBalanceFields, AutoRechargeSettings, LedgerStore, SubscriptionWrite};
