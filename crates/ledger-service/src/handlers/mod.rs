//! API handlers.

// Amounts displayed are well within f64 precision.
#![allow(clippy::cast_precision_loss)]

pub mod health;
pub mod webhooks;
pub mod workspaces;
