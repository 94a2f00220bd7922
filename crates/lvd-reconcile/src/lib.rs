//! lvd-reconcile
//!
//! Payment reconciliation against the booking store.
//!
//! Architectural decisions:
//! - Webhook and poll deliveries run the same `process` path
//! - One provider reference lands exactly once, ever
//! - Duplicates are acknowledged as success so the provider stops retrying
//! - Undercharges are refused; overcharges apply with a WARN
//! - The store's `mark_paid` is the single write path, no fallback

mod engine;
mod types;

pub use engine::PaymentReconciler;
pub use types::*;
