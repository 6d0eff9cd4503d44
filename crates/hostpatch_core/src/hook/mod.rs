//! Function hooking with reversible, composable interceptors.
//!
//! # Responsibility
//! - Wrap host methods with BEFORE/AFTER interceptor chains (`chain`).
//! - Track every installed interceptor for exactly-once removal (`ledger`).
//!
//! # Invariants
//! - Removing one hook never disturbs hooks installed before or after it.
//! - A failure on one target never blocks installs on other targets.

pub mod chain;
pub mod ledger;
