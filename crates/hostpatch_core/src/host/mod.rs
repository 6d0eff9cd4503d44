//! Host-facing data model.
//!
//! # Responsibility
//! - Model loader exports as opaque structural values.
//! - Expose the module table as a read-only view.
//!
//! # Invariants
//! - Nothing in this module assumes a nominal type for an export.

pub mod registry;
pub mod value;
