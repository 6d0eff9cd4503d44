//! Dynamic capability resolution.
//!
//! # Responsibility
//! - Find host exports by structure (`shape`), disambiguate them by trial
//!   invocation (`probe`), and memoize accepted handles (`cache`).
//!
//! # Invariants
//! - Consumers obtain host capabilities only through `CapabilityResolver`.
//! - Structural and verification failures are values, never panics.

pub mod cache;
pub mod probe;
pub mod resolver;
pub mod shape;
