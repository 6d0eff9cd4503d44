//! Extension kernel.
//!
//! # Responsibility
//! - Manifest declaration and capability gates (`manifest`, `capability`).
//! - Host services handed to extensions (`services`, `context`).
//! - Load/unload lifecycle with hook rollback (`kernel`).

pub mod capability;
pub mod context;
pub mod kernel;
pub mod manifest;
pub mod services;
