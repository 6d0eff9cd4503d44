//! Message text helpers used by extensions.

pub mod code_blocks;
