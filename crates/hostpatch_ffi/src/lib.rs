//! Flutter-facing bindings for `hostpatch_core`.

pub mod api;
