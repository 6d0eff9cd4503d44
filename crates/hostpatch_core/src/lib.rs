//! Runtime core for client-side chat app extensions.
//!
//! Extensions locate host components by structure (`resolve`), intercept
//! their methods with reversible hooks (`hook`), and are loaded and unloaded
//! by the extension kernel (`extension`).

pub mod db;
pub mod extension;
pub mod hook;
pub mod host;
pub mod logging;
pub mod resolve;
pub mod schedule;
pub mod storage;
pub mod text;

pub use extension::context::ExtensionContext;
pub use extension::kernel::{Extension, ExtensionError, ExtensionHealth, ExtensionHost};
pub use extension::manifest::ExtensionManifest;
pub use extension::services::{Clipboard, HostServices, LogNotifier, MemoryClipboard, Notifier};
pub use hook::chain::{CallFrame, HookId, HookPhase};
pub use hook::ledger::{
    DisposeFailure, DisposeReport, HookError, HookLedger, HookRecord, HookScope, PatchTarget,
};
pub use host::registry::{ModuleId, ModuleRecord, ModuleRegistryView, ModuleTable};
pub use host::value::{HostError, HostFunction, HostObject, HostResult, HostValue, PlainObject};
pub use logging::{default_log_level, init_logging, logging_status};
pub use resolve::cache::{InvocationError, ResolvedHandle};
pub use resolve::probe::{ProbeOutcome, ProbeSpec};
pub use resolve::resolver::{CapabilityResolver, ResolveError, ResolverConfig};
pub use resolve::shape::{CapabilityShape, ShapeKey};
pub use storage::{ExtensionStorage, ScopedStorage, SqliteExtensionStorage, StorageError};
pub use text::code_blocks::{extract_code_blocks, first_code_block, CodeBlock};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
