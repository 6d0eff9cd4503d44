//! Capability resolver facade.
//!
//! # Responsibility
//! - Serve `resolve(shape, probe)` from the handle cache when possible.
//! - On a miss, run shape matching then probe verification and store the
//!   accepted handle.
//!
//! # Invariants
//! - Cache key comes from the shape only; probes never affect it.
//! - Successes are cached, failures are not.
//! - Resolution never panics and never returns host exceptions.

use crate::host::registry::ModuleRegistryView;
use crate::resolve::cache::{HandleCache, ResolvedHandle};
use crate::resolve::probe::{select_candidate, ProbeSpec, Rejection, Selection};
use crate::resolve::shape::{find_candidates, CapabilityShape};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Environment variable overriding `max_probe_candidates`.
pub const MAX_PROBE_CANDIDATES_ENV: &str = "HOSTPATCH_MAX_PROBE_CANDIDATES";
const DEFAULT_MAX_PROBE_CANDIDATES: usize = 64;

/// Resolver tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Upper bound of candidates invoked per resolution.
    pub max_probe_candidates: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_probe_candidates: DEFAULT_MAX_PROBE_CANDIDATES,
        }
    }
}

impl ResolverConfig {
    /// Reads overrides from the process environment.
    ///
    /// Unparseable or zero values fall back to the default.
    pub fn from_env() -> Self {
        let max_probe_candidates = std::env::var(MAX_PROBE_CANDIDATES_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_PROBE_CANDIDATES);
        Self {
            max_probe_candidates,
        }
    }
}

/// Discriminated resolution failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Shape carries no criterion.
    EmptyShape,
    /// No export matched structurally.
    ShapeNotFound { shape_key: String },
    /// Exports matched but none passed the probe.
    VerificationFailed {
        shape_key: String,
        candidates: usize,
        rejections: Vec<Rejection>,
        truncated: bool,
    },
}

impl ResolveError {
    /// One-line explanation suitable for a user notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyShape => "Extension requested an empty capability.".to_string(),
            Self::ShapeNotFound { .. } => {
                "A required app component was not found; this app version is not supported."
                    .to_string()
            }
            Self::VerificationFailed { .. } => {
                "A required app component could not be verified on this app version.".to_string()
            }
        }
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyShape => write!(f, "capability shape has no criteria"),
            Self::ShapeNotFound { shape_key } => {
                write!(f, "no module matches capability `{shape_key}`")
            }
            Self::VerificationFailed {
                shape_key,
                candidates,
                truncated,
                ..
            } => {
                write!(
                    f,
                    "none of {candidates} candidate(s) for `{shape_key}` passed verification"
                )?;
                if *truncated {
                    write!(f, " (probe limit reached)")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for ResolveError {}

/// Shape-driven resolver with an owned success cache.
pub struct CapabilityResolver {
    registry: Arc<dyn ModuleRegistryView>,
    cache: HandleCache,
    config: ResolverConfig,
}

impl CapabilityResolver {
    pub fn new(registry: Arc<dyn ModuleRegistryView>) -> Self {
        Self::with_config(registry, ResolverConfig::default())
    }

    pub fn with_config(registry: Arc<dyn ModuleRegistryView>, config: ResolverConfig) -> Self {
        Self {
            registry,
            cache: HandleCache::new(),
            config,
        }
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    /// Returns the cached handle for `shape` or resolves and caches one.
    pub fn resolve(
        &self,
        shape: &CapabilityShape,
        probe: &ProbeSpec,
    ) -> Result<Arc<ResolvedHandle>, ResolveError> {
        if shape.is_empty() {
            return Err(ResolveError::EmptyShape);
        }

        let key = shape.key();
        if let Some(handle) = self.cache.get(&key) {
            debug!(
                "event=capability_resolve module=resolver status=cache_hit shape={}",
                key
            );
            return Ok(handle);
        }

        let candidates = find_candidates(self.registry.as_ref(), shape);
        match select_candidate(candidates, probe, self.config.max_probe_candidates) {
            Selection::Accepted {
                candidate,
                examined,
            } => {
                info!(
                    "event=capability_resolve module=resolver status=ok shape={} module_id={} via_default={} examined={}",
                    key, candidate.module_id, candidate.via_default, examined
                );
                let handle = ResolvedHandle::new(
                    key,
                    candidate.module_id,
                    candidate.target,
                    candidate.via_default,
                );
                Ok(self.cache.insert_if_absent(handle))
            }
            Selection::NotFound { matched: 0, .. } => {
                warn!(
                    "event=capability_resolve module=resolver status=error error_code=shape_not_found shape={}",
                    key
                );
                Err(ResolveError::ShapeNotFound {
                    shape_key: key.to_string(),
                })
            }
            Selection::NotFound {
                matched,
                rejections,
                truncated,
            } => {
                warn!(
                    "event=capability_resolve module=resolver status=error error_code=verification_failed shape={} candidates={} truncated={}",
                    key, matched, truncated
                );
                Err(ResolveError::VerificationFailed {
                    shape_key: key.to_string(),
                    candidates: matched,
                    rejections,
                    truncated,
                })
            }
        }
    }

    /// Returns the cached handle for `shape` without resolving.
    pub fn cached(&self, shape: &CapabilityShape) -> Option<Arc<ResolvedHandle>> {
        self.cache.get(&shape.key())
    }

    /// Forgets the handle for one shape so the next call re-resolves.
    pub fn invalidate(&self, shape: &CapabilityShape) -> bool {
        self.cache.invalidate(&shape.key())
    }

    /// Drops every cached handle; used when the host reloads.
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(
            "event=capability_cache_clear module=resolver status=ok removed={}",
            removed
        );
        removed
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
