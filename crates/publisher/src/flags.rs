//! Runtime feature flags consulted on every publish.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::env_parse;

/// Switches that can change while the process runs.
pub trait FeatureFlags: Send + Sync {
    /// Whether handlers may run in-process at all.
    fn local_domain_event_handling_enabled(&self) -> bool;
}

/// Flags held in memory and flipped through setters.
#[derive(Debug)]
pub struct StaticFeatureFlags {
    local_handling: AtomicBool,
}

impl StaticFeatureFlags {
    pub fn new(local_handling: bool) -> Self {
        Self {
            local_handling: AtomicBool::new(local_handling),
        }
    }

    /// Reads `LOCAL_DOMAIN_EVENT_HANDLING_ENABLED` (default: `true`).
    pub fn from_env() -> Self {
        Self::new(env_parse("LOCAL_DOMAIN_EVENT_HANDLING_ENABLED").unwrap_or(true))
    }

    pub fn set_local_domain_event_handling(&self, enabled: bool) {
        self.local_handling.store(enabled, Ordering::Relaxed);
    }
}

impl Default for StaticFeatureFlags {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn local_domain_event_handling_enabled(&self) -> bool {
        self.local_handling.load(Ordering::Relaxed)
    }
}
