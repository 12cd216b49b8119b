//! Engine configuration

use crate::defaults::{DEFAULT_SHADOW_TYPE_PREFIX, DEFAULT_SIGNATURE_CACHE};

/// Configuration for an [`Interposer`](crate::Interposer)
#[derive(Debug, Clone)]
pub struct InterposerOptions {
    /// Turn on the process-wide lifecycle logging toggle at construction
    pub log_events: bool,

    /// Prefix used when naming synthesized shadow types
    pub shadow_type_prefix: String,

    /// Cache decoded method signatures per (type, method)
    pub signature_cache: bool,
}

impl Default for InterposerOptions {
    fn default() -> Self {
        Self {
            log_events: false,
            shadow_type_prefix: DEFAULT_SHADOW_TYPE_PREFIX.to_string(),
            signature_cache: DEFAULT_SIGNATURE_CACHE,
        }
    }
}
