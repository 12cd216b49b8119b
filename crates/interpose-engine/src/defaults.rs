//! Default constants for engine configuration.

/// Prefix of per-instance shadow type names (`<prefix><type>_<object id>`).
pub const DEFAULT_SHADOW_TYPE_PREFIX: &str = "Interpose_";

/// Name of the root type every proxy type derives from.
pub const PROXY_ROOT_TYPE_NAME: &str = "InterposeProxy";

/// Prefix of per-proxy type names.
pub const PROXY_TYPE_PREFIX: &str = "InterposeProxy_";

/// Method every proxy implements locally, answering `true`.
pub const IS_PROXY_METHOD: &str = "isProxy";

/// Signature caching is on unless turned off in options.
pub const DEFAULT_SIGNATURE_CACHE: bool = true;
