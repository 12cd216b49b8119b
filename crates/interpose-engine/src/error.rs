//! Error types for the interception engine

use crate::hook::HookMode;
use crate::signature::EncodingError;
use interpose_runtime::{MethodId, ObjectId, RuntimeError};

/// Result type for engine operations
pub type HookResult<T> = Result<T, HookError>;

/// Engine error types
///
/// Every variant is a local, recoverable condition. Contract violations
/// (argument count mismatch on [`Invocation::set_arguments`], malformed type
/// encodings) panic instead.
///
/// [`Invocation::set_arguments`]: crate::Invocation::set_arguments
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    /// The method is absent from the type's dispatch table
    #[error("Type `{type_name}` does not implement `{method}`")]
    MethodNotFound {
        /// Name of the type
        type_name: String,
        /// The missing method
        method: MethodId,
    },

    /// The method resolves but its implementation could not be retrieved
    #[error("Implementation of `{method}` on `{type_name}` could not be retrieved")]
    ImplementationLookupFailed {
        /// Name of the type
        type_name: String,
        /// The method
        method: MethodId,
    },

    /// A third party re-patched a dispatch-table entry this engine installed
    #[error("Implementation of `{method}` on `{type_name}` was replaced by a third party")]
    TamperedImplementation {
        /// Name of the patched type
        type_name: String,
        /// The patched method
        method: MethodId,
    },

    /// The instance is already wrapped by conflicting instrumentation
    #[error("Object {object} is already instrumented by `{type_name}`")]
    IncompatibleInstrumentation {
        /// The instance
        object: ObjectId,
        /// Name of the conflicting effective type
        type_name: String,
    },

    /// The target cannot be re-typed or hooked at all
    #[error("Unsupported hook target: {0}")]
    UnsupportedTarget(String),

    /// The same interceptor is already registered for this mode and context
    #[error("Interceptor already registered for `{method}` in {mode} mode")]
    DuplicateInterceptor {
        /// The hooked method
        method: MethodId,
        /// The mode the interceptor was registered in
        mode: HookMode,
    },

    /// apply/revert called out of order
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Caller-supplied argument list does not match the method signature
    #[error("Expected {expected} arguments, got {got}")]
    ArgumentCountMismatch {
        /// Arguments the signature declares
        expected: usize,
        /// Arguments supplied
        got: usize,
    },

    /// The invocation's target has been destroyed
    #[error("Invocation target no longer exists")]
    TargetGone,

    /// Add mode on a method the target already responds to
    #[error("Type `{type_name}` already responds to `{method}`")]
    MethodAlreadyImplemented {
        /// Name of the type
        type_name: String,
        /// The method
        method: MethodId,
    },

    /// A proxy received a message its target does not respond to
    #[error("Proxy target does not respond to `{method}`")]
    SelectorNotFound {
        /// The unhandled method
        method: MethodId,
    },

    /// A boxed value does not fit the slot's type tag
    #[error("Expected {expected} value, got {got}")]
    ValueMismatch {
        /// Tag of the slot
        expected: &'static str,
        /// Kind of the value supplied
        got: &'static str,
    },

    /// The method's type encoding cannot be represented
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Error raised by the runtime or a method implementation
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl HookError {
    /// Convert to a runtime error, for reporting through a dispatch path
    pub fn into_runtime(self) -> RuntimeError {
        match self {
            HookError::Runtime(err) => err,
            other => RuntimeError::Failed(other.to_string()),
        }
    }
}
