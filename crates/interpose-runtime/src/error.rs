//! Error types for the object runtime

use crate::method::MethodId;
use crate::object::ObjectId;

/// Result type for runtime operations and method implementations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// No implementation or forwarding fallback handled the message
    #[error("Type `{type_name}` does not respond to `{method}`")]
    MethodNotFound {
        /// Name of the receiver's effective type
        type_name: String,
        /// The unresolved method
        method: MethodId,
    },

    /// `add_method` on a type that already has its own entry
    #[error("Type `{type_name}` already implements `{method}`")]
    AlreadyImplemented {
        /// Name of the type
        type_name: String,
        /// The method that is already present
        method: MethodId,
    },

    /// A type with this name is already registered
    #[error("Type `{0}` is already registered")]
    DuplicateType(String),

    /// The object's representation cannot change type (interned/tagged values)
    #[error("Object {0} cannot be re-typed")]
    NotRetypeable(ObjectId),

    /// Failure raised by a method implementation
    #[error("{0}")]
    Failed(String),

    /// A method implementation panicked (only produced by `try_send`)
    #[error("Method panicked: {0}")]
    Panicked(String),
}

impl From<String> for RuntimeError {
    fn from(s: String) -> Self {
        RuntimeError::Failed(s)
    }
}

impl From<&str> for RuntimeError {
    fn from(s: &str) -> Self {
        RuntimeError::Failed(s.to_string())
    }
}
