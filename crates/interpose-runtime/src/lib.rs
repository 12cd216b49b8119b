//! Interpose Runtime
//!
//! A small dynamic object runtime: the host that the interception engine in
//! `interpose-engine` is a client of. It provides:
//! - **Method identifiers**: process-wide interned [`MethodId`]s
//! - **Types**: [`TypeRef`]s with a single-inheritance parent chain, a
//!   dispatch table of [`Imp`]s and per-method type encodings
//! - **Objects**: [`ObjectRef`]s whose effective type can be swapped at
//!   runtime, with weak references and teardown callbacks
//! - **Message send**: [`Runtime::send`] resolves through the receiver's
//!   effective type, its ancestors, and finally any forwarding fallback
//!
//! # Example
//!
//! ```rust,ignore
//! use interpose_runtime::{Imp, MethodId, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let counter = runtime.define_type("Counter", None)?;
//! counter.add_method(
//!     MethodId::intern("answer"),
//!     Imp::new(|_this, _method, _args| Ok(Value::I64(42))),
//!     "q@:",
//! )?;
//!
//! let object = runtime.instantiate(&counter);
//! let result = runtime.send(&object, MethodId::intern("answer"), &[])?;
//! assert_eq!(result, Value::I64(42));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod imp;
pub mod method;
pub mod object;
pub mod runtime;
pub mod types;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use imp::{Imp, ImpFn};
pub use method::MethodId;
pub use object::{ObjectId, ObjectRef, TeardownId, WeakObjectRef};
pub use runtime::Runtime;
pub use types::{ForwardFn, MethodEntry, RuntimeType, TypeId, TypeKind, TypeRef};
pub use value::{Block, BlockFn, Value};
