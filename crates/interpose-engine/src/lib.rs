//! Interpose Engine
//!
//! Runtime method interception for the `interpose-runtime` object model:
//! - **Hooks**: install Before, After, Instead and Add interceptors on a
//!   (type, method) pair or on a single instance, chain any number of them,
//!   and revert each one independently (`hook` module, [`Interposer`])
//! - **Invocations**: reify a method call from its type encoding, read and
//!   rewrite its slots, replay it against any target (`invocation` module)
//! - **Proxies**: forward every unhandled message to a target through an
//!   optional inspection handler (`proxy` module)
//! - **Signatures**: decode dispatch-table type encodings into slot tags
//!   (`signature` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use interpose_engine::{Interceptor, Interposer};
//! use interpose_runtime::{Imp, MethodId, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let greeter = runtime.define_type("Greeter", None)?;
//! let greet = MethodId::intern("greet");
//! greeter.add_method(greet, Imp::new(|_, _, _| Ok(Value::I32(1))), "i@:")?;
//!
//! let engine = Interposer::new(&runtime);
//! let token = engine.hook(&greeter, greet, Interceptor::before(|call| {
//!     println!("{} received {}", call.receiver().id(), call.method());
//! }))?;
//!
//! let object = runtime.instantiate(&greeter);
//! runtime.send(&object, greet, &[])?;
//! token.revert()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Declared first so its macros are visible to every module below
#[macro_use]
pub mod log;

// ============================================================================
// Core Modules
// ============================================================================

/// Default configuration constants
pub mod defaults;

/// Dispatch-table reads and writes
pub mod dispatch;

/// The interposer: hook registry and critical section
pub mod engine;

/// Error types
pub mod error;

/// Interceptors, hook contexts, shadow types and tokens
pub mod hook;

/// Reified method calls and value marshaling
pub mod invocation;

/// Engine configuration
pub mod options;

/// Forwarding proxies
pub mod proxy;

/// Type encoding decoding
pub mod signature;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{HookTarget, Interposer};
pub use error::{HookError, HookResult};
pub use hook::{
    DeallocationState, DeallocationToken, HookCall, HookMode, HookState, HookToken, Interceptor, Next,
};
pub use invocation::{perform, BoxedValue, Invocation, Number, Slot};
pub use log::{logging_enabled, set_logging_enabled};
pub use options::InterposerOptions;
pub use proxy::{is_proxy, Proxy, ProxyHandler};
pub use signature::{EncodingError, MethodSignature, SignatureReader, TypeTag};
