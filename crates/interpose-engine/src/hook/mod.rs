//! Hook machinery: interceptors, contexts, shadow types and tokens

mod call;
pub(crate) mod context;
mod dealloc;
mod interceptor;
pub(crate) mod scope;
mod token;

pub use call::{HookCall, Next};
pub use dealloc::{DeallocationState, DeallocationToken};
pub use interceptor::{AfterFn, BeforeFn, HookMode, InsteadFn, Interceptor};
pub use token::{HookState, HookToken};

pub(crate) use token::TokenTarget;
