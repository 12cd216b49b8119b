use super::call::{HookCall, Next};
use interpose_runtime::{Imp, RuntimeResult, Value};
use std::fmt;
use std::sync::Arc;

/// Closure run before the underlying call; cannot suppress it
pub type BeforeFn = dyn Fn(&HookCall<'_>) + Send + Sync;

/// Closure run after the underlying call with its return value
pub type AfterFn = dyn Fn(&HookCall<'_>, &Value) + Send + Sync;

/// Closure run in place of the underlying call; `Next` reaches it
pub type InsteadFn = dyn Fn(&HookCall<'_>, &Next<'_>) -> RuntimeResult<Value> + Send + Sync;

/// When an interceptor runs relative to the hooked implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookMode {
    /// Before the implementation
    Before,
    /// After the implementation
    After,
    /// In place of the implementation
    Instead,
    /// As the implementation of a method the target does not implement
    Add,
}

impl fmt::Display for HookMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookMode::Before => "before",
            HookMode::After => "after",
            HookMode::Instead => "instead",
            HookMode::Add => "add",
        })
    }
}

/// Caller-supplied logic tagged with its mode.
///
/// Cloning shares the closure; identity (for duplicate detection and
/// removal) is the closure's address.
#[derive(Clone)]
pub enum Interceptor {
    /// Runs before the implementation, return ignored
    Before(Arc<BeforeFn>),
    /// Runs after the implementation, return ignored
    After(Arc<AfterFn>),
    /// Replaces the implementation; may call through via [`Next`]
    Instead(Arc<InsteadFn>),
    /// Implementation for a method the target does not respond to
    Add {
        /// The implementation to install
        imp: Imp,
        /// Its type encoding
        encoding: Arc<str>,
    },
}

impl Interceptor {
    /// Build a Before interceptor
    pub fn before(f: impl Fn(&HookCall<'_>) + Send + Sync + 'static) -> Self {
        Interceptor::Before(Arc::new(f))
    }

    /// Build an After interceptor
    pub fn after(f: impl Fn(&HookCall<'_>, &Value) + Send + Sync + 'static) -> Self {
        Interceptor::After(Arc::new(f))
    }

    /// Build an Instead interceptor
    pub fn instead(
        f: impl Fn(&HookCall<'_>, &Next<'_>) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Interceptor::Instead(Arc::new(f))
    }

    /// Build an Add interceptor
    pub fn add(imp: Imp, encoding: &str) -> Self {
        Interceptor::Add {
            imp,
            encoding: Arc::from(encoding),
        }
    }

    /// The interceptor's mode
    pub fn mode(&self) -> HookMode {
        match self {
            Interceptor::Before(_) => HookMode::Before,
            Interceptor::After(_) => HookMode::After,
            Interceptor::Instead(_) => HookMode::Instead,
            Interceptor::Add { .. } => HookMode::Add,
        }
    }

    /// Address of the shared closure
    pub fn addr(&self) -> usize {
        match self {
            Interceptor::Before(f) => Arc::as_ptr(f) as *const () as usize,
            Interceptor::After(f) => Arc::as_ptr(f) as *const () as usize,
            Interceptor::Instead(f) => Arc::as_ptr(f) as *const () as usize,
            Interceptor::Add { imp, .. } => imp.addr(),
        }
    }

    /// Same mode and same closure
    pub fn same(&self, other: &Interceptor) -> bool {
        self.mode() == other.mode() && self.addr() == other.addr()
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interceptor::{:?}({:#x})", self.mode(), self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let a = Interceptor::before(|_| {});
        let b = Interceptor::before(|_| {});
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert_eq!(a.mode(), HookMode::Before);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(HookMode::Instead.to_string(), "instead");
        let add = Interceptor::add(Imp::new(|_, _, _| Ok(Value::Void)), "v@:");
        assert_eq!(add.mode(), HookMode::Add);
    }
}
