//! Method implementations (the runtime's "function pointers")

use crate::error::RuntimeResult;
use crate::method::MethodId;
use crate::object::ObjectRef;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Signature shared by every method implementation
pub type ImpFn = dyn Fn(&ObjectRef, MethodId, &[Value]) -> RuntimeResult<Value> + Send + Sync;

/// A method implementation bound into a dispatch table.
///
/// Cloning an `Imp` shares the same closure; two `Imp`s compare equal only if
/// they are the same allocation, which is what "the same function pointer"
/// means for dispatch-table comparisons.
#[derive(Clone)]
pub struct Imp(Arc<ImpFn>);

impl Imp {
    /// Wrap a closure as an implementation
    pub fn new(
        f: impl Fn(&ObjectRef, MethodId, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Imp(Arc::new(f))
    }

    /// Call the implementation
    #[inline]
    pub fn call(&self, receiver: &ObjectRef, method: MethodId, args: &[Value]) -> RuntimeResult<Value> {
        (self.0)(receiver, method, args)
    }

    /// Address of the shared closure, used as the implementation's identity
    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Check whether two handles refer to the same implementation
    #[inline]
    pub fn same(&self, other: &Imp) -> bool {
        self.addr() == other.addr()
    }
}

impl PartialEq for Imp {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Imp {}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imp({:#x})", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_survives_clone() {
        let imp = Imp::new(|_, _, _| Ok(Value::Void));
        let copy = imp.clone();
        assert!(imp.same(&copy));
        assert_eq!(imp, copy);
    }

    #[test]
    fn test_distinct_closures_differ() {
        let a = Imp::new(|_, _, _| Ok(Value::I32(1)));
        let b = Imp::new(|_, _, _| Ok(Value::I32(1)));
        assert_ne!(a, b);
    }
}
