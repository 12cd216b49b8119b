//! Dispatch Table Editor
//!
//! Every dispatch-table read and write the engine performs goes through this
//! module, so each write can later be compared against what is in the table.

use interpose_runtime::{Imp, MethodId, TypeRef};

/// How a hooked slot was bound before the engine first wrote to it
#[derive(Debug, Clone)]
pub enum Original {
    /// The type had its own implementation
    Own(Imp),
    /// The type inherited the method; the parent's current implementation is
    /// resolved at call time
    Inherited,
    /// Nothing in the chain implemented the method (Add mode)
    Unimplemented,
}

impl Original {
    /// Capture how `method` is currently bound on `ty`
    pub fn capture(ty: &TypeRef, method: MethodId) -> Self {
        if let Some(entry) = ty.own_method(method) {
            Original::Own(entry.imp)
        } else if ty.parent().is_some_and(|parent| parent.responds_to(method)) {
            Original::Inherited
        } else {
            Original::Unimplemented
        }
    }
}

/// Implementation that runs when `method` is sent to an instance of `ty`
pub fn current_implementation(ty: &TypeRef, method: MethodId) -> Option<Imp> {
    ty.lookup(method).map(|entry| entry.imp)
}

/// `ty`'s own implementation, ignoring ancestors
pub fn own_implementation(ty: &TypeRef, method: MethodId) -> Option<Imp> {
    ty.own_method(method).map(|entry| entry.imp)
}

/// Bind `imp` as `ty`'s own implementation of `method`, returning the
/// previous own implementation
pub fn install(ty: &TypeRef, method: MethodId, imp: Imp, encoding: &str) -> Option<Imp> {
    ty.replace_method(method, imp, encoding)
}

/// Put the slot back the way [`Original::capture`] found it
pub fn restore(ty: &TypeRef, method: MethodId, original: &Original, encoding: &str) {
    match original {
        Original::Own(imp) => {
            ty.replace_method(method, imp.clone(), encoding);
        }
        Original::Inherited | Original::Unimplemented => {
            ty.remove_method(method);
        }
    }
}

/// Whether the slot no longer holds `installed`, i.e. a third party
/// re-patched it after the engine's last write
pub fn is_changed(ty: &TypeRef, method: MethodId, installed: &Imp) -> bool {
    !own_implementation(ty, method).is_some_and(|current| current.same(installed))
}
