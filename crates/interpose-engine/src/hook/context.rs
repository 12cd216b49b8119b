//! Hook Context: the live record for one hooked (type, method) pair
//!
//! ```text
//! absent --create--> active (>= 1 interceptor) --last removed--> absent
//!                       |
//!                       +-- slot re-patched by a third party --> tampered
//! ```
//!
//! A tampered context never becomes active again: it accepts no new
//! interceptors and never writes to its slot, it is only drained.

use super::call::{HookCall, Next};
use super::interceptor::{AfterFn, BeforeFn, InsteadFn, Interceptor};
use crate::dispatch::{self, Original};
use crate::error::{HookError, HookResult};
use crate::signature::MethodSignature;
use interpose_runtime::{Imp, MethodId, ObjectRef, RuntimeError, RuntimeResult, TypeRef, Value};
use parking_lot::RwLock;
use std::sync::Arc;

/// Interceptor chains, partitioned by mode, in registration order
#[derive(Default, Clone)]
pub(crate) struct Chains {
    before: Vec<Arc<BeforeFn>>,
    instead: Vec<Arc<InsteadFn>>,
    after: Vec<Arc<AfterFn>>,
    added: Vec<Imp>,
}

impl Chains {
    fn len(&self) -> usize {
        self.before.len() + self.instead.len() + self.after.len() + self.added.len()
    }

    fn contains(&self, interceptor: &Interceptor) -> bool {
        let addr = interceptor.addr();
        match interceptor {
            Interceptor::Before(_) => self.before.iter().any(|f| arc_addr(f) == addr),
            Interceptor::After(_) => self.after.iter().any(|f| arc_addr(f) == addr),
            Interceptor::Instead(_) => self.instead.iter().any(|f| arc_addr(f) == addr),
            Interceptor::Add { .. } => self.added.iter().any(|imp| imp.addr() == addr),
        }
    }

    fn push(&mut self, interceptor: &Interceptor) {
        match interceptor {
            Interceptor::Before(f) => self.before.push(f.clone()),
            Interceptor::After(f) => self.after.push(f.clone()),
            Interceptor::Instead(f) => self.instead.push(f.clone()),
            Interceptor::Add { imp, .. } => self.added.push(imp.clone()),
        }
    }

    fn remove(&mut self, interceptor: &Interceptor) -> bool {
        let addr = interceptor.addr();
        let before = self.len();
        match interceptor {
            Interceptor::Before(_) => self.before.retain(|f| arc_addr(f) != addr),
            Interceptor::After(_) => self.after.retain(|f| arc_addr(f) != addr),
            Interceptor::Instead(_) => self.instead.retain(|f| arc_addr(f) != addr),
            Interceptor::Add { .. } => self.added.retain(|imp| imp.addr() != addr),
        }
        self.len() != before
    }
}

fn arc_addr<T: ?Sized>(f: &Arc<T>) -> usize {
    Arc::as_ptr(f) as *const () as usize
}

/// The part of a context the replacement implementation captures.
///
/// Chains are copy-on-write: a call runs against the snapshot it started
/// with, so edits made from inside a hooked call apply to later calls.
pub(crate) struct ContextCore {
    method: MethodId,
    original: Original,
    parent: Option<TypeRef>,
    signature: Arc<MethodSignature>,
    chains: RwLock<Arc<Chains>>,
}

impl ContextCore {
    pub(crate) fn method(&self) -> MethodId {
        self.method
    }

    pub(crate) fn signature(&self) -> &Arc<MethodSignature> {
        &self.signature
    }

    fn snapshot(&self) -> Arc<Chains> {
        self.chains.read().clone()
    }

    fn edit<R>(&self, f: impl FnOnce(&mut Chains) -> R) -> R {
        let mut guard = self.chains.write();
        let mut next = Chains::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Run the full chain for one call
    fn dispatch(&self, receiver: &ObjectRef, args: &[Value]) -> RuntimeResult<Value> {
        let chains = self.snapshot();
        let call = HookCall::new(receiver, self.method, args, &self.signature);

        for before in &chains.before {
            before(&call);
        }
        let value = self.run_instead(&chains, chains.instead.len(), &call)?;
        for after in &chains.after {
            after(&call, &value);
        }
        Ok(value)
    }

    /// Run the Instead interceptor at `level` (counted from the first
    /// registered), or the base implementation at level 0. The last
    /// registered Instead interceptor is outermost.
    pub(crate) fn run_instead(&self, chains: &Chains, level: usize, call: &HookCall<'_>) -> RuntimeResult<Value> {
        match level.checked_sub(1) {
            Some(index) => {
                let next = Next::new(self, chains, index, call.receiver());
                (chains.instead[index])(call, &next)
            }
            None => self.call_base(chains, call.receiver(), call.args()),
        }
    }

    fn call_base(&self, chains: &Chains, receiver: &ObjectRef, args: &[Value]) -> RuntimeResult<Value> {
        if let Some(added) = chains.added.last() {
            return added.call(receiver, self.method, args);
        }
        let inherited = match &self.original {
            Original::Own(imp) => return imp.call(receiver, self.method, args),
            Original::Inherited => self.parent.as_ref().and_then(|parent| parent.lookup(self.method)),
            Original::Unimplemented => None,
        };
        match inherited {
            Some(entry) => entry.imp.call(receiver, self.method, args),
            None => Err(RuntimeError::MethodNotFound {
                type_name: receiver.isa().name().to_string(),
                method: self.method,
            }),
        }
    }
}

/// Live record for one hooked (type, method) pair
pub(crate) struct HookContext {
    ty: TypeRef,
    encoding: Arc<str>,
    core: Arc<ContextCore>,
    installed: Imp,
    live: bool,
    tampered: bool,
}

impl HookContext {
    /// Capture the slot's original binding and synthesize the replacement.
    /// Nothing is written to the dispatch table yet.
    pub(crate) fn new(ty: &TypeRef, method: MethodId, encoding: Arc<str>, signature: Arc<MethodSignature>) -> Self {
        let core = Arc::new(ContextCore {
            method,
            original: Original::capture(ty, method),
            parent: ty.parent().cloned(),
            signature,
            chains: RwLock::new(Arc::new(Chains::default())),
        });

        let captured = core.clone();
        let installed = Imp::new(move |receiver, _method, args| captured.dispatch(receiver, args));

        Self {
            ty: ty.clone(),
            encoding,
            core,
            installed,
            live: false,
            tampered: false,
        }
    }

    /// The replacement implementation this context installs
    pub(crate) fn installed(&self) -> &Imp {
        &self.installed
    }

    pub(crate) fn interceptor_count(&self) -> usize {
        self.core.snapshot().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.interceptor_count() == 0
    }

    /// Whether the slot was re-patched by a third party since installation.
    /// Once detected, the context stays tampered.
    pub(crate) fn check_tampered(&mut self) -> bool {
        if self.live && !self.tampered && dispatch::is_changed(&self.ty, self.core.method, &self.installed) {
            self.tampered = true;
        }
        self.tampered
    }

    /// Append an interceptor at the tail of its mode's chain
    pub(crate) fn append(&mut self, interceptor: &Interceptor) -> HookResult<()> {
        if self.check_tampered() {
            return Err(self.tampered_error());
        }

        let chains = self.core.snapshot();
        if chains.contains(interceptor) {
            return Err(HookError::DuplicateInterceptor {
                method: self.core.method,
                mode: interceptor.mode(),
            });
        }
        if let Interceptor::Add { .. } = interceptor {
            let unimplemented = matches!(self.core.original, Original::Unimplemented) && chains.added.is_empty();
            if !unimplemented {
                return Err(HookError::MethodAlreadyImplemented {
                    type_name: self.ty.name().to_string(),
                    method: self.core.method,
                });
            }
        }

        self.core.edit(|chains| chains.push(interceptor));
        Ok(())
    }

    /// Remove an interceptor. Returns false if it was not registered.
    pub(crate) fn remove(&mut self, interceptor: &Interceptor) -> bool {
        self.core.edit(|chains| chains.remove(interceptor))
    }

    /// Write the replacement into the dispatch table
    pub(crate) fn install(&mut self) {
        self.live = true;
        dispatch::install(&self.ty, self.core.method, self.installed.clone(), &self.encoding);
    }

    /// Put the original binding back. Never called on a tampered context.
    pub(crate) fn restore(&self) {
        debug_assert!(!self.tampered);
        dispatch::restore(&self.ty, self.core.method, &self.core.original, &self.encoding);
    }

    pub(crate) fn tampered_error(&self) -> HookError {
        HookError::TamperedImplementation {
            type_name: self.ty.name().to_string(),
            method: self.core.method,
        }
    }
}
