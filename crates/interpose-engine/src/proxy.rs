//! Forwarding proxies
//!
//! A [`Proxy`] is a runtime object whose type implements nothing but
//! `isProxy`. Every other message falls through to the type's forwarding
//! fallback, which:
//!
//! 1. reads the method signature off the target's effective type,
//! 2. captures the call as an [`Invocation`] bound to the target,
//! 3. hands it to the optional handler for inspection or mutation,
//! 4. invokes it and returns the return slot.
//!
//! Messages the target does not respond to are not handled by the fallback,
//! so a plain send reports `MethodNotFound` and [`Proxy::send`] reports
//! [`HookError::SelectorNotFound`].

use crate::defaults::{IS_PROXY_METHOD, PROXY_ROOT_TYPE_NAME, PROXY_TYPE_PREFIX};
use crate::engine::Interposer;
use crate::error::{HookError, HookResult};
use crate::invocation::Invocation;
use crate::signature::SignatureReader;
use interpose_runtime::{
    Imp, MethodId, ObjectRef, Runtime, RuntimeError, RuntimeResult, TypeKind, TypeRef, Value,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for proxy type names
static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Caller-supplied hook run on every forwarded call before it is invoked.
/// It may rewrite arguments or retarget the invocation.
pub type ProxyHandler = dyn Fn(&mut Invocation) + Send + Sync;

/// A forwarding proxy for one target object
pub struct Proxy {
    object: ObjectRef,
    target: ObjectRef,
    ty: TypeRef,
    reader: Arc<SignatureReader>,
}

impl Proxy {
    /// Create a proxy for `target`
    pub fn new(engine: &Interposer, target: &ObjectRef, handler: Option<Arc<ProxyHandler>>) -> HookResult<Self> {
        let runtime = engine.runtime();
        let root = proxy_root(runtime)?;
        let id = NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed);
        let ty = runtime.allocate_type(&format!("{}{}", PROXY_TYPE_PREFIX, id), Some(&root), TypeKind::Proxy)?;

        let reader = engine.signatures().clone();
        let forwarded = target.clone();
        let forward_reader = reader.clone();
        ty.set_forwarder(move |_proxy, method, args| {
            forward(&forward_reader, &forwarded, handler.as_deref(), method, args)
        });

        let object = runtime.instantiate(&ty);
        let owner = runtime.clone();
        let torn_down = ty.clone();
        object.add_teardown(move || {
            torn_down.clear_forwarder();
            owner.unregister_type(&torn_down);
        });

        log_event!(proxy = ty.name(), target = %target.id(), "created proxy");
        Ok(Self {
            object,
            target: target.clone(),
            ty,
            reader,
        })
    }

    /// The proxy object. Messages sent to it reach the target.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// The wrapped target
    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    /// Send a message through the proxy
    pub fn send(&self, method: MethodId, args: &[Value]) -> HookResult<Value> {
        if !self.ty.responds_to(method) && self.reader.decode(&self.target.isa(), method)?.is_none() {
            return Err(HookError::SelectorNotFound { method });
        }
        Ok(self.object.try_send(method, args)?)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("object", &self.object.id())
            .field("target", &self.target.id())
            .field("type", &self.ty.name())
            .finish()
    }
}

/// Whether `object` is a proxy created by this module
pub fn is_proxy(object: &ObjectRef) -> bool {
    object.isa().ancestors().any(|ty| ty.kind() == TypeKind::Proxy)
}

fn forward(
    reader: &SignatureReader,
    target: &ObjectRef,
    handler: Option<&ProxyHandler>,
    method: MethodId,
    args: &[Value],
) -> Option<RuntimeResult<Value>> {
    let signature = match reader.decode(&target.isa(), method) {
        Ok(Some(signature)) => signature,
        Ok(None) => return None,
        Err(err) => return Some(Err(HookError::from(err).into_runtime())),
    };

    let mut invocation = Invocation::from_call(target, method, signature, args);
    if let Some(handler) = handler {
        handler(&mut invocation);
    }
    Some(
        invocation
            .invoke()
            .map(|()| invocation.return_value().clone())
            .map_err(HookError::into_runtime),
    )
}

/// The shared root of all proxy types, created on first use
fn proxy_root(runtime: &Runtime) -> HookResult<TypeRef> {
    let root = match runtime.type_named(PROXY_ROOT_TYPE_NAME) {
        Some(root) => root,
        None => match runtime.define_type(PROXY_ROOT_TYPE_NAME, None) {
            Ok(root) => root,
            Err(RuntimeError::DuplicateType(_)) => runtime
                .type_named(PROXY_ROOT_TYPE_NAME)
                .ok_or(HookError::InvalidState("proxy root type vanished"))?,
            Err(err) => return Err(err.into()),
        },
    };

    let is_proxy = MethodId::intern(IS_PROXY_METHOD);
    if root.own_method(is_proxy).is_none() {
        let imp = Imp::new(|_, _, _| Ok(Value::Bool(true)));
        match root.add_method(is_proxy, imp, "B@:") {
            Ok(()) | Err(RuntimeError::AlreadyImplemented { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(root)
}
