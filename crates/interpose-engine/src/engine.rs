//! The interposer: hook registry and critical section
//!
//! All mutation of hook contexts, dispatch-table entries and shadow types
//! happens while holding one re-entrant lock, so an interceptor or teardown
//! callback running on the same thread may install or revert hooks without
//! deadlocking. Dispatch through a hooked method never takes the lock.

use crate::dispatch;
use crate::error::{HookError, HookResult};
use crate::hook::context::HookContext;
use crate::hook::scope::{DeadInstances, Release, ShadowArena};
use crate::hook::{DeallocationToken, HookMode, HookToken, Interceptor, TokenTarget};
use crate::invocation::{self, BoxedValue, Invocation};
use crate::options::InterposerOptions;
use crate::proxy::{Proxy, ProxyHandler};
use crate::signature::{MethodSignature, SignatureReader};
use interpose_runtime::{Imp, MethodId, ObjectRef, Runtime, TypeId, TypeRef};
use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating engine IDs (shadow type ownership)
static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// What a hook applies to
#[derive(Debug, Clone)]
pub enum HookTarget {
    /// Every instance of a type (and of its subtypes that inherit the method)
    Type(TypeRef),
    /// One instance only
    Instance(ObjectRef),
}

impl From<&TypeRef> for HookTarget {
    fn from(ty: &TypeRef) -> Self {
        HookTarget::Type(ty.clone())
    }
}

impl From<&ObjectRef> for HookTarget {
    fn from(object: &ObjectRef) -> Self {
        HookTarget::Instance(object.clone())
    }
}

#[derive(Default)]
struct EngineState {
    contexts: FxHashMap<(TypeId, MethodId), HookContext>,
    shadows: ShadowArena,
}

type StateCell = RefCell<EngineState>;

pub(crate) struct EngineShared {
    id: u64,
    runtime: Runtime,
    options: InterposerOptions,
    signatures: Arc<SignatureReader>,
    state: ReentrantMutex<StateCell>,
    dead: DeadInstances,
}

impl EngineShared {
    /// Forget instances destroyed while shadowed: their shadow types, the
    /// contexts on them and their cached signatures
    fn drain_dead(&self, cell: &StateCell) {
        let dead = std::mem::take(&mut *self.dead.lock());
        if dead.is_empty() {
            return;
        }

        let mut garbage = Vec::new();
        {
            let mut state = cell.borrow_mut();
            for id in dead {
                let Some(shadow) = state.shadows.purge(&self.runtime, id) else {
                    continue;
                };
                let keys: Vec<_> = state
                    .contexts
                    .keys()
                    .filter(|(ty, _)| *ty == shadow.id())
                    .copied()
                    .collect();
                for key in keys {
                    garbage.extend(state.contexts.remove(&key));
                }
                self.signatures.evict_type(shadow.id());
            }
        }
        // Interceptor closures may run arbitrary drop code
        drop(garbage);
    }

    pub(crate) fn apply(
        &self,
        target: &TokenTarget,
        method: MethodId,
        interceptor: &Interceptor,
    ) -> HookResult<TypeRef> {
        let guard = self.state.lock();
        self.drain_dead(&guard);

        match target {
            TokenTarget::Type(ty) => {
                self.attach(&guard, ty, method, interceptor)?;
                Ok(ty.clone())
            }
            TokenTarget::Instance(weak) => {
                let object = weak.upgrade().ok_or(HookError::TargetGone)?;
                let shadow = guard.borrow_mut().shadows.acquire(
                    &self.runtime,
                    self.id,
                    &self.options.shadow_type_prefix,
                    &self.dead,
                    &object,
                )?;
                if let Err(err) = self.attach(&guard, &shadow, method, interceptor) {
                    self.release_shadow(&guard, &object);
                    return Err(err);
                }
                Ok(shadow)
            }
        }
    }

    pub(crate) fn revert(
        &self,
        target: &TokenTarget,
        applied_to: &TypeRef,
        method: MethodId,
        interceptor: &Interceptor,
    ) -> HookResult<()> {
        let guard = self.state.lock();
        self.drain_dead(&guard);

        let result = self.detach(&guard, applied_to, method, interceptor);
        if let TokenTarget::Instance(weak) = target {
            // A tampered shadow keeps its consumer until the instance dies
            if result.is_ok() {
                if let Some(object) = weak.upgrade() {
                    self.release_shadow(&guard, &object);
                }
            }
        }
        result
    }

    fn release_shadow(&self, cell: &StateCell, object: &ObjectRef) {
        let release = cell.borrow_mut().shadows.release(&self.runtime, object);
        if let Release::TornDown(shadow) = release {
            self.signatures.evict_type(shadow.id());
        }
    }

    /// Append an interceptor to the context for (ty, method), creating and
    /// installing the context on first use
    fn attach(&self, cell: &StateCell, ty: &TypeRef, method: MethodId, interceptor: &Interceptor) -> HookResult<()> {
        let key = (ty.id(), method);
        let mut state = cell.borrow_mut();
        if let Some(ctx) = state.contexts.get_mut(&key) {
            ctx.append(interceptor)?;
            log_event!(ty = ty.name(), %method, mode = %interceptor.mode(), "appended interceptor");
            return Ok(());
        }

        let (encoding, signature) = match interceptor {
            Interceptor::Add { encoding, .. } => {
                if ty.responds_to(method) {
                    return Err(HookError::MethodAlreadyImplemented {
                        type_name: ty.name().to_string(),
                        method,
                    });
                }
                (encoding.clone(), Arc::new(MethodSignature::parse(encoding)?))
            }
            _ => {
                let entry = ty.lookup(method).ok_or_else(|| HookError::MethodNotFound {
                    type_name: ty.name().to_string(),
                    method,
                })?;
                let signature = self
                    .signatures
                    .decode(ty, method)?
                    .ok_or_else(|| HookError::ImplementationLookupFailed {
                        type_name: ty.name().to_string(),
                        method,
                    })?;
                (entry.encoding, signature)
            }
        };

        let mut ctx = HookContext::new(ty, method, encoding, signature);
        ctx.append(interceptor)?;
        ctx.install();
        if interceptor.mode() == HookMode::Add {
            self.signatures.evict_method(method);
        }
        log_event!(ty = ty.name(), %method, mode = %interceptor.mode(), "created hook context");
        state.contexts.insert(key, ctx);
        Ok(())
    }

    /// Remove an interceptor, tearing the context down when its chains are
    /// empty. A tampered slot is never written to.
    fn detach(&self, cell: &StateCell, ty: &TypeRef, method: MethodId, interceptor: &Interceptor) -> HookResult<()> {
        let key = (ty.id(), method);
        let mut state = cell.borrow_mut();
        let Some(ctx) = state.contexts.get_mut(&key) else {
            // Purged with its instance
            return Ok(());
        };

        let tampered = ctx.check_tampered().then(|| ctx.tampered_error());
        ctx.remove(interceptor);
        let removed = if ctx.is_empty() {
            state.contexts.remove(&key)
        } else {
            None
        };
        drop(state);

        if let Some(ctx) = &removed {
            if tampered.is_some() {
                log_warning!(
                    ty = ty.name(),
                    %method,
                    "implementation replaced by a third party; leaving it in place"
                );
            } else {
                ctx.restore();
                // Restoring may remove an entry other types resolved through
                self.signatures.evict_method(method);
                log_event!(ty = ty.name(), %method, "removed hook context");
            }
        }
        drop(removed);

        match tampered {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The interception engine.
///
/// Owns the registry of hook contexts and the arena of shadow types for one
/// runtime. Cloning shares the same registry.
#[derive(Clone)]
pub struct Interposer {
    shared: Arc<EngineShared>,
}

impl Interposer {
    /// Create an engine with default options
    pub fn new(runtime: &Runtime) -> Self {
        Self::with_options(runtime, InterposerOptions::default())
    }

    /// Create an engine with custom options
    pub fn with_options(runtime: &Runtime, options: InterposerOptions) -> Self {
        if options.log_events {
            crate::log::set_logging_enabled(true);
        }
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        log_event!(engine = id, "created interposer");

        Self {
            shared: Arc::new(EngineShared {
                id,
                runtime: runtime.clone(),
                signatures: Arc::new(SignatureReader::new(options.signature_cache)),
                options,
                state: ReentrantMutex::new(RefCell::new(EngineState::default())),
                dead: DeadInstances::default(),
            }),
        }
    }

    /// The runtime this engine patches
    pub fn runtime(&self) -> &Runtime {
        &self.shared.runtime
    }

    /// Engine options
    pub fn options(&self) -> &InterposerOptions {
        &self.shared.options
    }

    /// The engine's signature reader
    pub fn signatures(&self) -> &Arc<SignatureReader> {
        &self.shared.signatures
    }

    /// Validate a hook request and return a token that is not applied yet
    pub fn prepare(
        &self,
        target: impl Into<HookTarget>,
        method: MethodId,
        interceptor: Interceptor,
    ) -> HookResult<HookToken> {
        let target = target.into();
        let (ty, token_target) = match &target {
            HookTarget::Type(ty) => (ty.clone(), TokenTarget::Type(ty.clone())),
            HookTarget::Instance(object) => {
                if !object.is_retypeable() {
                    return Err(HookError::UnsupportedTarget(format!(
                        "object {} cannot be re-typed",
                        object.id()
                    )));
                }
                (object.isa(), TokenTarget::Instance(object.downgrade()))
            }
        };

        match &interceptor {
            Interceptor::Add { encoding, .. } => {
                if ty.responds_to(method) {
                    return Err(HookError::MethodAlreadyImplemented {
                        type_name: ty.name().to_string(),
                        method,
                    });
                }
                MethodSignature::parse(encoding)?;
            }
            _ => {
                if self.shared.signatures.decode(&ty, method)?.is_none() {
                    return Err(HookError::MethodNotFound {
                        type_name: ty.name().to_string(),
                        method,
                    });
                }
            }
        }

        Ok(HookToken::new(self.shared.clone(), token_target, method, interceptor))
    }

    /// Prepare and apply a hook
    pub fn hook(
        &self,
        target: impl Into<HookTarget>,
        method: MethodId,
        interceptor: Interceptor,
    ) -> HookResult<HookToken> {
        let token = self.prepare(target, method, interceptor)?;
        token.apply()?;
        Ok(token)
    }

    /// Run `f` when `object` is destroyed
    pub fn on_deallocation(&self, object: &ObjectRef, f: impl FnOnce() + Send + 'static) -> DeallocationToken {
        DeallocationToken::register(object, f)
    }

    /// Whether a hook context exists for (ty, method)
    pub fn is_hooked(&self, ty: &TypeRef, method: MethodId) -> bool {
        let guard = self.shared.state.lock();
        self.shared.drain_dead(&guard);
        let hooked = guard.borrow().contexts.contains_key(&(ty.id(), method));
        hooked
    }

    /// Number of interceptors registered on (ty, method)
    pub fn interceptor_count(&self, ty: &TypeRef, method: MethodId) -> usize {
        let guard = self.shared.state.lock();
        self.shared.drain_dead(&guard);
        let count = guard
            .borrow()
            .contexts
            .get(&(ty.id(), method))
            .map_or(0, HookContext::interceptor_count);
        count
    }

    /// Number of live hook contexts
    pub fn context_count(&self) -> usize {
        let guard = self.shared.state.lock();
        self.shared.drain_dead(&guard);
        let count = guard.borrow().contexts.len();
        count
    }

    /// The shadow type this engine put `object` on, if any
    pub fn shadow_type_of(&self, object: &ObjectRef) -> Option<TypeRef> {
        let guard = self.shared.state.lock();
        self.shared.drain_dead(&guard);
        let shadow = guard.borrow().shadows.shadow_of(object.id());
        shadow
    }

    /// The replacement implementation installed for (ty, method)
    pub fn installed_implementation(&self, ty: &TypeRef, method: MethodId) -> Option<Imp> {
        let guard = self.shared.state.lock();
        let imp = guard
            .borrow()
            .contexts
            .get(&(ty.id(), method))
            .map(|ctx| ctx.installed().clone());
        imp
    }

    /// Whether a third party replaced the implementation installed for
    /// (ty, method)
    pub fn is_tampered(&self, ty: &TypeRef, method: MethodId) -> bool {
        self.installed_implementation(ty, method)
            .is_some_and(|installed| dispatch::is_changed(ty, method, &installed))
    }

    /// Signature of `method` as resolved on `ty`
    pub fn signature(&self, ty: &TypeRef, method: MethodId) -> Option<Arc<MethodSignature>> {
        self.shared.signatures.signature(ty, method)
    }

    /// Build an invocation for a method `target` responds to
    pub fn invocation(&self, target: &ObjectRef, method: MethodId) -> HookResult<Invocation> {
        Invocation::for_target(&self.shared.signatures, target, method)
    }

    /// Send a message with boxed arguments (see [`invocation::perform`])
    pub fn perform(&self, target: &ObjectRef, method: MethodId, arguments: Vec<BoxedValue>) -> HookResult<BoxedValue> {
        invocation::perform(&self.shared.signatures, target, method, arguments)
    }

    /// Wrap `target` in a forwarding proxy
    pub fn proxy(&self, target: &ObjectRef, handler: Option<Arc<ProxyHandler>>) -> HookResult<Proxy> {
        Proxy::new(self, target, handler)
    }
}

impl std::fmt::Debug for Interposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interposer")
            .field("id", &self.shared.id)
            .field("options", &self.shared.options)
            .finish()
    }
}
