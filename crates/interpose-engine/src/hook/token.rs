//! Hook Token: the caller-facing handle of one registered interceptor
//!
//! ```text
//! Prepared --apply--> Interposed --revert--> Prepared
//!     \                   |
//!      +---- failure ---> Error(reason)   (apply may be retried)
//! ```

use super::interceptor::{HookMode, Interceptor};
use crate::engine::EngineShared;
use crate::error::{HookError, HookResult};
use interpose_runtime::{MethodId, ObjectId, TypeRef, WeakObjectRef};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a token hooks. Instances are held weakly.
#[derive(Clone)]
pub(crate) enum TokenTarget {
    Type(TypeRef),
    Instance(WeakObjectRef),
}

/// Lifecycle state of a [`HookToken`]
#[derive(Debug, Clone)]
pub enum HookState {
    /// Validated, not installed
    Prepared,
    /// Installed and running
    Interposed,
    /// The last apply or revert failed
    Error(HookError),
}

struct TokenInner {
    state: HookState,
    applied_to: Option<TypeRef>,
}

/// Handle for one interceptor registered on one (type or instance, method).
///
/// Dropping a token does not revert it.
pub struct HookToken {
    shared: Arc<EngineShared>,
    target: TokenTarget,
    method: MethodId,
    interceptor: Interceptor,
    inner: Mutex<TokenInner>,
    active: AtomicBool,
}

impl HookToken {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        target: TokenTarget,
        method: MethodId,
        interceptor: Interceptor,
    ) -> Self {
        Self {
            shared,
            target,
            method,
            interceptor,
            inner: Mutex::new(TokenInner {
                state: HookState::Prepared,
                applied_to: None,
            }),
            active: AtomicBool::new(false),
        }
    }

    /// Install the interceptor
    pub fn apply(&self) -> HookResult<()> {
        let mut inner = self.inner.lock();
        if let HookState::Interposed = inner.state {
            return Err(HookError::InvalidState("hook is already interposed"));
        }

        match self.shared.apply(&self.target, self.method, &self.interceptor) {
            Ok(ty) => {
                inner.state = HookState::Interposed;
                inner.applied_to = Some(ty);
                self.active.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                inner.state = HookState::Error(err.clone());
                Err(err)
            }
        }
    }

    /// Remove the interceptor. A no-op unless the token is interposed.
    pub fn revert(&self) -> HookResult<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, HookState::Interposed) {
            return Ok(());
        }
        let Some(ty) = inner.applied_to.take() else {
            return Err(HookError::InvalidState("interposed hook has no patched type"));
        };

        self.active.store(false, Ordering::Release);
        match self.shared.revert(&self.target, &ty, self.method, &self.interceptor) {
            Ok(()) => {
                inner.state = HookState::Prepared;
                Ok(())
            }
            Err(err) => {
                inner.state = HookState::Error(err.clone());
                Err(err)
            }
        }
    }

    /// Whether the interceptor is installed. Safe to call from any thread,
    /// including from inside a hooked call.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current lifecycle state
    pub fn state(&self) -> HookState {
        self.inner.lock().state.clone()
    }

    /// The hooked method
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The interceptor's mode
    pub fn mode(&self) -> HookMode {
        self.interceptor.mode()
    }

    /// The type whose dispatch table is patched while interposed (a shadow
    /// type for instance-scoped hooks)
    pub fn hooked_type(&self) -> Option<TypeRef> {
        self.inner.lock().applied_to.clone()
    }

    /// The hooked instance, for instance-scoped tokens
    pub fn instance(&self) -> Option<ObjectId> {
        match &self.target {
            TokenTarget::Instance(object) => Some(object.id()),
            TokenTarget::Type(_) => None,
        }
    }
}

impl fmt::Debug for HookToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            TokenTarget::Type(ty) => ty.name().to_string(),
            TokenTarget::Instance(object) => format!("instance {}", object.id()),
        };
        f.debug_struct("HookToken")
            .field("target", &target)
            .field("method", &self.method)
            .field("mode", &self.interceptor.mode())
            .field("active", &self.is_active())
            .finish()
    }
}
