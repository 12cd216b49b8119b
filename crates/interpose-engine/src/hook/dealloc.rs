//! Deallocation observers
//!
//! Runs a closure when an instance is destroyed. This does not go through
//! hook contexts: the closure is attached to the instance's teardown list,
//! which runs in reverse registration order.
//!
//! States: `Registered -> Fired | Cancelled`.

use interpose_runtime::{ObjectRef, TeardownId, WeakObjectRef};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const REGISTERED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// State of a deallocation observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocationState {
    /// Waiting for the instance to be destroyed
    Registered,
    /// The closure ran
    Fired,
    /// Cancelled before the instance was destroyed
    Cancelled,
}

/// Handle for a deallocation observer
pub struct DeallocationToken {
    object: WeakObjectRef,
    teardown: TeardownId,
    state: Arc<AtomicU8>,
}

impl DeallocationToken {
    pub(crate) fn register(object: &ObjectRef, f: impl FnOnce() + Send + 'static) -> Self {
        let state = Arc::new(AtomicU8::new(REGISTERED));
        let observed = state.clone();
        let teardown = object.add_teardown(move || {
            if observed
                .compare_exchange(REGISTERED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                f();
            }
        });
        Self {
            object: object.downgrade(),
            teardown,
            state,
        }
    }

    /// Cancel the observer. Returns false if it already fired or was
    /// cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(REGISTERED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(object) = self.object.upgrade() {
            object.cancel_teardown(self.teardown);
        }
        true
    }

    /// Current state
    pub fn state(&self) -> DeallocationState {
        match self.state.load(Ordering::Acquire) {
            REGISTERED => DeallocationState::Registered,
            FIRED => DeallocationState::Fired,
            _ => DeallocationState::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_runtime::Runtime;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fires_once_on_destruction() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("DeallocFires", None).unwrap();
        let object = runtime.instantiate(&ty);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let token = DeallocationToken::register(&object, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(token.state(), DeallocationState::Registered);

        drop(object);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(token.state(), DeallocationState::Fired);
        assert!(!token.cancel());
    }

    #[test]
    fn test_cancelled_observer_never_fires() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("DeallocCancel", None).unwrap();
        let object = runtime.instantiate(&ty);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let token = DeallocationToken::register(&object, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(token.cancel());
        assert!(!token.cancel());
        assert_eq!(object.teardown_count(), 0);

        drop(object);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(token.state(), DeallocationState::Cancelled);
    }
}
