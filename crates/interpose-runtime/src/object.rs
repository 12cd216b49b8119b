//! Object instances
//!
//! An object carries an identity, an *effective type* (the type its messages
//! are dispatched through, which can be swapped at runtime), and a list of
//! teardown callbacks run when the last strong reference goes away.

use crate::error::{RuntimeError, RuntimeResult};
use crate::method::MethodId;
use crate::runtime::panic_message;
use crate::types::TypeRef;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Global counter for generating unique object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique object identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle for a registered teardown callback
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TeardownId(u64);

struct Teardown {
    id: TeardownId,
    callback: Box<dyn FnOnce() + Send>,
}

struct ObjectData {
    id: ObjectId,
    isa: RwLock<TypeRef>,
    retypeable: bool,
    teardown: Mutex<Vec<Teardown>>,
    next_teardown: AtomicU64,
}

impl Drop for ObjectData {
    fn drop(&mut self) {
        let callbacks = std::mem::take(self.teardown.get_mut());
        for teardown in callbacks.into_iter().rev() {
            (teardown.callback)();
        }
    }
}

/// Strong reference to an object
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectData>);

/// Weak reference to an object; does not keep it alive
#[derive(Clone)]
pub struct WeakObjectRef {
    id: ObjectId,
    inner: Weak<ObjectData>,
}

impl ObjectRef {
    pub(crate) fn new(isa: TypeRef, retypeable: bool) -> Self {
        ObjectRef(Arc::new(ObjectData {
            id: ObjectId::next(),
            isa: RwLock::new(isa),
            retypeable,
            teardown: Mutex::new(Vec::new()),
            next_teardown: AtomicU64::new(1),
        }))
    }

    /// Object ID
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// The type messages to this object are currently dispatched through
    pub fn isa(&self) -> TypeRef {
        self.0.isa.read().clone()
    }

    /// Swap the object's effective type, returning the previous one
    pub fn set_isa(&self, ty: TypeRef) -> RuntimeResult<TypeRef> {
        if !self.0.retypeable {
            return Err(RuntimeError::NotRetypeable(self.0.id));
        }
        Ok(std::mem::replace(&mut *self.0.isa.write(), ty))
    }

    /// Send a message to this object.
    ///
    /// Resolution order: the effective type, its ancestors, then the nearest
    /// forwarding fallback.
    pub fn send(&self, method: MethodId, args: &[Value]) -> RuntimeResult<Value> {
        let ty = self.isa();
        if let Some(entry) = ty.lookup(method) {
            return entry.imp.call(self, method, args);
        }
        if let Some(forwarder) = ty.find_forwarder() {
            if let Some(result) = forwarder(self, method, args) {
                return result;
            }
        }
        Err(RuntimeError::MethodNotFound {
            type_name: ty.name().to_string(),
            method,
        })
    }

    /// Send a message, converting a panic in the implementation into
    /// [`RuntimeError::Panicked`]
    pub fn try_send(&self, method: MethodId, args: &[Value]) -> RuntimeResult<Value> {
        panic::catch_unwind(AssertUnwindSafe(|| self.send(method, args)))
            .unwrap_or_else(|payload| Err(RuntimeError::Panicked(panic_message(payload))))
    }

    /// Whether the object's effective type may be swapped
    pub fn is_retypeable(&self) -> bool {
        self.0.retypeable
    }

    /// Create a weak reference
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef {
            id: self.0.id,
            inner: Arc::downgrade(&self.0),
        }
    }

    /// Register a callback to run when the object is destroyed.
    ///
    /// Callbacks run in reverse registration order.
    pub fn add_teardown(&self, callback: impl FnOnce() + Send + 'static) -> TeardownId {
        let id = TeardownId(self.0.next_teardown.fetch_add(1, Ordering::Relaxed));
        self.0.teardown.lock().push(Teardown {
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a teardown callback before it runs. Returns false if not found.
    pub fn cancel_teardown(&self, id: TeardownId) -> bool {
        let mut teardown = self.0.teardown.lock();
        match teardown.iter().position(|t| t.id == id) {
            Some(index) => {
                teardown.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of pending teardown callbacks
    pub fn teardown_count(&self) -> usize {
        self.0.teardown.lock().len()
    }

    /// Number of strong references
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.0.id)
            .field("isa", &self.isa().name())
            .finish()
    }
}

impl WeakObjectRef {
    /// ID of the referenced object (valid even after it is gone)
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Get a strong reference if the object is still alive
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.inner.upgrade().map(ObjectRef)
    }

    /// Check whether the object is still alive
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObjectRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
