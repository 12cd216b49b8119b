//! Runtime types and their dispatch tables

use crate::error::{RuntimeError, RuntimeResult};
use crate::imp::Imp;
use crate::method::MethodId;
use crate::object::ObjectRef;
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a runtime type. Never reused within a process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u64);

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

impl TypeId {
    fn next() -> Self {
        TypeId(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// What produced a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// An ordinary, user-defined type
    Regular,
    /// A per-instance type synthesized by an interception engine
    Shadow {
        /// Identifier of the engine that owns the shadow type
        owner: u64,
    },
    /// A per-instance subtype installed by an observation mechanism
    Observation,
    /// A forwarding proxy type
    Proxy,
}

/// One dispatch-table entry
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// The bound implementation
    pub imp: Imp,
    /// Type encoding of the method (return type, receiver, method, arguments)
    pub encoding: Arc<str>,
}

/// Fallback consulted when no type in the chain implements a method.
///
/// Returns `None` when the fallback does not handle the message either.
pub type ForwardFn =
    dyn Fn(&ObjectRef, MethodId, &[Value]) -> Option<RuntimeResult<Value>> + Send + Sync;

/// Runtime type metadata
pub struct RuntimeType {
    id: TypeId,
    name: String,
    parent: Option<TypeRef>,
    kind: TypeKind,
    /// Own dispatch table (inherited entries are resolved through `parent`)
    methods: RwLock<FxHashMap<MethodId, MethodEntry>>,
    forwarder: RwLock<Option<Arc<ForwardFn>>>,
}

/// Shared handle to a runtime type
#[derive(Clone)]
pub struct TypeRef(Arc<RuntimeType>);

impl TypeRef {
    pub(crate) fn new(name: String, parent: Option<TypeRef>, kind: TypeKind) -> Self {
        TypeRef(Arc::new(RuntimeType {
            id: TypeId::next(),
            name,
            parent,
            kind,
            methods: RwLock::new(FxHashMap::default()),
            forwarder: RwLock::new(None),
        }))
    }

    /// Iterate over this type followed by its ancestors, nearest first
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: Some(self.clone()),
        }
    }

    /// Check whether `other` is this type or one of its ancestors
    pub fn is_subtype_of(&self, other: &TypeRef) -> bool {
        self.ancestors().any(|ty| ty == *other)
    }

    /// Resolve a method through the parent chain
    pub fn lookup(&self, method: MethodId) -> Option<MethodEntry> {
        self.ancestors().find_map(|ty| ty.own_method(method))
    }

    /// Check whether instances respond to a method (ignoring forwarding)
    pub fn responds_to(&self, method: MethodId) -> bool {
        self.lookup(method).is_some()
    }

    /// Find the nearest forwarding fallback in the chain
    pub fn find_forwarder(&self) -> Option<Arc<ForwardFn>> {
        self.ancestors().find_map(|ty| ty.forwarder())
    }
}

impl Deref for TypeRef {
    type Target = RuntimeType;

    fn deref(&self) -> &RuntimeType {
        &self.0
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRef")
            .field("id", &self.0.id.as_u64())
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish()
    }
}

/// Iterator over a type and its ancestors
pub struct Ancestors {
    next: Option<TypeRef>,
}

impl Iterator for Ancestors {
    type Item = TypeRef;

    fn next(&mut self) -> Option<TypeRef> {
        let current = self.next.take()?;
        self.next = current.parent.clone();
        Some(current)
    }
}

impl RuntimeType {
    /// Type ID
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent type (None for root types)
    pub fn parent(&self) -> Option<&TypeRef> {
        self.parent.as_ref()
    }

    /// What produced this type
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Get this type's own entry for a method (not inherited)
    pub fn own_method(&self, method: MethodId) -> Option<MethodEntry> {
        self.methods.read().get(&method).cloned()
    }

    /// Methods with an own entry on this type
    pub fn own_methods(&self) -> Vec<MethodId> {
        let mut methods: Vec<MethodId> = self.methods.read().keys().copied().collect();
        methods.sort();
        methods
    }

    /// Add a method this type does not implement itself yet
    pub fn add_method(&self, method: MethodId, imp: Imp, encoding: &str) -> RuntimeResult<()> {
        let mut methods = self.methods.write();
        if methods.contains_key(&method) {
            return Err(RuntimeError::AlreadyImplemented {
                type_name: self.name.clone(),
                method,
            });
        }
        methods.insert(
            method,
            MethodEntry {
                imp,
                encoding: Arc::from(encoding),
            },
        );
        Ok(())
    }

    /// Bind `imp` as this type's own implementation of `method`.
    ///
    /// Keeps the existing encoding when the type already has an own entry,
    /// otherwise adds a new entry with `encoding`. Returns the previous own
    /// implementation.
    pub fn replace_method(&self, method: MethodId, imp: Imp, encoding: &str) -> Option<Imp> {
        let mut methods = self.methods.write();
        match methods.get_mut(&method) {
            Some(entry) => Some(std::mem::replace(&mut entry.imp, imp)),
            None => {
                methods.insert(
                    method,
                    MethodEntry {
                        imp,
                        encoding: Arc::from(encoding),
                    },
                );
                None
            }
        }
    }

    /// Remove this type's own entry for a method
    pub fn remove_method(&self, method: MethodId) -> Option<MethodEntry> {
        self.methods.write().remove(&method)
    }

    /// Install a forwarding fallback for unhandled messages
    pub fn set_forwarder(
        &self,
        forwarder: impl Fn(&ObjectRef, MethodId, &[Value]) -> Option<RuntimeResult<Value>>
            + Send
            + Sync
            + 'static,
    ) {
        *self.forwarder.write() = Some(Arc::new(forwarder));
    }

    /// Remove the forwarding fallback
    pub fn clear_forwarder(&self) {
        *self.forwarder.write() = None;
    }

    /// This type's own forwarding fallback
    pub fn forwarder(&self) -> Option<Arc<ForwardFn>> {
        self.forwarder.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: i32) -> Imp {
        Imp::new(move |_, _, _| Ok(Value::I32(v)))
    }

    #[test]
    fn test_lookup_walks_parent_chain() {
        let base = TypeRef::new("Base".to_string(), None, TypeKind::Regular);
        let derived = TypeRef::new("Derived".to_string(), Some(base.clone()), TypeKind::Regular);
        let m = MethodId::intern("types-test-inherited");

        base.add_method(m, constant(1), "i@:").unwrap();

        assert!(derived.own_method(m).is_none());
        assert!(derived.lookup(m).is_some());
        assert!(derived.is_subtype_of(&base));
        assert!(!base.is_subtype_of(&derived));
    }

    #[test]
    fn test_add_method_rejects_own_duplicate() {
        let ty = TypeRef::new("Dup".to_string(), None, TypeKind::Regular);
        let m = MethodId::intern("types-test-dup");
        ty.add_method(m, constant(1), "i@:").unwrap();
        let err = ty.add_method(m, constant(2), "i@:").unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyImplemented { .. }));
    }

    #[test]
    fn test_replace_method_returns_previous() {
        let ty = TypeRef::new("Replace".to_string(), None, TypeKind::Regular);
        let m = MethodId::intern("types-test-replace");
        let first = constant(1);
        let second = constant(2);

        assert!(ty.replace_method(m, first.clone(), "i@:").is_none());
        let previous = ty.replace_method(m, second.clone(), "v@:").unwrap();
        assert!(previous.same(&first));

        let entry = ty.own_method(m).unwrap();
        assert!(entry.imp.same(&second));
        // Existing encoding is kept
        assert_eq!(&*entry.encoding, "i@:");
    }

    #[test]
    fn test_type_ids_are_unique() {
        let a = TypeRef::new("A".to_string(), None, TypeKind::Regular);
        let b = TypeRef::new("A".to_string(), None, TypeKind::Regular);
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }
}
