//! Runtime handle: type registry, object creation and message send

use crate::error::{RuntimeError, RuntimeResult};
use crate::method::MethodId;
use crate::object::ObjectRef;
use crate::types::{TypeId, TypeKind, TypeRef};
use crate::value::Value;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// Prefix of types synthesized by [`Runtime::observe_instance`]
pub const OBSERVATION_TYPE_PREFIX: &str = "Observed_";

struct RuntimeInner {
    types: DashMap<TypeId, TypeRef>,
    names: DashMap<String, TypeId>,
}

/// Shared handle to one runtime instance.
///
/// Cloning is cheap; all clones see the same type registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                types: DashMap::new(),
                names: DashMap::new(),
            }),
        }
    }

    /// Define a regular type
    pub fn define_type(&self, name: &str, parent: Option<&TypeRef>) -> RuntimeResult<TypeRef> {
        self.allocate_type(name, parent, TypeKind::Regular)
    }

    /// Allocate and register a type of any kind. Names are unique per runtime.
    pub fn allocate_type(
        &self,
        name: &str,
        parent: Option<&TypeRef>,
        kind: TypeKind,
    ) -> RuntimeResult<TypeRef> {
        match self.inner.names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RuntimeError::DuplicateType(name.to_string())),
            Entry::Vacant(slot) => {
                let ty = TypeRef::new(name.to_string(), parent.cloned(), kind);
                slot.insert(ty.id());
                self.inner.types.insert(ty.id(), ty.clone());
                Ok(ty)
            }
        }
    }

    /// Remove a type from the registry. Existing handles stay valid.
    pub fn unregister_type(&self, ty: &TypeRef) -> bool {
        let removed = self.inner.types.remove(&ty.id()).is_some();
        if removed {
            self.inner.names.remove_if(ty.name(), |_, id| *id == ty.id());
        }
        removed
    }

    /// Look up a type by name
    pub fn type_named(&self, name: &str) -> Option<TypeRef> {
        let id = *self.inner.names.get(name)?;
        self.type_by_id(id)
    }

    /// Look up a type by ID
    pub fn type_by_id(&self, id: TypeId) -> Option<TypeRef> {
        self.inner.types.get(&id).map(|ty| ty.clone())
    }

    /// Number of registered types
    pub fn type_count(&self) -> usize {
        self.inner.types.len()
    }

    /// Create an instance of a type
    pub fn instantiate(&self, ty: &TypeRef) -> ObjectRef {
        ObjectRef::new(ty.clone(), true)
    }

    /// Create an instance whose effective type can never change
    /// (interned and tagged representations)
    pub fn instantiate_tagged(&self, ty: &TypeRef) -> ObjectRef {
        ObjectRef::new(ty.clone(), false)
    }

    /// Send a message (see [`ObjectRef::send`])
    pub fn send(&self, receiver: &ObjectRef, method: MethodId, args: &[Value]) -> RuntimeResult<Value> {
        receiver.send(method, args)
    }

    /// Send a message, converting a panic in the implementation into
    /// [`RuntimeError::Panicked`]
    pub fn try_send(&self, receiver: &ObjectRef, method: MethodId, args: &[Value]) -> RuntimeResult<Value> {
        receiver.try_send(method, args)
    }

    /// Check whether an object responds to a method (ignoring forwarding)
    pub fn responds_to(&self, receiver: &ObjectRef, method: MethodId) -> bool {
        receiver.isa().responds_to(method)
    }

    /// Put an instance under observation by swapping it onto a private
    /// observation subtype. Returns the observation type.
    pub fn observe_instance(&self, object: &ObjectRef) -> RuntimeResult<TypeRef> {
        let current = object.isa();
        if current.kind() == TypeKind::Observation {
            return Ok(current);
        }
        if !object.is_retypeable() {
            return Err(RuntimeError::NotRetypeable(object.id()));
        }

        let name = format!("{}{}_{}", OBSERVATION_TYPE_PREFIX, current.name(), object.id().as_u64());
        let observed = self.allocate_type(&name, Some(&current), TypeKind::Observation)?;
        object.set_isa(observed.clone())?;
        Ok(observed)
    }

    /// Remove observation from an instance. Returns false if the instance's
    /// effective type is not an observation type.
    pub fn stop_observing(&self, object: &ObjectRef) -> RuntimeResult<bool> {
        let current = object.isa();
        if current.kind() != TypeKind::Observation {
            return Ok(false);
        }
        let Some(parent) = current.parent().cloned() else {
            return Ok(false);
        };
        object.set_isa(parent)?;
        self.unregister_type(&current);
        Ok(true)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a panic payload as text
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::Imp;

    fn answer() -> Imp {
        Imp::new(|_, _, _| Ok(Value::I64(42)))
    }

    #[test]
    fn test_define_type_rejects_duplicate_name() {
        let runtime = Runtime::new();
        runtime.define_type("Widget", None).unwrap();
        let err = runtime.define_type("Widget", None).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateType(name) if name == "Widget"));
    }

    #[test]
    fn test_type_lookup() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("Gadget", None).unwrap();
        assert_eq!(runtime.type_named("Gadget"), Some(ty.clone()));
        assert_eq!(runtime.type_by_id(ty.id()), Some(ty.clone()));

        assert!(runtime.unregister_type(&ty));
        assert!(runtime.type_named("Gadget").is_none());
        assert!(!runtime.unregister_type(&ty));
    }

    #[test]
    fn test_send_resolves_through_ancestors() {
        let runtime = Runtime::new();
        let base = runtime.define_type("Base", None).unwrap();
        let derived = runtime.define_type("Derived", Some(&base)).unwrap();
        let m = MethodId::intern("runtime-test-answer");
        base.add_method(m, answer(), "q@:").unwrap();

        let object = runtime.instantiate(&derived);
        assert_eq!(runtime.send(&object, m, &[]).unwrap(), Value::I64(42));
        assert!(runtime.responds_to(&object, m));
    }

    #[test]
    fn test_send_unknown_method() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("Empty", None).unwrap();
        let object = runtime.instantiate(&ty);
        let err = runtime
            .send(&object, MethodId::intern("runtime-test-missing"), &[])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MethodNotFound { .. }));
    }

    #[test]
    fn test_forwarder_handles_unknown_method() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("Forwarding", None).unwrap();
        let handled = MethodId::intern("runtime-test-forwarded");
        ty.set_forwarder(move |_, method, _| (method == handled).then(|| Ok(Value::Bool(true))));

        let object = runtime.instantiate(&ty);
        assert_eq!(runtime.send(&object, handled, &[]).unwrap(), Value::Bool(true));
        assert!(runtime
            .send(&object, MethodId::intern("runtime-test-not-forwarded"), &[])
            .is_err());
    }

    #[test]
    fn test_try_send_catches_panic() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("Panicky", None).unwrap();
        let m = MethodId::intern("runtime-test-panic");
        ty.add_method(m, Imp::new(|_, _, _| panic!("boom")), "v@:").unwrap();

        let object = runtime.instantiate(&ty);
        let err = runtime.try_send(&object, m, &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Panicked(msg) if msg == "boom"));
    }

    #[test]
    fn test_observe_and_stop_observing() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("Observable", None).unwrap();
        let object = runtime.instantiate(&ty);

        let observed = runtime.observe_instance(&object).unwrap();
        assert_eq!(observed.kind(), TypeKind::Observation);
        assert_eq!(observed.parent(), Some(&ty));
        assert_eq!(object.isa(), observed);
        // Observing twice reuses the subtype
        assert_eq!(runtime.observe_instance(&object).unwrap(), observed);

        assert!(runtime.stop_observing(&object).unwrap());
        assert_eq!(object.isa(), ty);
        assert!(!runtime.stop_observing(&object).unwrap());
    }

    #[test]
    fn test_tagged_objects_cannot_be_observed() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("TaggedNumber", None).unwrap();
        let object = runtime.instantiate_tagged(&ty);
        assert!(matches!(
            runtime.observe_instance(&object),
            Err(RuntimeError::NotRetypeable(_))
        ));
    }
}
