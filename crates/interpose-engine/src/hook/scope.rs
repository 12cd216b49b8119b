//! Scope Resolver: per-instance shadow types
//!
//! An instance-scoped hook cannot patch the instance's real type, since that
//! would affect every other instance. Instead the instance is moved onto a
//! private *shadow type* whose parent is the real type, and the shadow type's
//! dispatch table is patched.
//!
//! Shadow types are reference counted by their consumers (instance-scoped
//! hooks and added methods). When the count drops to zero the instance is put
//! back on its real type and the shadow type is unregistered.

use crate::error::{HookError, HookResult};
use interpose_runtime::{ObjectId, ObjectRef, Runtime, TeardownId, TypeKind, TypeRef, WeakObjectRef};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Queue of instances destroyed while shadowed, drained by the engine
pub(crate) type DeadInstances = Arc<Mutex<Vec<ObjectId>>>;

struct ShadowEntry {
    object: WeakObjectRef,
    original: TypeRef,
    shadow: TypeRef,
    consumers: usize,
    teardown: TeardownId,
}

/// Result of releasing a shadow consumer
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Release {
    /// Other consumers remain
    Retained,
    /// The shadow type was torn down
    TornDown(TypeRef),
    /// No entry for this instance
    Unknown,
}

/// Arena of shadow types keyed by instance
#[derive(Default)]
pub(crate) struct ShadowArena {
    entries: FxHashMap<ObjectId, ShadowEntry>,
}

impl ShadowArena {
    /// Resolve the type to patch for an instance-scoped request, creating
    /// the shadow type on first use
    pub(crate) fn acquire(
        &mut self,
        runtime: &Runtime,
        engine: u64,
        prefix: &str,
        dead: &DeadInstances,
        object: &ObjectRef,
    ) -> HookResult<TypeRef> {
        if !object.is_retypeable() {
            return Err(HookError::UnsupportedTarget(format!(
                "object {} cannot be re-typed",
                object.id()
            )));
        }

        let current = object.isa();
        if let Some(entry) = self.entries.get_mut(&object.id()) {
            if current != entry.shadow {
                return Err(HookError::IncompatibleInstrumentation {
                    object: object.id(),
                    type_name: current.name().to_string(),
                });
            }
            entry.consumers += 1;
            return Ok(entry.shadow.clone());
        }

        match current.kind() {
            TypeKind::Regular => {}
            TypeKind::Proxy => {
                return Err(HookError::UnsupportedTarget(format!(
                    "object {} is a proxy",
                    object.id()
                )))
            }
            TypeKind::Observation | TypeKind::Shadow { .. } => {
                return Err(HookError::IncompatibleInstrumentation {
                    object: object.id(),
                    type_name: current.name().to_string(),
                })
            }
        }

        let name = format!("{}{}_{}", prefix, current.name(), object.id().as_u64());
        let shadow = runtime.allocate_type(&name, Some(&current), TypeKind::Shadow { owner: engine })?;
        if let Err(err) = object.set_isa(shadow.clone()) {
            runtime.unregister_type(&shadow);
            return Err(err.into());
        }

        let id = object.id();
        let dead = dead.clone();
        let teardown = object.add_teardown(move || dead.lock().push(id));

        log_event!(object = %id, shadow = shadow.name(), "created shadow type");
        self.entries.insert(
            id,
            ShadowEntry {
                object: object.downgrade(),
                original: current,
                shadow: shadow.clone(),
                consumers: 1,
                teardown,
            },
        );
        Ok(shadow)
    }

    /// Drop one consumer of an instance's shadow type, tearing it down when
    /// none remain
    pub(crate) fn release(&mut self, runtime: &Runtime, object: &ObjectRef) -> Release {
        let Some(entry) = self.entries.get_mut(&object.id()) else {
            return Release::Unknown;
        };
        entry.consumers -= 1;
        if entry.consumers > 0 {
            return Release::Retained;
        }

        let Some(entry) = self.entries.remove(&object.id()) else {
            return Release::Unknown;
        };
        if object.isa() == entry.shadow {
            // Cannot fail: the object was re-typed onto the shadow earlier
            let _ = object.set_isa(entry.original.clone());
        } else {
            log_warning!(
                object = %object.id(),
                shadow = entry.shadow.name(),
                current = object.isa().name(),
                "instance was re-typed after shadowing; leaving its type in place"
            );
        }
        object.cancel_teardown(entry.teardown);
        runtime.unregister_type(&entry.shadow);
        log_event!(object = %object.id(), shadow = entry.shadow.name(), "tore down shadow type");
        Release::TornDown(entry.shadow)
    }

    /// Forget a destroyed instance, returning its shadow type
    pub(crate) fn purge(&mut self, runtime: &Runtime, id: ObjectId) -> Option<TypeRef> {
        let entry = self.entries.remove(&id)?;
        debug_assert!(!entry.object.is_alive());
        runtime.unregister_type(&entry.shadow);
        log_event!(object = %id, shadow = entry.shadow.name(), "purged shadow type of destroyed instance");
        Some(entry.shadow)
    }

    /// Shadow type currently carried by an instance
    pub(crate) fn shadow_of(&self, id: ObjectId) -> Option<TypeRef> {
        self.entries.get(&id).map(|entry| entry.shadow.clone())
    }

    /// Number of instance-scoped consumers of an instance's shadow type
    #[cfg(test)]
    pub(crate) fn consumers(&self, id: ObjectId) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.consumers)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
