//! Interned method identifiers

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::LazyLock;

/// Opaque, globally comparable identifier for a method name.
///
/// Two `MethodId`s are equal exactly when they were interned from the same
/// name. Identity is stable for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

struct MethodTable {
    names: Vec<&'static str>,
    ids: FxHashMap<&'static str, u32>,
}

// Interned names live for the process, like the selectors they model.
static METHODS: LazyLock<RwLock<MethodTable>> = LazyLock::new(|| {
    RwLock::new(MethodTable {
        names: Vec::new(),
        ids: FxHashMap::default(),
    })
});

impl MethodId {
    /// Intern a method name, returning its identifier
    pub fn intern(name: &str) -> Self {
        if let Some(id) = METHODS.read().ids.get(name) {
            return MethodId(*id);
        }

        let mut table = METHODS.write();
        if let Some(id) = table.ids.get(name) {
            return MethodId(*id);
        }

        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let id = table.names.len() as u32;
        table.names.push(name);
        table.ids.insert(name, id);
        MethodId(id)
    }

    /// Look up an already-interned name without interning it
    pub fn lookup(name: &str) -> Option<Self> {
        METHODS.read().ids.get(name).map(|id| MethodId(*id))
    }

    /// The method name
    pub fn name(self) -> &'static str {
        METHODS.read().names[self.0 as usize]
    }

    /// Get the raw identifier value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.name())
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for MethodId {
    fn from(name: &str) -> Self {
        MethodId::intern(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = MethodId::intern("description");
        let b = MethodId::intern("description");
        assert_eq!(a, b);
        assert_eq!(a.name(), "description");
    }

    #[test]
    fn test_distinct_names() {
        let a = MethodId::intern("setValue:forKey:");
        let b = MethodId::intern("valueForKey:");
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_does_not_intern() {
        assert!(MethodId::lookup("never-interned-method-name").is_none());
        let id = MethodId::intern("interned-for-lookup");
        assert_eq!(MethodId::lookup("interned-for-lookup"), Some(id));
    }

    #[test]
    fn test_display() {
        let id = MethodId::intern("count");
        assert_eq!(id.to_string(), "count");
        assert_eq!(format!("{:?}", id), "MethodId(count)");
    }
}
