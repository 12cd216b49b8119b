use super::encoding::{decode_method, EncodingError, TypeTag};
use dashmap::DashMap;
use interpose_runtime::{MethodId, TypeId, TypeRef};
use std::sync::Arc;

/// Decoded signature of one method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    encoding: Arc<str>,
    return_tag: TypeTag,
    argument_tags: Vec<TypeTag>,
}

impl MethodSignature {
    /// Decode a method encoding
    pub fn parse(encoding: &str) -> Result<Self, EncodingError> {
        let decoded = decode_method(encoding)?;
        Ok(Self {
            encoding: Arc::from(encoding),
            return_tag: decoded.return_tag,
            argument_tags: decoded.arguments,
        })
    }

    /// The raw encoding
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Return slot tag
    pub fn return_tag(&self) -> &TypeTag {
        &self.return_tag
    }

    /// Explicit argument tags (receiver and method identifier excluded)
    pub fn argument_tags(&self) -> &[TypeTag] {
        &self.argument_tags
    }

    /// Number of explicit arguments
    pub fn argument_count(&self) -> usize {
        self.argument_tags.len()
    }

    /// Whether the method returns nothing
    pub fn is_void(&self) -> bool {
        self.return_tag == TypeTag::Void
    }

    /// Bytes needed to lay out the receiver, method identifier and every
    /// argument in order, each at its natural alignment
    pub fn frame_size(&self) -> usize {
        let word = std::mem::size_of::<usize>();
        self.argument_tags.iter().fold(2 * word, |offset, tag| {
            let align = tag.align().max(1);
            offset.div_ceil(align) * align + tag.size()
        })
    }
}

/// Signature lookup with a per-(type, method) cache.
///
/// Entries are keyed by the type the lookup started from, so anything that
/// adds or removes a dispatch-table entry must evict the method with
/// [`evict_method`](SignatureReader::evict_method) to keep subtypes current.
pub struct SignatureReader {
    cache: DashMap<(TypeId, MethodId), Arc<MethodSignature>>,
    caching: bool,
}

impl SignatureReader {
    /// Create a reader
    pub fn new(caching: bool) -> Self {
        Self {
            cache: DashMap::new(),
            caching,
        }
    }

    /// Signature of `method` as resolved on `ty`, or `None` if `ty` does not
    /// implement it.
    ///
    /// # Panics
    ///
    /// Panics if the stored encoding cannot be decoded.
    pub fn signature(&self, ty: &TypeRef, method: MethodId) -> Option<Arc<MethodSignature>> {
        match self.decode(ty, method) {
            Ok(signature) => signature,
            Err(err) => panic!("cannot decode signature of `{}` on `{}`: {}", method, ty.name(), err),
        }
    }

    /// Like [`signature`](Self::signature) but reports undecodable
    /// encodings as errors
    pub fn decode(
        &self,
        ty: &TypeRef,
        method: MethodId,
    ) -> Result<Option<Arc<MethodSignature>>, EncodingError> {
        let key = (ty.id(), method);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cached.clone()));
        }

        let Some(entry) = ty.lookup(method) else {
            return Ok(None);
        };
        let signature = Arc::new(MethodSignature::parse(&entry.encoding)?);
        if self.caching {
            self.cache.insert(key, signature.clone());
        }
        Ok(Some(signature))
    }

    /// Drop every cached signature for a type
    pub fn evict_type(&self, ty: TypeId) {
        self.cache.retain(|(id, _), _| *id != ty);
    }

    /// Drop every cached signature for a method, on any type
    pub fn evict_method(&self, method: MethodId) {
        self.cache.retain(|(_, m), _| *m != method);
    }

    /// Number of cached signatures
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for SignatureReader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_runtime::{Imp, Runtime, Value};

    fn noop() -> Imp {
        Imp::new(|_, _, _| Ok(Value::Void))
    }

    #[test]
    fn test_signature_of_unimplemented_method_is_none() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("SigNone", None).unwrap();
        let reader = SignatureReader::default();
        assert!(reader
            .signature(&ty, MethodId::intern("signature-test-absent"))
            .is_none());
    }

    #[test]
    fn test_signature_is_cached_and_evicted() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("SigCached", None).unwrap();
        let m = MethodId::intern("signature-test-cached");
        ty.add_method(m, noop(), "v@:qd").unwrap();

        let reader = SignatureReader::default();
        let first = reader.signature(&ty, m).unwrap();
        let second = reader.signature(&ty, m).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.argument_tags(), &[TypeTag::I64, TypeTag::F64]);
        assert!(first.is_void());

        reader.evict_type(ty.id());
        assert_eq!(reader.cached_count(), 0);
    }

    #[test]
    fn test_evict_method_reaches_subtypes() {
        let runtime = Runtime::new();
        let base = runtime.define_type("SigEvictBase", None).unwrap();
        let derived = runtime.define_type("SigEvictDerived", Some(&base)).unwrap();
        let m = MethodId::intern("signature-test-evicted");
        let kept = MethodId::intern("signature-test-kept");
        base.add_method(m, noop(), "v@:").unwrap();
        base.add_method(kept, noop(), "v@:").unwrap();

        let reader = SignatureReader::default();
        reader.signature(&base, m).unwrap();
        reader.signature(&derived, m).unwrap();
        reader.signature(&derived, kept).unwrap();
        assert_eq!(reader.cached_count(), 3);

        reader.evict_method(m);
        assert_eq!(reader.cached_count(), 1);
        assert!(reader.signature(&derived, kept).is_some());
    }

    #[test]
    fn test_inherited_signature() {
        let runtime = Runtime::new();
        let base = runtime.define_type("SigBase", None).unwrap();
        let derived = runtime.define_type("SigDerived", Some(&base)).unwrap();
        let m = MethodId::intern("signature-test-inherited");
        base.add_method(m, noop(), "i@:").unwrap();

        let reader = SignatureReader::new(false);
        let signature = reader.signature(&derived, m).unwrap();
        assert_eq!(signature.return_tag(), &TypeTag::I32);
        assert_eq!(reader.cached_count(), 0);
    }

    #[test]
    fn test_frame_size() {
        let signature = MethodSignature::parse("v@:cq").unwrap();
        let word = std::mem::size_of::<usize>();
        // receiver + method, then a byte, then an 8-aligned i64
        assert_eq!(signature.frame_size(), (2 * word + 1).div_ceil(8) * 8 + 8);
    }

    #[test]
    #[should_panic(expected = "cannot decode signature")]
    fn test_malformed_encoding_panics() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("SigBroken", None).unwrap();
        let m = MethodId::intern("signature-test-broken");
        ty.add_method(m, noop(), "v@:(U=if)").unwrap();
        SignatureReader::default().signature(&ty, m);
    }
}
