//! Invocation: a reified, replayable method call
//!
//! An [`Invocation`] holds a weak target, a method identifier, one slot per
//! argument and a return slot, each shaped by the method's [`MethodSignature`].
//! It can be invoked any number of times, against its own target or another
//! one, with arguments changed in between.
//!
//! ```rust,ignore
//! let mut invocation = Invocation::for_target(&reader, &object, method)?;
//! invocation.set(Slot::Argument(0), BoxedValue::from(7i64))?;
//! invocation.invoke()?;
//! let result = invocation.get(Slot::Return);
//! ```

mod marshal;
mod scratch;

pub use marshal::{box_value, unbox_value, BoxedValue, Number};

use crate::error::{HookError, HookResult};
use crate::signature::{MethodSignature, SignatureReader, TypeTag};
use interpose_runtime::{MethodId, ObjectRef, Value, WeakObjectRef};
use scratch::ScratchBuffer;
use std::fmt;
use std::sync::Arc;

/// Address of one slot of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Positional argument (receiver and method identifier excluded)
    Argument(usize),
    /// The return slot
    Return,
}

/// A reified method call
#[derive(Clone)]
pub struct Invocation {
    target: Option<WeakObjectRef>,
    method: MethodId,
    signature: Arc<MethodSignature>,
    arguments: Vec<Value>,
    return_value: Value,
}

impl Invocation {
    /// Create an invocation with no target and zeroed arguments
    pub fn new(method: MethodId, signature: Arc<MethodSignature>) -> Self {
        let arguments = signature.argument_tags().iter().map(TypeTag::zero_value).collect();
        let return_value = signature.return_tag().zero_value();
        Self {
            target: None,
            method,
            signature,
            arguments,
            return_value,
        }
    }

    /// Create an invocation for a method the target responds to
    pub fn for_target(reader: &SignatureReader, target: &ObjectRef, method: MethodId) -> HookResult<Self> {
        let ty = target.isa();
        let signature = reader
            .decode(&ty, method)?
            .ok_or_else(|| HookError::MethodNotFound {
                type_name: ty.name().to_string(),
                method,
            })?;
        let mut invocation = Self::new(method, signature);
        invocation.set_target(Some(target));
        Ok(invocation)
    }

    /// Capture a live call. Arguments are taken as given.
    pub(crate) fn from_call(
        target: &ObjectRef,
        method: MethodId,
        signature: Arc<MethodSignature>,
        arguments: &[Value],
    ) -> Self {
        let return_value = signature.return_tag().zero_value();
        Self {
            target: Some(target.downgrade()),
            method,
            signature,
            arguments: arguments.to_vec(),
            return_value,
        }
    }

    /// The stored target, if it is still alive
    pub fn target(&self) -> Option<ObjectRef> {
        self.target.as_ref().and_then(WeakObjectRef::upgrade)
    }

    /// Replace the stored target. The invocation never keeps it alive.
    pub fn set_target(&mut self, target: Option<&ObjectRef>) {
        self.target = target.map(ObjectRef::downgrade);
    }

    /// Method identifier
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Method signature
    pub fn signature(&self) -> &Arc<MethodSignature> {
        &self.signature
    }

    /// Number of explicit arguments
    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// Whether the method returns nothing
    pub fn is_void(&self) -> bool {
        self.signature.is_void()
    }

    /// Raw argument values
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Raw return value
    pub fn return_value(&self) -> &Value {
        &self.return_value
    }

    /// Get a slot as a boxed value (nil for values the slot's tag does not
    /// recognize).
    ///
    /// # Panics
    ///
    /// Panics if the argument index is out of range.
    pub fn get(&self, slot: Slot) -> BoxedValue {
        let (tag, raw) = self.slot(slot);
        box_value(tag, raw).unwrap_or(BoxedValue::Nil)
    }

    /// Set a slot from a boxed value.
    ///
    /// # Panics
    ///
    /// Panics if the argument index is out of range.
    pub fn set(&mut self, slot: Slot, value: BoxedValue) -> HookResult<()> {
        let tag = self.slot(slot).0;
        let raw = unbox_value(tag, value)?;
        *self.slot_mut(slot) = raw;
        Ok(())
    }

    /// Get a slot's raw value
    pub fn get_raw(&self, slot: Slot) -> &Value {
        self.slot(slot).1
    }

    /// Set a slot's raw value. The value must have the slot's representation.
    pub fn set_raw(&mut self, slot: Slot, value: Value) -> HookResult<()> {
        let tag = self.slot(slot).0;
        if !tag.accepts(&value) {
            return Err(HookError::ValueMismatch {
                expected: tag.name(),
                got: value.type_name(),
            });
        }
        *self.slot_mut(slot) = value;
        Ok(())
    }

    /// Replace every argument at once.
    ///
    /// # Panics
    ///
    /// Panics if the number of values differs from the signature's argument
    /// count.
    pub fn set_arguments(&mut self, values: Vec<BoxedValue>) -> HookResult<()> {
        assert_eq!(
            values.len(),
            self.arguments.len(),
            "`{}` takes {} arguments",
            self.method,
            self.arguments.len()
        );
        let arguments = self
            .signature
            .argument_tags()
            .iter()
            .zip(values)
            .map(|(tag, value)| unbox_value(tag, value))
            .collect::<HookResult<Vec<_>>>()?;
        self.arguments = arguments;
        Ok(())
    }

    /// Dispatch to the stored target and populate the return slot
    pub fn invoke(&mut self) -> HookResult<()> {
        let target = self.target().ok_or(HookError::TargetGone)?;
        self.invoke_with(&target)
    }

    /// Dispatch to `target` instead of the stored target, for this call only
    pub fn invoke_with(&mut self, target: &ObjectRef) -> HookResult<()> {
        let (arguments, _frame) = self.stage_arguments();
        let result = target.send(self.method, &arguments)?;
        self.return_value = self.stage_return(result)?;
        Ok(())
    }

    /// Stage aggregate arguments through scratch buffers. The buffers live
    /// until the returned frame is dropped at the end of the call.
    fn stage_arguments(&self) -> (Vec<Value>, Vec<ScratchBuffer>) {
        let mut frame = Vec::new();
        let arguments = self
            .signature
            .argument_tags()
            .iter()
            .zip(&self.arguments)
            .map(|(tag, value)| match (tag, value) {
                (TypeTag::Aggregate(layout), Value::Aggregate(bytes)) if bytes.len() == layout.size => {
                    let mut buffer = ScratchBuffer::new(layout);
                    buffer.fill(bytes);
                    let staged = Value::Aggregate(buffer.as_slice().to_vec());
                    frame.push(buffer);
                    staged
                }
                _ => value.clone(),
            })
            .collect();
        (arguments, frame)
    }

    fn stage_return(&self, result: Value) -> HookResult<Value> {
        let tag = self.signature.return_tag();
        if *tag == TypeTag::Void {
            return Ok(Value::Void);
        }
        if !tag.accepts(&result) {
            return Err(HookError::ValueMismatch {
                expected: tag.name(),
                got: result.type_name(),
            });
        }
        match (tag, result) {
            (TypeTag::Aggregate(layout), Value::Aggregate(bytes)) => {
                let mut buffer = ScratchBuffer::new(layout);
                buffer.fill(&bytes);
                Ok(Value::Aggregate(buffer.as_slice().to_vec()))
            }
            (_, result) => Ok(result),
        }
    }

    fn slot(&self, slot: Slot) -> (&TypeTag, &Value) {
        match slot {
            Slot::Argument(index) => (&self.signature.argument_tags()[index], &self.arguments[index]),
            Slot::Return => (self.signature.return_tag(), &self.return_value),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Value {
        match slot {
            Slot::Argument(index) => &mut self.arguments[index],
            Slot::Return => &mut self.return_value,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("target", &self.target.as_ref().map(WeakObjectRef::id))
            .field("method", &self.method)
            .field("encoding", &self.signature.encoding())
            .field("arguments", &self.arguments)
            .field("return_value", &self.return_value)
            .finish()
    }
}

/// Send a message with boxed arguments and box the result.
///
/// Unlike [`Invocation::set_arguments`] this is a runtime boundary: an
/// argument count mismatch is reported as an error, and a panic inside the
/// implementation comes back as [`RuntimeError::Panicked`].
///
/// [`RuntimeError::Panicked`]: interpose_runtime::RuntimeError::Panicked
pub fn perform(
    reader: &SignatureReader,
    target: &ObjectRef,
    method: MethodId,
    arguments: Vec<BoxedValue>,
) -> HookResult<BoxedValue> {
    let ty = target.isa();
    let signature = reader
        .decode(&ty, method)?
        .ok_or_else(|| HookError::MethodNotFound {
            type_name: ty.name().to_string(),
            method,
        })?;

    if arguments.len() != signature.argument_count() {
        return Err(HookError::ArgumentCountMismatch {
            expected: signature.argument_count(),
            got: arguments.len(),
        });
    }

    let raw = signature
        .argument_tags()
        .iter()
        .zip(arguments)
        .map(|(tag, value)| unbox_value(tag, value))
        .collect::<HookResult<Vec<_>>>()?;

    let result = target.try_send(method, &raw)?;
    Ok(box_value(signature.return_tag(), &result).unwrap_or(BoxedValue::Nil))
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_runtime::{Imp, Runtime, RuntimeError};

    fn adder(runtime: &Runtime) -> (ObjectRef, MethodId) {
        let ty = runtime.define_type("InvocationAdder", None).unwrap();
        let m = MethodId::intern("add:to:");
        ty.add_method(
            m,
            Imp::new(|_, _, args| {
                let a = args[0].as_i64().unwrap_or_default();
                let b = args[1].as_i64().unwrap_or_default();
                Ok(Value::I64(a + b))
            }),
            "q@:qq",
        )
        .unwrap();
        (runtime.instantiate(&ty), m)
    }

    #[test]
    fn test_aggregate_arguments_staged_in_aligned_frame() {
        let signature = Arc::new(MethodSignature::parse("v@:i{Point=dd}").unwrap());
        let mut invocation = Invocation::new(MethodId::intern("stageFrame"), signature);
        let bytes: Vec<u8> = (0..16).collect();
        invocation.arguments[1] = Value::Aggregate(bytes.clone());

        let (arguments, frame) = invocation.stage_arguments();
        assert_eq!(frame.len(), 1);
        assert!(frame[0].is_aligned());
        assert_eq!(frame[0].as_slice(), bytes.as_slice());
        assert_eq!(arguments, vec![Value::I32(0), Value::Aggregate(bytes)]);
    }

    #[test]
    fn test_invoke_populates_return() {
        let runtime = Runtime::new();
        let (object, m) = adder(&runtime);
        let reader = SignatureReader::default();

        let mut invocation = Invocation::for_target(&reader, &object, m).unwrap();
        invocation
            .set_arguments(vec![BoxedValue::from(2i64), BoxedValue::from(40i64)])
            .unwrap();
        invocation.invoke().unwrap();
        assert_eq!(invocation.get(Slot::Return).as_i64(), Some(42));

        // Re-invoke with a changed argument
        invocation.set(Slot::Argument(0), BoxedValue::from(10i64)).unwrap();
        invocation.invoke().unwrap();
        assert_eq!(invocation.get(Slot::Return).as_i64(), Some(50));
    }

    #[test]
    fn test_invoke_on_dead_target() {
        let runtime = Runtime::new();
        let (object, m) = adder(&runtime);
        let reader = SignatureReader::default();
        let mut invocation = Invocation::for_target(&reader, &object, m).unwrap();

        drop(object);
        assert!(matches!(invocation.invoke(), Err(HookError::TargetGone)));
    }

    #[test]
    fn test_for_target_unknown_method() {
        let runtime = Runtime::new();
        let (object, _) = adder(&runtime);
        let reader = SignatureReader::default();
        let err = Invocation::for_target(&reader, &object, MethodId::intern("invocation-missing")).unwrap_err();
        assert!(matches!(err, HookError::MethodNotFound { .. }));
    }

    #[test]
    #[should_panic(expected = "takes 2 arguments")]
    fn test_set_arguments_count_mismatch_panics() {
        let runtime = Runtime::new();
        let (object, m) = adder(&runtime);
        let reader = SignatureReader::default();
        let mut invocation = Invocation::for_target(&reader, &object, m).unwrap();
        let _ = invocation.set_arguments(vec![BoxedValue::from(1i64)]);
    }

    #[test]
    fn test_set_raw_checks_representation() {
        let signature = Arc::new(MethodSignature::parse("v@:i").unwrap());
        let mut invocation = Invocation::new(MethodId::intern("invocation-raw"), signature);
        assert!(invocation.set_raw(Slot::Argument(0), Value::I32(5)).is_ok());
        assert!(invocation.set_raw(Slot::Argument(0), Value::F64(5.0)).is_err());
        assert_eq!(invocation.get(Slot::Return), BoxedValue::Nil);
    }

    #[test]
    fn test_perform_reports_count_mismatch() {
        let runtime = Runtime::new();
        let (object, m) = adder(&runtime);
        let reader = SignatureReader::default();
        let err = perform(&reader, &object, m, vec![BoxedValue::from(1i64)]).unwrap_err();
        assert!(matches!(err, HookError::ArgumentCountMismatch { expected: 2, got: 1 }));

        let sum = perform(&reader, &object, m, vec![1i64.into(), 2i64.into()]).unwrap();
        assert_eq!(sum.as_i64(), Some(3));
    }

    #[test]
    fn test_perform_catches_panics() {
        let runtime = Runtime::new();
        let ty = runtime.define_type("InvocationPanicky", None).unwrap();
        let m = MethodId::intern("invocation-explode");
        ty.add_method(m, Imp::new(|_, _, _| panic!("exploded")), "v@:").unwrap();
        let object = runtime.instantiate(&ty);

        let err = perform(&SignatureReader::default(), &object, m, Vec::new()).unwrap_err();
        assert!(matches!(err, HookError::Runtime(RuntimeError::Panicked(msg)) if msg == "exploded"));
    }
}
