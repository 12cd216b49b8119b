//! Boxing and unboxing of slot values
//!
//! Raw [`Value`]s are converted to and from a small set of high-level
//! [`BoxedValue`]s according to the slot's [`TypeTag`]:
//! - object/type/method references pass through verbatim
//! - raw pointers box their address
//! - aggregates box their bytes (the length must match the declared size)
//! - blocks pass through; c-strings decode to text only when non-NULL
//! - numbers widen to a canonical [`Number`] and narrow back with range checks

use crate::error::{HookError, HookResult};
use crate::signature::TypeTag;
use interpose_runtime::{Block, MethodId, ObjectRef, TypeRef, Value};
use std::ffi::CString;
use std::fmt;

/// Canonical numeric container
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Any signed integer width
    Int(i64),
    /// Any unsigned integer width
    UInt(u64),
    /// Either float width
    Float(f64),
    /// Boolean
    Bool(bool),
}

impl Number {
    /// Value as i64, if representable
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(v) => Some(v),
            Number::UInt(v) => i64::try_from(v).ok(),
            Number::Bool(b) => Some(b as i64),
            Number::Float(_) => None,
        }
    }

    /// Value as u64, if representable
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Number::Int(v) => u64::try_from(v).ok(),
            Number::UInt(v) => Some(v),
            Number::Bool(b) => Some(b as u64),
            Number::Float(_) => None,
        }
    }

    /// Value as f64
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::UInt(v) => v as f64,
            Number::Float(v) => v,
            Number::Bool(b) => b as u8 as f64,
        }
    }

    /// Value as bool (non-zero integers are true)
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Number::Bool(b) => Some(b),
            Number::Int(v) => Some(v != 0),
            Number::UInt(v) => Some(v != 0),
            Number::Float(_) => None,
        }
    }
}

/// High-level value of one slot
#[derive(Debug, Clone, PartialEq)]
pub enum BoxedValue {
    /// nil / NULL / no value
    Nil,
    /// Object reference
    Object(ObjectRef),
    /// Type reference
    Type(TypeRef),
    /// Method identifier
    Method(MethodId),
    /// Raw address
    Pointer(usize),
    /// Aggregate contents
    Bytes(Vec<u8>),
    /// Closure value
    Block(Block),
    /// Decoded c-string
    Text(String),
    /// Any numeric slot
    Number(Number),
}

impl BoxedValue {
    /// Check for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, BoxedValue::Nil)
    }

    /// Get a number as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BoxedValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Get a number as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BoxedValue::Number(n) => Some(n.as_f64()),
            _ => None,
        }
    }

    /// Get decoded text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BoxedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get an object reference
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            BoxedValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Get aggregate bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BoxedValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Kind name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            BoxedValue::Nil => "nil",
            BoxedValue::Object(_) => "object",
            BoxedValue::Type(_) => "type",
            BoxedValue::Method(_) => "method",
            BoxedValue::Pointer(_) => "pointer",
            BoxedValue::Bytes(_) => "bytes",
            BoxedValue::Block(_) => "block",
            BoxedValue::Text(_) => "text",
            BoxedValue::Number(_) => "number",
        }
    }
}

impl fmt::Display for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoxedValue::Nil => write!(f, "nil"),
            BoxedValue::Object(object) => write!(f, "<{} {}>", object.isa().name(), object.id()),
            BoxedValue::Type(ty) => write!(f, "{}", ty.name()),
            BoxedValue::Method(method) => write!(f, "@selector({})", method),
            BoxedValue::Pointer(addr) => write!(f, "{:#x}", addr),
            BoxedValue::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            BoxedValue::Block(block) => write!(f, "{:?}", block),
            BoxedValue::Text(s) => write!(f, "\"{}\"", s),
            BoxedValue::Number(Number::Int(v)) => write!(f, "{}", v),
            BoxedValue::Number(Number::UInt(v)) => write!(f, "{}", v),
            BoxedValue::Number(Number::Float(v)) => write!(f, "{}", v),
            BoxedValue::Number(Number::Bool(b)) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for BoxedValue {
    fn from(v: i64) -> Self {
        BoxedValue::Number(Number::Int(v))
    }
}

impl From<u64> for BoxedValue {
    fn from(v: u64) -> Self {
        BoxedValue::Number(Number::UInt(v))
    }
}

impl From<f64> for BoxedValue {
    fn from(v: f64) -> Self {
        BoxedValue::Number(Number::Float(v))
    }
}

impl From<bool> for BoxedValue {
    fn from(b: bool) -> Self {
        BoxedValue::Number(Number::Bool(b))
    }
}

impl From<&str> for BoxedValue {
    fn from(s: &str) -> Self {
        BoxedValue::Text(s.to_string())
    }
}

impl From<String> for BoxedValue {
    fn from(s: String) -> Self {
        BoxedValue::Text(s)
    }
}

impl From<Vec<u8>> for BoxedValue {
    fn from(bytes: Vec<u8>) -> Self {
        BoxedValue::Bytes(bytes)
    }
}

impl From<&ObjectRef> for BoxedValue {
    fn from(object: &ObjectRef) -> Self {
        BoxedValue::Object(object.clone())
    }
}

/// Box a raw slot value. Returns `None` if the value does not have the
/// tag's representation.
pub fn box_value(tag: &TypeTag, value: &Value) -> Option<BoxedValue> {
    if !tag.accepts(value) {
        return None;
    }

    let boxed = match value {
        Value::Void => BoxedValue::Nil,
        Value::Object(object) => object.clone().map_or(BoxedValue::Nil, BoxedValue::Object),
        Value::Type(ty) => ty.clone().map_or(BoxedValue::Nil, BoxedValue::Type),
        Value::Method(method) => method.map_or(BoxedValue::Nil, BoxedValue::Method),
        Value::Pointer(addr) => BoxedValue::Pointer(*addr),
        Value::Aggregate(bytes) => BoxedValue::Bytes(bytes.clone()),
        Value::Block(block) => block.clone().map_or(BoxedValue::Nil, BoxedValue::Block),
        Value::CString(s) => match s {
            Some(s) => BoxedValue::Text(s.to_string_lossy().into_owned()),
            None => BoxedValue::Nil,
        },
        Value::I8(v) => Number::Int(*v as i64).into(),
        Value::I16(v) => Number::Int(*v as i64).into(),
        Value::I32(v) => Number::Int(*v as i64).into(),
        Value::I64(v) => Number::Int(*v).into(),
        Value::U8(v) => Number::UInt(*v as u64).into(),
        Value::U16(v) => Number::UInt(*v as u64).into(),
        Value::U32(v) => Number::UInt(*v as u64).into(),
        Value::U64(v) => Number::UInt(*v).into(),
        Value::F32(v) => Number::Float(*v as f64).into(),
        Value::F64(v) => Number::Float(*v).into(),
        Value::Bool(b) => Number::Bool(*b).into(),
    };
    Some(boxed)
}

impl From<Number> for BoxedValue {
    fn from(n: Number) -> Self {
        BoxedValue::Number(n)
    }
}

/// Unbox a value into a tag's raw representation
pub fn unbox_value(tag: &TypeTag, value: BoxedValue) -> HookResult<Value> {
    let mismatch = |value: &BoxedValue| HookError::ValueMismatch {
        expected: tag.name(),
        got: value.kind(),
    };

    let raw = match (tag, value) {
        (TypeTag::Void, BoxedValue::Nil) => Value::Void,
        (TypeTag::Object, BoxedValue::Nil) => Value::Object(None),
        (TypeTag::Object, BoxedValue::Object(object)) => Value::Object(Some(object)),
        (TypeTag::Type, BoxedValue::Nil) => Value::Type(None),
        (TypeTag::Type, BoxedValue::Type(ty)) => Value::Type(Some(ty)),
        (TypeTag::Method, BoxedValue::Nil) => Value::Method(None),
        (TypeTag::Method, BoxedValue::Method(method)) => Value::Method(Some(method)),
        (TypeTag::Pointer, BoxedValue::Nil) => Value::Pointer(0),
        (TypeTag::Pointer, BoxedValue::Pointer(addr)) => Value::Pointer(addr),
        (TypeTag::Block, BoxedValue::Nil) => Value::Block(None),
        (TypeTag::Block, BoxedValue::Block(block)) => Value::Block(Some(block)),
        (TypeTag::CString, BoxedValue::Nil) => Value::CString(None),
        (TypeTag::CString, BoxedValue::Text(text)) => {
            let text = CString::new(text).map_err(|_| HookError::ValueMismatch {
                expected: tag.name(),
                got: "text with interior NUL",
            })?;
            Value::CString(Some(text))
        }
        (TypeTag::Aggregate(layout), BoxedValue::Bytes(bytes)) => {
            if bytes.len() != layout.size {
                return Err(HookError::ValueMismatch {
                    expected: tag.name(),
                    got: "bytes of the wrong size",
                });
            }
            Value::Aggregate(bytes)
        }
        (tag, BoxedValue::Number(n)) => unbox_number(tag, n).ok_or_else(|| mismatch(&BoxedValue::Number(n)))?,
        (_, other) => return Err(mismatch(&other)),
    };
    Ok(raw)
}

fn unbox_number(tag: &TypeTag, n: Number) -> Option<Value> {
    Some(match tag {
        TypeTag::I8 => Value::I8(i8::try_from(n.as_i64()?).ok()?),
        TypeTag::I16 => Value::I16(i16::try_from(n.as_i64()?).ok()?),
        TypeTag::I32 => Value::I32(i32::try_from(n.as_i64()?).ok()?),
        TypeTag::I64 => Value::I64(n.as_i64()?),
        TypeTag::U8 => Value::U8(u8::try_from(n.as_u64()?).ok()?),
        TypeTag::U16 => Value::U16(u16::try_from(n.as_u64()?).ok()?),
        TypeTag::U32 => Value::U32(u32::try_from(n.as_u64()?).ok()?),
        TypeTag::U64 => Value::U64(n.as_u64()?),
        TypeTag::F32 => Value::F32(n.as_f64() as f32),
        TypeTag::F64 => Value::F64(n.as_f64()),
        TypeTag::Bool => Value::Bool(n.as_bool()?),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{decode_type, AggregateLayout};

    #[test]
    fn test_integer_widths() {
        let cases = [
            (TypeTag::I8, Value::I8(i8::MIN)),
            (TypeTag::I16, Value::I16(-300)),
            (TypeTag::I32, Value::I32(i32::MAX)),
            (TypeTag::I64, Value::I64(i64::MIN)),
            (TypeTag::U8, Value::U8(u8::MAX)),
            (TypeTag::U16, Value::U16(60_000)),
            (TypeTag::U32, Value::U32(u32::MAX)),
            (TypeTag::U64, Value::U64(u64::MAX)),
        ];
        for (tag, value) in cases {
            let boxed = box_value(&tag, &value).unwrap();
            assert_eq!(unbox_value(&tag, boxed).unwrap(), value, "{}", tag);
        }
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let err = unbox_value(&TypeTag::I8, BoxedValue::from(300i64)).unwrap_err();
        assert!(matches!(err, HookError::ValueMismatch { expected: "i8", .. }));
        assert!(unbox_value(&TypeTag::U32, BoxedValue::from(-1i64)).is_err());
    }

    #[test]
    fn test_widening_into_floats() {
        assert_eq!(
            unbox_value(&TypeTag::F64, BoxedValue::from(3i64)).unwrap(),
            Value::F64(3.0)
        );
        assert_eq!(
            unbox_value(&TypeTag::F32, BoxedValue::from(0.5f64)).unwrap(),
            Value::F32(0.5)
        );
    }

    #[test]
    fn test_mismatched_raw_value_boxes_to_none() {
        assert!(box_value(&TypeTag::I32, &Value::F64(1.0)).is_none());
    }

    #[test]
    fn test_c_string_boundary() {
        let value = Value::c_string("caf\u{e9}").unwrap();
        assert_eq!(
            box_value(&TypeTag::CString, &value),
            Some(BoxedValue::Text("caf\u{e9}".to_string()))
        );
        assert_eq!(
            box_value(&TypeTag::CString, &Value::CString(None)),
            Some(BoxedValue::Nil)
        );
        assert!(unbox_value(&TypeTag::CString, BoxedValue::from("a\0b")).is_err());
    }

    #[test]
    fn test_aggregate_size_is_checked() {
        let tag = decode_type("{Pair=ii}").unwrap();
        let bytes: Vec<u8> = (0u8..8).collect();
        let raw = unbox_value(&tag, BoxedValue::Bytes(bytes.clone())).unwrap();
        assert_eq!(raw.as_bytes(), Some(bytes.as_slice()));

        let short = TypeTag::Aggregate(AggregateLayout {
            name: "Pair".to_string(),
            size: 8,
            align: 4,
        });
        assert!(unbox_value(&short, BoxedValue::Bytes(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn test_nil_into_reference_slots() {
        assert_eq!(unbox_value(&TypeTag::Object, BoxedValue::Nil).unwrap(), Value::nil());
        assert_eq!(unbox_value(&TypeTag::Pointer, BoxedValue::Nil).unwrap(), Value::Pointer(0));
        assert!(unbox_value(&TypeTag::I32, BoxedValue::Nil).is_err());
    }
}
