//! Raw slot values passed to and returned from method implementations
//!
//! A [`Value`] is the runtime's ABI-level representation of one argument or
//! return slot. There is one variant per slot representation:
//!
//! ```text
//! Object / Type / Method    references, passed verbatim (None = nil)
//! Pointer                   raw address
//! Aggregate                 by-value struct bytes, laid out per its encoding
//! Block / CString           closure value / NUL-terminated string (None = NULL)
//! I8..I64, U8..U64          fixed-width integers
//! F32, F64, Bool            floating point and boolean
//! Void                      no value
//! ```

use crate::method::MethodId;
use crate::object::ObjectRef;
use crate::types::TypeRef;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

/// Signature of a block (closure) value
pub type BlockFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// A closure value that can be passed through a block slot
#[derive(Clone)]
pub struct Block(Arc<BlockFn>);

impl Block {
    /// Wrap a closure as a block value
    pub fn new(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Block(Arc::new(f))
    }

    /// Call the block
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    /// Address of the closure, used as the block's identity
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:#x})", self.addr())
    }
}

/// Raw value of one argument or return slot
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (void return)
    Void,
    /// Object reference, `None` is nil
    Object(Option<ObjectRef>),
    /// Type reference
    Type(Option<TypeRef>),
    /// Method identifier
    Method(Option<MethodId>),
    /// Raw address
    Pointer(usize),
    /// By-value aggregate bytes
    Aggregate(Vec<u8>),
    /// Closure value
    Block(Option<Block>),
    /// C string, `None` is NULL
    CString(Option<CString>),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Boolean
    Bool(bool),
}

impl Value {
    /// The nil object reference
    #[inline]
    pub fn nil() -> Self {
        Value::Object(None)
    }

    /// Wrap an object reference
    #[inline]
    pub fn object(object: &ObjectRef) -> Self {
        Value::Object(Some(object.clone()))
    }

    /// Build a C string value from text (`None` if it contains a NUL byte)
    pub fn c_string(text: &str) -> Option<Self> {
        CString::new(text).ok().map(|s| Value::CString(Some(s)))
    }

    /// Check if this is the void value
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Get the variant name
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Object(_) => "object",
            Value::Type(_) => "type",
            Value::Method(_) => "method",
            Value::Pointer(_) => "pointer",
            Value::Aggregate(_) => "aggregate",
            Value::Block(_) => "block",
            Value::CString(_) => "c-string",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bool(_) => "bool",
        }
    }

    /// Widen any integer or boolean to i64
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::U64(v) => Some(v as i64),
            Value::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    /// Widen any numeric value to f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Get an object reference (None for nil or non-object values)
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(Some(object)) => Some(object),
            _ => None,
        }
    }

    /// Get aggregate bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Aggregate(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Void
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
