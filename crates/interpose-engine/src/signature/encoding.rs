//! Type-encoding decoder
//!
//! Method encodings list the return type, the receiver (`@`), the method
//! identifier (`:`) and then each argument. Each type may be preceded by
//! qualifiers that do not affect layout and followed by a frame offset:
//!
//! ```text
//! v24@0:8q16        void, receiver, method, one i64 argument
//! {Point=dd}16@0:8  returns a 16-byte aggregate
//! r*24@0:8@"Name"16 const c-string return, one object argument
//! ```

use interpose_runtime::Value;
use std::fmt;

/// Qualifiers that may precede a type (const, in/out, bycopy, oneway, atomic)
const QUALIFIERS: &[u8] = b"rnNoORVA";

/// Size of pointer-shaped slots
const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Errors decoding a type encoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The encoding is not well formed
    #[error("Malformed type encoding `{encoding}`: {reason}")]
    Malformed {
        /// The offending encoding
        encoding: String,
        /// What went wrong
        reason: String,
    },

    /// The encoding is well formed but uses a construct slots cannot carry
    #[error("Unsupported {construct} in type encoding `{encoding}`")]
    Unsupported {
        /// The offending encoding
        encoding: String,
        /// The unsupported construct
        construct: &'static str,
    },
}

/// Size and alignment of a by-value aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateLayout {
    /// Aggregate name as written in the encoding
    pub name: String,
    /// Size in bytes, including trailing padding
    pub size: usize,
    /// Alignment in bytes
    pub align: usize,
}

/// Representation of one argument or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Object reference
    Object,
    /// Type reference
    Type,
    /// Method identifier
    Method,
    /// Raw pointer (also function pointers and decayed arrays)
    Pointer,
    /// By-value aggregate
    Aggregate(AggregateLayout),
    /// Closure value
    Block,
    /// NUL-terminated string
    CString,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Boolean
    Bool,
    /// No value
    Void,
}

impl TypeTag {
    /// Slot size in bytes
    pub fn size(&self) -> usize {
        match self {
            TypeTag::Void => 0,
            TypeTag::I8 | TypeTag::U8 | TypeTag::Bool => 1,
            TypeTag::I16 | TypeTag::U16 => 2,
            TypeTag::I32 | TypeTag::U32 | TypeTag::F32 => 4,
            TypeTag::I64 | TypeTag::U64 | TypeTag::F64 => 8,
            TypeTag::Aggregate(layout) => layout.size,
            TypeTag::Object
            | TypeTag::Type
            | TypeTag::Method
            | TypeTag::Pointer
            | TypeTag::Block
            | TypeTag::CString => POINTER_SIZE,
        }
    }

    /// Slot alignment in bytes
    pub fn align(&self) -> usize {
        match self {
            TypeTag::Void => 1,
            TypeTag::Aggregate(layout) => layout.align,
            other => other.size(),
        }
    }

    /// Tag name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Object => "object",
            TypeTag::Type => "type",
            TypeTag::Method => "method",
            TypeTag::Pointer => "pointer",
            TypeTag::Aggregate(_) => "aggregate",
            TypeTag::Block => "block",
            TypeTag::CString => "c-string",
            TypeTag::I8 => "i8",
            TypeTag::I16 => "i16",
            TypeTag::I32 => "i32",
            TypeTag::I64 => "i64",
            TypeTag::U8 => "u8",
            TypeTag::U16 => "u16",
            TypeTag::U32 => "u32",
            TypeTag::U64 => "u64",
            TypeTag::F32 => "f32",
            TypeTag::F64 => "f64",
            TypeTag::Bool => "bool",
            TypeTag::Void => "void",
        }
    }

    /// Check whether a raw value has this slot's representation
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeTag::Aggregate(layout), Value::Aggregate(bytes)) => bytes.len() == layout.size,
            (TypeTag::Object, Value::Object(_))
            | (TypeTag::Type, Value::Type(_))
            | (TypeTag::Method, Value::Method(_))
            | (TypeTag::Pointer, Value::Pointer(_))
            | (TypeTag::Block, Value::Block(_))
            | (TypeTag::CString, Value::CString(_))
            | (TypeTag::I8, Value::I8(_))
            | (TypeTag::I16, Value::I16(_))
            | (TypeTag::I32, Value::I32(_))
            | (TypeTag::I64, Value::I64(_))
            | (TypeTag::U8, Value::U8(_))
            | (TypeTag::U16, Value::U16(_))
            | (TypeTag::U32, Value::U32(_))
            | (TypeTag::U64, Value::U64(_))
            | (TypeTag::F32, Value::F32(_))
            | (TypeTag::F64, Value::F64(_))
            | (TypeTag::Bool, Value::Bool(_))
            | (TypeTag::Void, Value::Void) => true,
            _ => false,
        }
    }

    /// Zero value of this slot (nil, NULL, zeroed bytes)
    pub fn zero_value(&self) -> Value {
        match self {
            TypeTag::Object => Value::Object(None),
            TypeTag::Type => Value::Type(None),
            TypeTag::Method => Value::Method(None),
            TypeTag::Pointer => Value::Pointer(0),
            TypeTag::Aggregate(layout) => Value::Aggregate(vec![0; layout.size]),
            TypeTag::Block => Value::Block(None),
            TypeTag::CString => Value::CString(None),
            TypeTag::I8 => Value::I8(0),
            TypeTag::I16 => Value::I16(0),
            TypeTag::I32 => Value::I32(0),
            TypeTag::I64 => Value::I64(0),
            TypeTag::U8 => Value::U8(0),
            TypeTag::U16 => Value::U16(0),
            TypeTag::U32 => Value::U32(0),
            TypeTag::U64 => Value::U64(0),
            TypeTag::F32 => Value::F32(0.0),
            TypeTag::F64 => Value::F64(0.0),
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Void => Value::Void,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Aggregate(layout) => write!(f, "{{{}: {} bytes}}", layout.name, layout.size),
            other => f.write_str(other.name()),
        }
    }
}

/// Decoded method encoding: return tag and argument tags.
///
/// The receiver and method identifier slots are checked and then dropped,
/// so `arguments` lists only the explicit arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMethod {
    /// Return slot
    pub return_tag: TypeTag,
    /// Explicit argument slots
    pub arguments: Vec<TypeTag>,
}

/// Decode a full method encoding
pub fn decode_method(encoding: &str) -> Result<DecodedMethod, EncodingError> {
    let mut cursor = Cursor::new(encoding);

    let return_tag = cursor.top_level()?;
    let receiver = cursor.top_level()?;
    if receiver != TypeTag::Object {
        return Err(cursor.malformed("receiver slot must be an object"));
    }
    let method = cursor.top_level()?;
    if method != TypeTag::Method {
        return Err(cursor.malformed("second slot must be a method identifier"));
    }

    let mut arguments = Vec::new();
    while !cursor.at_end() {
        let tag = cursor.top_level()?;
        if tag == TypeTag::Void {
            return Err(cursor.malformed("void argument"));
        }
        arguments.push(tag);
    }

    Ok(DecodedMethod { return_tag, arguments })
}

/// Decode a single type encoding (no frame offset)
pub fn decode_type(encoding: &str) -> Result<TypeTag, EncodingError> {
    let mut cursor = Cursor::new(encoding);
    let tag = cursor.top_level()?;
    if !cursor.at_end() {
        return Err(cursor.malformed("trailing characters"));
    }
    Ok(tag)
}

/// A parsed type with its layout inside an aggregate
struct Parsed {
    tag: TypeTag,
    size: usize,
    align: usize,
}

impl Parsed {
    fn scalar(tag: TypeTag) -> Self {
        Self {
            size: tag.size(),
            align: tag.align(),
            tag,
        }
    }
}

struct Cursor<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, byte: u8) -> Result<(), EncodingError> {
        match self.bump() {
            Some(b) if b == byte => Ok(()),
            _ => Err(self.malformed(&format!("expected `{}`", byte as char))),
        }
    }

    fn malformed(&self, reason: &str) -> EncodingError {
        EncodingError::Malformed {
            encoding: self.source.to_string(),
            reason: format!("{} at offset {}", reason, self.pos),
        }
    }

    fn unsupported(&self, construct: &'static str) -> EncodingError {
        EncodingError::Unsupported {
            encoding: self.source.to_string(),
            construct,
        }
    }

    fn skip_qualifiers(&mut self) {
        while matches!(self.peek(), Some(b) if QUALIFIERS.contains(&b)) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Option<usize> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos]).ok()?.parse().ok()
    }

    fn skip_quoted(&mut self) -> Result<(), EncodingError> {
        self.expect(b'"')?;
        while let Some(byte) = self.bump() {
            if byte == b'"' {
                return Ok(());
            }
        }
        Err(self.malformed("unterminated quoted name"))
    }

    /// One argument/return slot followed by an optional frame offset.
    /// Arrays decay to pointers here.
    fn top_level(&mut self) -> Result<TypeTag, EncodingError> {
        self.skip_qualifiers();
        if self.at_end() {
            return Err(self.malformed("unexpected end"));
        }
        let is_array = self.peek() == Some(b'[');
        let parsed = self.parse_type()?;
        self.number();
        Ok(if is_array { TypeTag::Pointer } else { parsed.tag })
    }

    fn parse_type(&mut self) -> Result<Parsed, EncodingError> {
        self.skip_qualifiers();
        let byte = self
            .bump()
            .ok_or_else(|| self.malformed("unexpected end"))?;

        let tag = match byte {
            b'@' => match self.peek() {
                Some(b'?') => {
                    self.pos += 1;
                    TypeTag::Block
                }
                Some(b'"') => {
                    self.skip_quoted()?;
                    TypeTag::Object
                }
                _ => TypeTag::Object,
            },
            b'#' => TypeTag::Type,
            b':' => TypeTag::Method,
            b'*' => TypeTag::CString,
            b'?' => TypeTag::Pointer,
            b'^' => {
                self.skip_type()?;
                TypeTag::Pointer
            }
            b'c' => TypeTag::I8,
            b's' => TypeTag::I16,
            b'i' | b'l' => TypeTag::I32,
            b'q' => TypeTag::I64,
            b'C' => TypeTag::U8,
            b'S' => TypeTag::U16,
            b'I' | b'L' => TypeTag::U32,
            b'Q' => TypeTag::U64,
            b'f' => TypeTag::F32,
            b'd' => TypeTag::F64,
            b'B' => TypeTag::Bool,
            b'v' => TypeTag::Void,
            b'[' => return self.parse_array(),
            b'{' => return self.parse_struct(),
            b'(' => return Err(self.unsupported("union")),
            b'b' => return Err(self.unsupported("bitfield")),
            _ => {
                self.pos -= 1;
                return Err(self.malformed(&format!("unknown type `{}`", byte as char)));
            }
        };
        Ok(Parsed::scalar(tag))
    }

    fn parse_array(&mut self) -> Result<Parsed, EncodingError> {
        let count = self
            .number()
            .ok_or_else(|| self.malformed("array without element count"))?;
        let element = self.parse_type()?;
        self.expect(b']')?;
        let size = element
            .size
            .checked_mul(count)
            .ok_or_else(|| self.malformed("array size overflows"))?;
        // Arrays only appear by value inside aggregates; at top level they
        // decay to a pointer.
        Ok(Parsed {
            tag: TypeTag::Aggregate(AggregateLayout {
                name: String::from("[]"),
                size,
                align: element.align,
            }),
            size,
            align: element.align,
        })
    }

    fn parse_struct(&mut self) -> Result<Parsed, EncodingError> {
        let start = self.pos;
        while !matches!(self.peek(), Some(b'=') | Some(b'}') | None) {
            self.pos += 1;
        }
        let name = self.source[start..self.pos].to_string();
        match self.bump() {
            Some(b'=') => {}
            Some(_) => return Err(self.unsupported("opaque aggregate")),
            None => return Err(self.malformed("unterminated aggregate")),
        }

        let mut offset = 0usize;
        let mut align = 1usize;
        loop {
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.malformed("unterminated aggregate")),
                Some(b'"') => self.skip_quoted()?,
                Some(_) => {}
            }
            let field = self.parse_type()?;
            if field.tag == TypeTag::Void {
                return Err(self.malformed("void field"));
            }
            offset = align_up(offset, field.align)
                .and_then(|start| start.checked_add(field.size))
                .ok_or_else(|| self.malformed("aggregate size overflows"))?;
            align = align.max(field.align);
        }

        let size = align_up(offset, align).ok_or_else(|| self.malformed("aggregate size overflows"))?;
        Ok(Parsed {
            tag: TypeTag::Aggregate(AggregateLayout { name, size, align }),
            size,
            align,
        })
    }

    /// Skip the pointee of `^`. Pointees are never dereferenced, so opaque
    /// aggregates and unions are fine here.
    fn skip_type(&mut self) -> Result<(), EncodingError> {
        self.skip_qualifiers();
        match self.bump() {
            None => Err(self.malformed("pointer without pointee")),
            Some(b'^') => self.skip_type(),
            Some(b'@') => {
                match self.peek() {
                    Some(b'?') => self.pos += 1,
                    Some(b'"') => self.skip_quoted()?,
                    _ => {}
                }
                Ok(())
            }
            Some(b'b') => {
                self.number();
                Ok(())
            }
            Some(open @ (b'{' | b'(' | b'[')) => self.skip_balanced(open),
            Some(byte) if !byte.is_ascii() => {
                self.pos -= 1;
                Err(self.malformed("non-ASCII pointee"))
            }
            Some(_) => Ok(()),
        }
    }

    fn skip_balanced(&mut self, open: u8) -> Result<(), EncodingError> {
        let mut stack = vec![closing(open)];
        while let Some(byte) = self.bump() {
            match byte {
                b'"' => {
                    self.pos -= 1;
                    self.skip_quoted()?;
                }
                b'{' | b'(' | b'[' => stack.push(closing(byte)),
                _ if Some(&byte) == stack.last() => {
                    stack.pop();
                    if stack.is_empty() {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(self.malformed("unbalanced pointee"))
    }
}

fn closing(open: u8) -> u8 {
    match open {
        b'{' => b'}',
        b'(' => b')',
        _ => b']',
    }
}

fn align_up(offset: usize, align: usize) -> Option<usize> {
    offset.div_ceil(align).checked_mul(align)
}
