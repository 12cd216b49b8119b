//! Type Signature Reader
//!
//! Decodes a method's type encoding, as stored in the runtime's dispatch
//! table, into [`TypeTag`]s for its return and argument slots.

mod encoding;
mod reader;

pub use encoding::{decode_method, decode_type, AggregateLayout, DecodedMethod, EncodingError, TypeTag};
pub use reader::{MethodSignature, SignatureReader};
