//! # Wire Frame Data Model
//!
//! Types describing one frame of the object protocol: the correlation
//! header, the type envelope, and the typed payload value.
//!
//! ## Wire Format
//! ```text
//! [MessageId(4)] [InResponseToId(4)] [TypeCode(1)]
//!   TypeCode in {Empty, DBNull}      -> frame ends here
//!   otherwise                        -> [CodePage(4)]
//!   TypeCode == Object               -> [TypeNameLen(4)] [TypeName(N)]
//!   then                             -> [ContentLength(4)] [Content(M)]
//! ```
//! All integers are little-endian. A frame with both correlation ids zero is
//! a plain application message; any non-zero id makes it part of the RMI
//! correlation subsystem.
//!
//! ## Security
//! - Maximum content size: 16MB (prevents memory exhaustion)
//! - Length validation before allocation

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Max allowed type-name or content length for a single frame (16 MB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Reserved "none" correlation id.
pub const NO_ID: i32 = 0;

/// Wire type name for raw byte arrays, transmitted without a serializer call.
pub const BYTES_TYPE_NAME: &str = "byte[]";

/// Payload type discriminator carried by every frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Empty = 0,
    Object = 1,
    DbNull = 2,
    Boolean = 3,
    Char = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    String = 18,
}

impl TypeCode {
    /// Decode a wire type-code byte. Unknown values are a protocol violation.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => TypeCode::Empty,
            1 => TypeCode::Object,
            2 => TypeCode::DbNull,
            3 => TypeCode::Boolean,
            4 => TypeCode::Char,
            5 => TypeCode::SByte,
            6 => TypeCode::Byte,
            7 => TypeCode::Int16,
            8 => TypeCode::UInt16,
            9 => TypeCode::Int32,
            10 => TypeCode::UInt32,
            11 => TypeCode::Int64,
            12 => TypeCode::UInt64,
            13 => TypeCode::Single,
            14 => TypeCode::Double,
            15 => TypeCode::Decimal,
            16 => TypeCode::DateTime,
            18 => TypeCode::String,
            _ => return None,
        })
    }

    /// True for the two frame kinds that carry no codepage and no payload.
    pub fn is_bare(self) -> bool {
        matches!(self, TypeCode::Empty | TypeCode::DbNull)
    }
}

/// Text encoding identified by a wire codepage id.
///
/// The sender writes its configured encoding into every non-bare frame; the
/// receiver must honor the codepage carried by the frame it decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8, codepage 65001. The default.
    #[default]
    Utf8,
    /// UTF-16 little-endian, codepage 1200.
    Utf16Le,
    /// ISO-8859-1, codepage 28591.
    Latin1,
    /// US-ASCII, codepage 20127.
    Ascii,
}

impl TextEncoding {
    pub fn code_page(self) -> i32 {
        match self {
            TextEncoding::Utf8 => 65001,
            TextEncoding::Utf16Le => 1200,
            TextEncoding::Latin1 => 28591,
            TextEncoding::Ascii => 20127,
        }
    }

    pub fn from_code_page(code_page: i32) -> Option<Self> {
        Some(match code_page {
            65001 => TextEncoding::Utf8,
            1200 => TextEncoding::Utf16Le,
            28591 => TextEncoding::Latin1,
            20127 => TextEncoding::Ascii,
            _ => return None,
        })
    }

    /// Encode text to bytes. Characters outside the target repertoire are
    /// replaced with `?`, matching the replacement fallback of the original
    /// wire peers.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }

    /// Decode bytes to text. Malformed sequences are reported, not replaced,
    /// so a corrupt frame surfaces as a serialization error.
    pub fn decode(self, bytes: &[u8]) -> std::result::Result<String, String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| format!("invalid UTF-8 text: {e}")),
            TextEncoding::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err("UTF-16 text has odd byte length".into());
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|e| format!("invalid UTF-16 text: {e}"))
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Ascii => {
                if let Some(bad) = bytes.iter().find(|&&b| b > 0x7F) {
                    return Err(format!("non-ASCII byte 0x{bad:02X} in ASCII text"));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }
}

/// Exact decimal number carried as its digit string.
///
/// The wire content of a Decimal frame is textual, so the digits round-trip
/// verbatim. No arithmetic is provided; this is a transport type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(String);

impl Decimal {
    /// Validate and wrap a decimal digit string: optional sign, at least one
    /// digit, optional fractional part.
    pub fn new(text: &str) -> std::result::Result<Self, String> {
        let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (unsigned, None),
        };
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(int_part) || !frac_part.map_or(true, digits) {
            return Err(format!("invalid decimal literal: '{text}'"));
        }
        Ok(Decimal(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Decimal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Decimal::new(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Decimal(v.to_string())
    }
}

impl From<u64> for Decimal {
    fn from(v: u64) -> Self {
        Decimal(v.to_string())
    }
}

/// A decoded application object: its wire identifier plus the instance.
#[derive(Clone)]
pub struct ObjectValue {
    type_name: String,
    object: Arc<dyn Any + Send + Sync>,
}

impl ObjectValue {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, object: T) -> Self {
        ObjectValue {
            type_name: type_name.into(),
            object: Arc::new(object),
        }
    }

    pub fn from_arc(type_name: impl Into<String>, object: Arc<dyn Any + Send + Sync>) -> Self {
        ObjectValue {
            type_name: type_name.into(),
            object,
        }
    }

    /// The wire identifier string, `"<full type name>, <module name>"`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.object.is::<T>()
    }

    /// Downcast to the concrete registered type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    pub(crate) fn instance(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.object
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The typed payload of one frame.
#[derive(Debug, Clone)]
pub enum Value {
    /// No payload (TypeCode Empty).
    Empty,
    /// Explicit null payload (TypeCode DBNull).
    Null,
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    DateTime(OffsetDateTime),
    String(String),
    /// Raw byte array, transmitted verbatim (serializer bypassed).
    Bytes(Vec<u8>),
    /// A serialized application object with its wire identifier.
    Object(ObjectValue),
}

impl Value {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Empty => TypeCode::Empty,
            Value::Null => TypeCode::DbNull,
            Value::Bool(_) => TypeCode::Boolean,
            Value::Char(_) => TypeCode::Char,
            Value::I8(_) => TypeCode::SByte,
            Value::U8(_) => TypeCode::Byte,
            Value::I16(_) => TypeCode::Int16,
            Value::U16(_) => TypeCode::UInt16,
            Value::I32(_) => TypeCode::Int32,
            Value::U32(_) => TypeCode::UInt32,
            Value::I64(_) => TypeCode::Int64,
            Value::U64(_) => TypeCode::UInt64,
            Value::F32(_) => TypeCode::Single,
            Value::F64(_) => TypeCode::Double,
            Value::Decimal(_) => TypeCode::Decimal,
            Value::DateTime(_) => TypeCode::DateTime,
            Value::String(_) => TypeCode::String,
            Value::Bytes(_) | Value::Object(_) => TypeCode::Object,
        }
    }

    /// Canonical parameter type name used for RMI method matching.
    pub fn param_type_name(&self) -> &str {
        match self {
            Value::Empty | Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::DateTime(_) => "datetime",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// The textual wire content of a scalar value. `None` for bare, string,
    /// bytes, and object values, which have their own content rules.
    pub(crate) fn scalar_text(&self) -> Option<String> {
        Some(match self {
            Value::Bool(v) => v.to_string(),
            Value::Char(v) => v.to_string(),
            Value::I8(v) => v.to_string(),
            Value::U8(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::U16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::DateTime(v) => v
                .format(&Rfc3339)
                .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z")),
            _ => return None,
        })
    }

    /// Parse the textual wire content of a scalar frame.
    pub(crate) fn parse_scalar(code: TypeCode, text: &str) -> std::result::Result<Value, String> {
        fn num<T: FromStr>(text: &str, what: &str) -> std::result::Result<T, String>
        where
            T::Err: fmt::Display,
        {
            text.parse::<T>()
                .map_err(|e| format!("invalid {what} literal '{text}': {e}"))
        }

        Ok(match code {
            TypeCode::Boolean => Value::Bool(num::<bool>(text, "bool")?),
            TypeCode::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(format!("invalid char literal '{text}'")),
                }
            }
            TypeCode::SByte => Value::I8(num(text, "i8")?),
            TypeCode::Byte => Value::U8(num(text, "u8")?),
            TypeCode::Int16 => Value::I16(num(text, "i16")?),
            TypeCode::UInt16 => Value::U16(num(text, "u16")?),
            TypeCode::Int32 => Value::I32(num(text, "i32")?),
            TypeCode::UInt32 => Value::U32(num(text, "u32")?),
            TypeCode::Int64 => Value::I64(num(text, "i64")?),
            TypeCode::UInt64 => Value::U64(num(text, "u64")?),
            TypeCode::Single => Value::F32(num(text, "f32")?),
            TypeCode::Double => Value::F64(num(text, "f64")?),
            TypeCode::Decimal => Value::Decimal(Decimal::new(text)?),
            TypeCode::DateTime => Value::DateTime(
                OffsetDateTime::parse(text, &Rfc3339)
                    .map_err(|e| format!("invalid datetime literal '{text}': {e}"))?,
            ),
            other => return Err(format!("type code {other:?} has no scalar form")),
        })
    }

    pub fn is_empty_or_null(&self) -> bool {
        matches!(self, Value::Empty | Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast an object payload to its concrete registered type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.as_object().and_then(ObjectValue::get::<T>)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Empty, Empty) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Object(a), Object(b)) => {
                a.type_name == b.type_name && Arc::ptr_eq(&a.object, &b.object)
            }
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from! {
    bool => Bool, char => Char,
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64,
    Decimal => Decimal, OffsetDateTime => DateTime,
    String => String, Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

/// One decoded frame: correlation header plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_id: i32,
    pub in_response_to_id: i32,
    pub value: Value,
}

impl Frame {
    /// A plain application frame (both correlation ids zero).
    pub fn application(value: Value) -> Self {
        Frame {
            message_id: NO_ID,
            in_response_to_id: NO_ID,
            value,
        }
    }

    /// A correlated track frame.
    pub fn track(message_id: i32, in_response_to_id: i32, value: Value) -> Self {
        Frame {
            message_id,
            in_response_to_id,
            value,
        }
    }

    /// True when both correlation ids are zero.
    pub fn is_application(&self) -> bool {
        self.message_id == NO_ID && self.in_response_to_id == NO_ID
    }
}
