//! # Serialization Formats and the Type Registry
//!
//! This module provides abstraction over multiple serialization formats for
//! object payloads, and the registry that resolves wire type names to
//! concrete Rust types.
//!
//! ## Formats
//! - **JSON** (default): human-readable, preserves the polymorphic shape the
//!   wire relies on via the frame's embedded type name
//! - **Bincode**: binary compact format
//! - **MessagePack**: compact binary encoding
//!
//! ## Type registry
//! Peers name object payloads with an identifier string
//! (`"<full type name>, <module name>"`). The registry maps that string to
//! encode/decode closures for a registered Rust type; decoding an
//! unregistered name surfaces as `SerializationTypeNotFound` carrying the
//! frame's correlation ids, which keeps a single unknown-typed message from
//! tearing down the connection.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::frame::{
    ObjectValue, TextEncoding, TypeCode, Value, BYTES_TYPE_NAME, MAX_PAYLOAD_SIZE,
};
use crate::error::{LinkError, Result};

/// Supported serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Human-readable JSON format (default).
    #[default]
    Json,
    /// Binary compact format.
    Bincode,
    /// Compact binary format (MessagePack).
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Json => "JSON",
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a value using this format.
    pub fn serialize<T: Serialize>(self, value: &T) -> std::result::Result<Vec<u8>, String> {
        match self {
            SerializationFormat::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            SerializationFormat::Bincode => bincode::serialize(value).map_err(|e| e.to_string()),
            SerializationFormat::MessagePack => rmp_serde::to_vec(value).map_err(|e| e.to_string()),
        }
    }

    /// Deserialize a value using this format.
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> std::result::Result<T, String> {
        match self {
            SerializationFormat::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
            SerializationFormat::Bincode => bincode::deserialize(data).map_err(|e| e.to_string()),
            SerializationFormat::MessagePack => {
                rmp_serde::from_slice(data).map_err(|e| e.to_string())
            }
        }
    }
}

impl std::str::FromStr for SerializationFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SerializationFormat::Json),
            "bincode" => Ok(SerializationFormat::Bincode),
            "messagepack" | "msgpack" => Ok(SerializationFormat::MessagePack),
            other => Err(format!("unknown serialization format: '{other}'")),
        }
    }
}

/// Everything the value codec needs in one place: the text encoding written
/// on send, the object format, and the type registry.
#[derive(Clone, Copy)]
pub struct SerializeContext<'a> {
    pub encoding: TextEncoding,
    pub format: SerializationFormat,
    pub registry: &'a TypeRegistry,
}

pub(crate) type DynObject = Arc<dyn Any + Send + Sync>;
pub(crate) type EncodeFn =
    Box<dyn Fn(&SerializeContext<'_>, &ObjectValue) -> std::result::Result<Vec<u8>, String> + Send + Sync>;
pub(crate) type DecodeFn =
    Box<dyn Fn(&SerializeContext<'_>, &[u8]) -> std::result::Result<DynObject, String> + Send + Sync>;

struct TypeEntry {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Maps wire identifier strings to codecs for registered Rust types.
///
/// Registration is append-only; entries are never replaced. Every registry
/// starts with the protocol's built-in types (the RMI envelopes and the
/// handshake credentials).
pub struct TypeRegistry {
    by_name: RwLock<HashMap<String, Arc<TypeEntry>>>,
    names_by_type: RwLock<HashMap<TypeId, String>>,
}

impl TypeRegistry {
    /// A registry pre-populated with the protocol's built-in types.
    pub fn new() -> Self {
        let registry = Self::empty();
        crate::protocol::invoke::register_builtins(&registry);
        crate::protocol::handshake::register_builtins(&registry);
        registry
    }

    fn empty() -> Self {
        TypeRegistry {
            by_name: RwLock::new(HashMap::new()),
            names_by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Register a serde-serializable type under a wire identifier.
    ///
    /// The first registration of a name wins; later registrations of the
    /// same name are ignored.
    pub fn register<T>(&self, type_name: &str)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let encode: EncodeFn = Box::new(|cx, obj| {
            let instance = obj
                .get::<T>()
                .ok_or_else(|| format!("instance is not a {}", std::any::type_name::<T>()))?;
            cx.format.serialize(instance.as_ref())
        });
        let decode: DecodeFn = Box::new(|cx, bytes| {
            let value: T = cx.format.deserialize(bytes)?;
            Ok(Arc::new(value) as DynObject)
        });
        self.register_raw::<T>(type_name, encode, decode);
    }

    /// Register a type with hand-written codec closures. Used by the
    /// protocol's built-in envelope types, whose layout nests the value codec.
    pub(crate) fn register_raw<T: 'static>(
        &self,
        type_name: &str,
        encode: EncodeFn,
        decode: DecodeFn,
    ) {
        let mut by_name = self.by_name.write().unwrap_or_else(|e| e.into_inner());
        if by_name.contains_key(type_name) {
            return;
        }
        by_name.insert(type_name.to_owned(), Arc::new(TypeEntry { encode, decode }));
        drop(by_name);

        self.names_by_type
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<T>())
            .or_insert_with(|| type_name.to_owned());
    }

    /// The wire identifier a Rust type was registered under.
    pub fn type_name_of<T: 'static>(&self) -> Option<String> {
        self.names_by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<T>())
            .cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.by_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(type_name)
    }

    fn entry(&self, type_name: &str) -> Option<Arc<TypeEntry>> {
        self.by_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(type_name)
            .cloned()
    }

    /// Wrap a typed instance into an object value using its registered name.
    pub fn object<T>(&self, instance: T) -> Result<ObjectValue>
    where
        T: Any + Send + Sync,
    {
        let type_name = self.type_name_of::<T>().ok_or_else(|| {
            LinkError::InvalidOperation(format!(
                "type {} is not registered",
                std::any::type_name::<T>()
            ))
        })?;
        Ok(ObjectValue::new(type_name, instance))
    }

    fn encode_object(
        &self,
        cx: &SerializeContext<'_>,
        obj: &ObjectValue,
        ids: (i32, i32),
    ) -> Result<Vec<u8>> {
        let entry = self
            .entry(obj.type_name())
            .ok_or_else(|| LinkError::SerializationTypeNotFound {
                type_name: obj.type_name().to_owned(),
                message_id: ids.0,
                in_response_to_id: ids.1,
            })?;
        (entry.encode)(cx, obj).map_err(|reason| LinkError::Serialization {
            type_name: obj.type_name().to_owned(),
            message_id: ids.0,
            in_response_to_id: ids.1,
            reason,
        })
    }

    fn decode_object(
        &self,
        cx: &SerializeContext<'_>,
        type_name: &str,
        content: &[u8],
        ids: (i32, i32),
    ) -> Result<ObjectValue> {
        let entry = self
            .entry(type_name)
            .ok_or_else(|| LinkError::SerializationTypeNotFound {
                type_name: type_name.to_owned(),
                message_id: ids.0,
                in_response_to_id: ids.1,
            })?;
        let instance = (entry.decode)(cx, content).map_err(|reason| LinkError::Serialization {
            type_name: type_name.to_owned(),
            message_id: ids.0,
            in_response_to_id: ids.1,
            reason,
        })?;
        Ok(ObjectValue::from_arc(type_name, instance))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn serialization_error(ids: (i32, i32), type_name: &str, reason: impl Into<String>) -> LinkError {
    LinkError::Serialization {
        type_name: type_name.to_owned(),
        message_id: ids.0,
        in_response_to_id: ids.1,
        reason: reason.into(),
    }
}

fn check_len(len: usize, ids: (i32, i32), type_name: &str) -> Result<i32> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(serialization_error(
            ids,
            type_name,
            format!("payload of {len} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit"),
        ));
    }
    Ok(len as i32)
}

/// Encode one value body: type code, codepage, optional type name, content.
/// This is the frame layout after the 9-byte correlation header, and also the
/// layout of every value nested inside an RMI envelope.
pub(crate) fn encode_body(
    buf: &mut BytesMut,
    value: &Value,
    cx: &SerializeContext<'_>,
    ids: (i32, i32),
) -> Result<()> {
    let code = value.type_code();
    buf.put_u8(code as u8);
    if code.is_bare() {
        return Ok(());
    }
    buf.put_i32_le(cx.encoding.code_page());

    match value {
        Value::Bytes(bytes) => {
            let name = cx.encoding.encode(BYTES_TYPE_NAME);
            buf.put_i32_le(name.len() as i32);
            buf.put_slice(&name);
            buf.put_i32_le(check_len(bytes.len(), ids, BYTES_TYPE_NAME)?);
            buf.put_slice(bytes);
        }
        Value::Object(obj) => {
            let content = cx.registry.encode_object(cx, obj, ids)?;
            let name = cx.encoding.encode(obj.type_name());
            buf.put_i32_le(check_len(name.len(), ids, obj.type_name())?);
            buf.put_slice(&name);
            buf.put_i32_le(check_len(content.len(), ids, obj.type_name())?);
            buf.put_slice(&content);
        }
        Value::String(text) => {
            let content = cx.encoding.encode(text);
            buf.put_i32_le(check_len(content.len(), ids, "string")?);
            buf.put_slice(&content);
        }
        scalar => {
            let text = scalar
                .scalar_text()
                .expect("non-scalar values handled above");
            let content = cx.encoding.encode(&text);
            buf.put_i32_le(content.len() as i32);
            buf.put_slice(&content);
        }
    }
    Ok(())
}

/// Sequential reader over a byte slice for the value codec.
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        BodyReader { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub(crate) fn read_i32_le(&mut self) -> Option<i32> {
        let bytes = self.take(4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}

/// Decode one value body previously produced by [`encode_body`].
///
/// Structural truncation here means the *content* of an already-delimited
/// frame is inconsistent, so it reports as a serialization error carrying the
/// frame's correlation ids rather than a fatal protocol violation.
pub(crate) fn decode_body(
    reader: &mut BodyReader<'_>,
    cx: &SerializeContext<'_>,
    ids: (i32, i32),
) -> Result<Value> {
    let truncated = || serialization_error(ids, "<frame>", "value body is truncated");

    let code_byte = reader.read_u8().ok_or_else(truncated)?;
    let code = TypeCode::from_u8(code_byte)
        .ok_or_else(|| serialization_error(ids, "<frame>", format!("unknown type code {code_byte}")))?;
    match code {
        TypeCode::Empty => return Ok(Value::Empty),
        TypeCode::DbNull => return Ok(Value::Null),
        _ => {}
    }

    let code_page = reader.read_i32_le().ok_or_else(truncated)?;
    let encoding = TextEncoding::from_code_page(code_page).ok_or_else(|| {
        serialization_error(ids, "<frame>", format!("unsupported codepage {code_page}"))
    })?;

    let read_len = |reader: &mut BodyReader<'_>| -> Result<usize> {
        let len = reader.read_i32_le().ok_or_else(truncated)?;
        if len < 0 || len as usize > MAX_PAYLOAD_SIZE {
            return Err(serialization_error(
                ids,
                "<frame>",
                format!("invalid length field {len}"),
            ));
        }
        Ok(len as usize)
    };

    let type_name = if code == TypeCode::Object {
        let len = read_len(reader)?;
        let raw = reader.take(len).ok_or_else(truncated)?;
        Some(
            encoding
                .decode(raw)
                .map_err(|reason| serialization_error(ids, "<type name>", reason))?,
        )
    } else {
        None
    };

    let content_len = read_len(reader)?;
    let content = reader.take(content_len).ok_or_else(truncated)?;

    match code {
        TypeCode::Object => {
            let type_name = type_name.expect("object frames carry a type name");
            if type_name == BYTES_TYPE_NAME {
                // Raw byte arrays bypass the serializer in both directions.
                Ok(Value::Bytes(content.to_vec()))
            } else {
                // Text nested inside the payload follows the frame's
                // codepage, not this peer's configured encoding.
                let frame_cx = SerializeContext {
                    encoding,
                    format: cx.format,
                    registry: cx.registry,
                };
                cx.registry
                    .decode_object(&frame_cx, &type_name, content, ids)
                    .map(Value::Object)
            }
        }
        TypeCode::String => {
            let text = encoding
                .decode(content)
                .map_err(|reason| serialization_error(ids, "string", reason))?;
            Ok(Value::String(text))
        }
        scalar_code => {
            let text = encoding
                .decode(content)
                .map_err(|reason| serialization_error(ids, "<scalar>", reason))?;
            Value::parse_scalar(scalar_code, &text)
                .map_err(|reason| serialization_error(ids, "<scalar>", reason))
        }
    }
}
