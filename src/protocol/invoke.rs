//! # RMI Wire Envelopes
//!
//! The request and result envelopes of the remote-invocation subsystem, and
//! their hand-rolled wire codecs.
//!
//! Both envelopes travel as ordinary Object frames under built-in type names,
//! so the framing layer treats them like any other payload. Their layout
//! nests the frame value codec for parameters and results: any value the
//! protocol can frame is a legal RMI argument, including registered
//! application objects, and a serializer fault inside an envelope carries the
//! envelope frame's correlation ids.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::core::frame::{ObjectValue, TextEncoding, Value};
use crate::core::serialization::{
    decode_body, encode_body, BodyReader, SerializeContext, TypeRegistry,
};
use crate::error::{FaultKind, LinkError};

/// Wire identifier of the invocation request envelope.
pub const INVOKE_REQUEST_TYPE: &str = "objlink.rmi.InvokeRequest, objlink";
/// Wire identifier of the invocation result envelope.
pub const INVOKE_RESULT_TYPE: &str = "objlink.rmi.InvokeResult, objlink";

/// An outgoing or incoming remote method invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Controller identifier string, `"<full type name>, <module name>"`.
    /// Peers only ever compare it for equality.
    pub controller: String,
    /// Method name on the controller.
    pub method: String,
    /// Positional parameter type full-names, matched element-wise.
    pub param_types: Vec<String>,
    /// Argument values, positionally matching `param_types`.
    pub params: Vec<Value>,
}

/// The outcome of a remote method invocation.
///
/// `exception_code == 0` means success; otherwise it is a [`FaultKind`] code
/// and `result` is empty.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub exception_code: i32,
    pub exception_message: String,
    pub full_exception: String,
    pub result: Value,
}

impl InvokeResult {
    pub fn success(result: Value) -> Self {
        InvokeResult {
            exception_code: 0,
            exception_message: String::new(),
            full_exception: String::new(),
            result,
        }
    }

    pub fn fault(kind: FaultKind, message: impl Into<String>, detail: impl Into<String>) -> Self {
        InvokeResult {
            exception_code: kind.code(),
            exception_message: message.into(),
            full_exception: detail.into(),
            result: Value::Empty,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exception_code == 0
    }

    /// Turn the envelope into the caller-facing outcome.
    pub fn into_outcome(self) -> Result<Value, LinkError> {
        if self.is_success() {
            return Ok(self.result);
        }
        let kind =
            FaultKind::from_code(self.exception_code).unwrap_or(FaultKind::MethodInvokeException);
        Err(LinkError::ControllerInvocation {
            kind,
            message: self.exception_message,
            remote_detail: self.full_exception,
        })
    }
}

/// A fault raised by a local controller while handling an invocation.
///
/// This is the handler-side error type; it maps onto the wire
/// [`InvokeResult`] fields.
#[derive(Debug)]
pub struct InvokeFault {
    pub kind: FaultKind,
    pub message: String,
    pub detail: String,
}

impl InvokeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        InvokeFault {
            kind,
            message: message.into(),
            detail: String::new(),
        }
    }

    /// No method matched the requested name and parameter types.
    pub fn method_not_found(method: &str, param_types: &[String]) -> Self {
        InvokeFault::new(
            FaultKind::MethodNotFound,
            format!("no method '{method}({})'", param_types.join(", ")),
        )
    }

    /// The method ran and raised an error.
    pub fn from_error(error: impl std::fmt::Display) -> Self {
        let message = error.to_string();
        InvokeFault {
            kind: FaultKind::MethodInvokeException,
            detail: message.clone(),
            message,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

impl std::fmt::Display for InvokeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<InvokeFault> for InvokeResult {
    fn from(fault: InvokeFault) -> Self {
        InvokeResult::fault(fault.kind, fault.message, fault.detail)
    }
}

/// One positional call argument: its wire type name plus the value.
#[derive(Debug, Clone)]
pub struct CallArg {
    pub type_name: String,
    pub value: Value,
}

impl CallArg {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        CallArg {
            type_name: type_name.into(),
            value,
        }
    }

    /// Argument from a registered application object.
    pub fn object(obj: ObjectValue) -> Self {
        CallArg {
            type_name: obj.type_name().to_owned(),
            value: Value::Object(obj),
        }
    }
}

macro_rules! call_arg_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for CallArg {
            fn from(v: $ty) -> Self {
                let value = Value::from(v);
                CallArg {
                    type_name: value.param_type_name().to_owned(),
                    value,
                }
            }
        })*
    };
}

call_arg_from! {
    bool, char, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64,
    String, &str, Vec<u8>,
    crate::core::frame::Decimal, time::OffsetDateTime,
}

// --- wire codecs -----------------------------------------------------------
//
// Layout (all integers little-endian, strings length-prefixed in the
// envelope's text encoding):
//
//   request: controller | method | count | type_name[count] | value[count]
//   result:  exception_code | exception_message | full_exception | value

fn write_str(buf: &mut BytesMut, text: &str, encoding: TextEncoding) {
    let bytes = encoding.encode(text);
    buf.put_i32_le(bytes.len() as i32);
    buf.put_slice(&bytes);
}

fn read_str(
    reader: &mut BodyReader<'_>,
    encoding: TextEncoding,
) -> Result<String, String> {
    let len = reader
        .read_i32_le()
        .ok_or("envelope is truncated")?;
    if len < 0 {
        return Err(format!("negative string length {len}"));
    }
    let raw = reader
        .take(len as usize)
        .ok_or("envelope is truncated")?;
    encoding.decode(raw)
}

fn nested<T>(result: Result<T, LinkError>) -> Result<T, String> {
    result.map_err(|e| e.to_string())
}

fn encode_request(
    cx: &SerializeContext<'_>,
    request: &InvokeRequest,
) -> Result<Vec<u8>, String> {
    let mut buf = BytesMut::new();
    write_str(&mut buf, &request.controller, cx.encoding);
    write_str(&mut buf, &request.method, cx.encoding);
    buf.put_i32_le(request.param_types.len() as i32);
    for type_name in &request.param_types {
        write_str(&mut buf, type_name, cx.encoding);
    }
    for param in &request.params {
        nested(encode_body(&mut buf, param, cx, (0, 0)))?;
    }
    Ok(buf.to_vec())
}

fn decode_request(cx: &SerializeContext<'_>, bytes: &[u8]) -> Result<InvokeRequest, String> {
    let mut reader = BodyReader::new(bytes);
    let controller = read_str(&mut reader, cx.encoding)?;
    let method = read_str(&mut reader, cx.encoding)?;
    let count = reader.read_i32_le().ok_or("envelope is truncated")?;
    if !(0..=4096).contains(&count) {
        return Err(format!("implausible parameter count {count}"));
    }
    let mut param_types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        param_types.push(read_str(&mut reader, cx.encoding)?);
    }
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        params.push(nested(decode_body(&mut reader, cx, (0, 0)))?);
    }
    if reader.remaining() != 0 {
        return Err("trailing bytes after invoke request".into());
    }
    Ok(InvokeRequest {
        controller,
        method,
        param_types,
        params,
    })
}

fn encode_result(cx: &SerializeContext<'_>, result: &InvokeResult) -> Result<Vec<u8>, String> {
    let mut buf = BytesMut::new();
    buf.put_i32_le(result.exception_code);
    write_str(&mut buf, &result.exception_message, cx.encoding);
    write_str(&mut buf, &result.full_exception, cx.encoding);
    nested(encode_body(&mut buf, &result.result, cx, (0, 0)))?;
    Ok(buf.to_vec())
}

fn decode_result(cx: &SerializeContext<'_>, bytes: &[u8]) -> Result<InvokeResult, String> {
    let mut reader = BodyReader::new(bytes);
    let exception_code = reader.read_i32_le().ok_or("envelope is truncated")?;
    let exception_message = read_str(&mut reader, cx.encoding)?;
    let full_exception = read_str(&mut reader, cx.encoding)?;
    let result = nested(decode_body(&mut reader, cx, (0, 0)))?;
    if reader.remaining() != 0 {
        return Err("trailing bytes after invoke result".into());
    }
    Ok(InvokeResult {
        exception_code,
        exception_message,
        full_exception,
        result,
    })
}

/// Install the RMI envelope codecs into a registry. Called for every
/// registry the crate constructs.
pub(crate) fn register_builtins(registry: &TypeRegistry) {
    registry.register_raw::<InvokeRequest>(
        INVOKE_REQUEST_TYPE,
        Box::new(|cx, obj| {
            let request = obj
                .get::<InvokeRequest>()
                .ok_or("instance is not an InvokeRequest")?;
            encode_request(cx, &request)
        }),
        Box::new(|cx, bytes| {
            decode_request(cx, bytes).map(|r| Arc::new(r) as Arc<dyn std::any::Any + Send + Sync>)
        }),
    );
    registry.register_raw::<InvokeResult>(
        INVOKE_RESULT_TYPE,
        Box::new(|cx, obj| {
            let result = obj
                .get::<InvokeResult>()
                .ok_or("instance is not an InvokeResult")?;
            encode_result(cx, &result)
        }),
        Box::new(|cx, bytes| {
            decode_result(cx, bytes).map(|r| Arc::new(r) as Arc<dyn std::any::Any + Send + Sync>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::serialization::SerializationFormat;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    const POINT: &str = "objlink.tests.Point, objlink";

    fn context(registry: &TypeRegistry) -> SerializeContext<'_> {
        SerializeContext {
            encoding: TextEncoding::Utf8,
            format: SerializationFormat::Json,
            registry,
        }
    }

    #[test]
    fn request_roundtrip_with_scalar_and_object_params() {
        let registry = TypeRegistry::new();
        registry.register::<Point>(POINT);
        let cx = context(&registry);

        let request = InvokeRequest {
            controller: "demo.ICalc, demo".into(),
            method: "Translate".into(),
            param_types: vec!["i32".into(), POINT.into()],
            params: vec![
                Value::I32(4),
                Value::Object(ObjectValue::new(POINT, Point { x: 1, y: 2 })),
            ],
        };

        let bytes = encode_request(&cx, &request).unwrap();
        let decoded = decode_request(&cx, &bytes).unwrap();
        assert_eq!(decoded.controller, request.controller);
        assert_eq!(decoded.method, request.method);
        assert_eq!(decoded.param_types, request.param_types);
        assert_eq!(decoded.params[0], Value::I32(4));
        assert_eq!(
            *decoded.params[1].get::<Point>().unwrap(),
            Point { x: 1, y: 2 }
        );
    }

    #[test]
    fn result_roundtrip_success_and_fault() {
        let registry = TypeRegistry::new();
        let cx = context(&registry);

        let ok = InvokeResult::success(Value::String("done".into()));
        let decoded = decode_result(&cx, &encode_result(&cx, &ok).unwrap()).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.into_outcome().unwrap().as_str(), Some("done"));

        let fault = InvokeResult::fault(FaultKind::MethodNotFound, "no Add(f64, f64)", "trace");
        let decoded = decode_result(&cx, &encode_result(&cx, &fault).unwrap()).unwrap();
        match decoded.into_outcome().unwrap_err() {
            LinkError::ControllerInvocation {
                kind,
                message,
                remote_detail,
            } => {
                assert_eq!(kind, FaultKind::MethodNotFound);
                assert_eq!(message, "no Add(f64, f64)");
                assert_eq!(remote_detail, "trace");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_request_is_rejected() {
        let registry = TypeRegistry::new();
        let cx = context(&registry);
        let request = InvokeRequest {
            controller: "demo.ICalc, demo".into(),
            method: "Add".into(),
            param_types: vec!["i32".into()],
            params: vec![Value::I32(1)],
        };
        let mut bytes = encode_request(&cx, &request).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(decode_request(&cx, &bytes).is_err());
    }

    #[test]
    fn call_arg_conversions_carry_canonical_type_names() {
        assert_eq!(CallArg::from(3i32).type_name, "i32");
        assert_eq!(CallArg::from(2.5f64).type_name, "f64");
        assert_eq!(CallArg::from("hi").type_name, "string");
        assert_eq!(CallArg::from(vec![1u8, 2]).type_name, "bytes");
    }

    #[test]
    fn envelopes_flow_through_the_registry_as_objects() {
        let registry = TypeRegistry::new();
        let cx = context(&registry);
        let request = InvokeRequest {
            controller: "demo.IEcho, demo".into(),
            method: "Echo".into(),
            param_types: vec!["string".into()],
            params: vec![Value::String("x".into())],
        };
        let mut buf = BytesMut::new();
        encode_body(
            &mut buf,
            &Value::Object(ObjectValue::new(INVOKE_REQUEST_TYPE, request)),
            &cx,
            (5, 0),
        )
        .unwrap();
        let bytes = buf.freeze();
        let mut reader = BodyReader::new(&bytes);
        let value = decode_body(&mut reader, &cx, (5, 0)).unwrap();
        let decoded = value.get::<InvokeRequest>().unwrap();
        assert_eq!(decoded.method, "Echo");
    }
}
