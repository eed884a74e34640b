//! # Frame Codec
//!
//! Tokio codec for the wire frame layout over byte streams.
//!
//! The encoder stages the whole frame in memory before touching the output
//! buffer, so a serializer failure never emits a partial frame. The decoder
//! first scans the structural layout to delimit one frame, consumes exactly
//! those bytes, and only then decodes the payload value; a payload that fails
//! to decode therefore never desynchronizes the stream, and the error it
//! raises carries the frame's correlation ids.
//!
//! ## Error policy
//! - Structural violations (unknown type code, negative or oversized length
//!   fields) are `ProtocolViolation` and fatal.
//! - EOF between frames is a clean remote close; EOF mid-frame is
//!   `ConnectionBroken`.
//! - Payload decode failures are `Serialization`/`SerializationTypeNotFound`
//!   with the frame's ids and leave the codec usable.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::frame::{Frame, TypeCode, TextEncoding, MAX_PAYLOAD_SIZE};
use crate::core::serialization::{
    decode_body, encode_body, BodyReader, SerializationFormat, SerializeContext, TypeRegistry,
};
use crate::error::{constants, LinkError};

/// Fixed correlation header: MessageId + InResponseToId + TypeCode.
const HEADER_LEN: usize = 9;

/// Codec translating between [`Frame`] values and the wire layout.
#[derive(Clone)]
pub struct FrameCodec {
    encoding: TextEncoding,
    format: SerializationFormat,
    registry: Arc<TypeRegistry>,
}

impl FrameCodec {
    pub fn new(
        encoding: TextEncoding,
        format: SerializationFormat,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        FrameCodec {
            encoding,
            format,
            registry,
        }
    }

    fn context(&self) -> SerializeContext<'_> {
        SerializeContext {
            encoding: self.encoding,
            format: self.format,
            registry: &self.registry,
        }
    }

    /// Determine the total byte length of the frame at the front of `src`,
    /// or `None` when more bytes are needed. Length fields are validated
    /// before any allocation happens.
    fn scan_frame_len(src: &[u8]) -> Result<Option<usize>, LinkError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let code_byte = src[HEADER_LEN - 1];
        let code = TypeCode::from_u8(code_byte).ok_or_else(|| {
            LinkError::ProtocolViolation(format!(
                "{} ({code_byte})",
                constants::ERR_INVALID_TYPE_CODE
            ))
        })?;
        if code.is_bare() {
            return Ok(Some(HEADER_LEN));
        }

        // CodePage follows; its value is validated during payload decode.
        let mut offset = HEADER_LEN + 4;

        let read_len = |at: usize| -> Result<Option<usize>, LinkError> {
            let Some(bytes) = src.get(at..at + 4) else {
                return Ok(None);
            };
            let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if len < 0 {
                return Err(LinkError::ProtocolViolation(format!(
                    "{} ({len})",
                    constants::ERR_NEGATIVE_LENGTH
                )));
            }
            if len as usize > MAX_PAYLOAD_SIZE {
                return Err(LinkError::ProtocolViolation(format!(
                    "{} ({len} bytes)",
                    constants::ERR_OVERSIZED_FRAME
                )));
            }
            Ok(Some(len as usize))
        };

        if code == TypeCode::Object {
            let Some(name_len) = read_len(offset)? else {
                return Ok(None);
            };
            offset += 4 + name_len;
        }

        let Some(content_len) = read_len(offset)? else {
            return Ok(None);
        };
        Ok(Some(offset + 4 + content_len))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = LinkError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let ids = (frame.message_id, frame.in_response_to_id);

        // Stage the body first: a serializer failure must not leave a
        // half-written frame behind.
        let mut body = BytesMut::new();
        encode_body(&mut body, &frame.value, &self.context(), ids)?;

        dst.reserve(8 + body.len());
        dst.put_i32_le(frame.message_id);
        dst.put_i32_le(frame.in_response_to_id);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(total) = Self::scan_frame_len(src)? else {
            return Ok(None);
        };
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        // Consume the whole frame before value decode so a payload error
        // cannot desynchronize the stream.
        let mut raw = src.split_to(total);
        let message_id = raw.get_i32_le();
        let in_response_to_id = raw.get_i32_le();
        let ids = (message_id, in_response_to_id);

        let mut reader = BodyReader::new(&raw);
        let value = decode_body(&mut reader, &self.context(), ids)?;
        Ok(Some(Frame {
            message_id,
            in_response_to_id,
            value,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Bytes left over at EOF: the peer died mid-frame.
            None => Err(LinkError::ConnectionBroken),
        }
    }
}
