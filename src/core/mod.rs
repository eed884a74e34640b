//! # Core Protocol Components
//!
//! Low-level frame handling, codecs, and payload serialization.
//!
//! This module provides the foundation for the protocol: the typed frame
//! model, the wire codec, and the pluggable object serializer behind the
//! type registry.
//!
//! ## Components
//! - **Frame**: correlation header plus typed payload value
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Serialization**: object formats and the wire type-name registry
//!
//! ## Wire Format
//! ```text
//! [MessageId(4)] [InResponseToId(4)] [TypeCode(1)] [CodePage(4)?]
//! [TypeNameLen(4)? TypeName(N)?] [ContentLength(4)? Content(M)?]
//! ```
//!
//! ## Security
//! - Maximum payload size: 16MB (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod frame;
pub mod serialization;
