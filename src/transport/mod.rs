//! # Transport Layer
//!
//! The optional TLS wrapping around the TCP stream. The protocol treats the
//! transport as an opaque bidirectional byte stream; everything here exists
//! to produce such a stream.

pub mod tls;
