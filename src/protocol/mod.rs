//! # Protocol Layer
//!
//! The connection core and the remote-invocation machinery built on the
//! frame codec.
//!
//! ## Components
//! - **Connection**: owns one stream; foreground read, ordered writes,
//!   background listening, shutdown protocol
//! - **Calls**: the outstanding-call table correlating requests to responses
//! - **Invoke**: the RMI request/result envelopes and fault codes
//! - **Controller**: local service objects and their dispatch rules
//! - **Proxy**: the caller-side remote controller surface
//! - **Handshake**: the credential exchange gating every connection

pub mod calls;
pub mod connection;
pub mod controller;
pub mod handshake;
pub mod invoke;
pub mod proxy;
