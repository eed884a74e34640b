//! # objlink
//!
//! A lightweight TCP object-messaging library with remote method invocation.
//!
//! Two peers — a server accepting many clients, and a client connected to
//! one server — exchange typed values over a single long-lived,
//! authenticated, optionally TLS-protected connection. On top of that
//! message channel, either peer may register named *controllers* (service
//! objects identified by an interface name) and either peer may invoke
//! methods on the other side's controllers and await their return values.
//!
//! ## Layers
//! - [`core`]: the wire frame, the tokio codec, and the pluggable object
//!   serializer behind the type registry
//! - [`protocol`]: the connection core — ordered writes, foreground reads,
//!   background listening, the RMI correlation engine, controllers and
//!   proxies, and the credential exchange
//! - [`service`]: the server accept loop and the client connector
//! - [`transport`]: optional TLS wrapping of the TCP stream
//!
//! ## Quick tour
//!
//! ```ignore
//! use objlink::{Client, ClientConfig, Server, ServerConfig, Value};
//!
//! // Server side
//! let server = Server::new(ServerConfig::default());
//! server.expose("demo.IAdd, demo", ControllerSource::instance(Adder));
//! tokio::spawn({ let server = server.clone(); async move { server.listen().await } });
//!
//! // Client side
//! let client = Client::connect(ClientConfig::default()).await?;
//! let adder = client.controller("demo.IAdd, demo");
//! let sum = adder.invoke("Add", vec![2i32.into(), 3i32.into()]).await?;
//! assert_eq!(sum.as_i32(), Some(5));
//! ```
//!
//! ## Concurrency model
//! Each connection is logically single-threaded on the wire: one mutex
//! serializes every byte written, one serializes every frame decoded, and a
//! single background task delivers received values. Incoming invocations
//! run on spawned tasks so the read loop never blocks. Closing the
//! connection releases every pending operation.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{ClientConfig, LinkConfig, ServerConfig};
pub use crate::core::frame::{Decimal, Frame, ObjectValue, TextEncoding, TypeCode, Value};
pub use crate::core::serialization::{SerializationFormat, TypeRegistry};
pub use crate::error::{FaultKind, LinkError, Result};
pub use crate::protocol::connection::{Connection, ConnectionState, LinkStream, Subscription};
pub use crate::protocol::controller::{Controller, ControllerSource, MethodCall};
pub use crate::protocol::handshake::{Authenticator, Credentials};
pub use crate::protocol::invoke::{CallArg, InvokeFault, InvokeRequest, InvokeResult};
pub use crate::protocol::proxy::{RemoteController, RemoteInterface};
pub use crate::service::client::{Client, ConnectOptions};
pub use crate::service::server::{Peer, Server, ServerBuilder};
pub use crate::transport::tls::{TlsClientConfig, TlsServerConfig};

// The dispatch trait surface re-exported for implementors.
pub use async_trait::async_trait;
