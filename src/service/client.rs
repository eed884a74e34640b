//! # Client Service
//!
//! Opens the TCP (and optionally TLS) stream, runs the credential exchange,
//! and exposes the connected peer as a thin facade over the connection core.

use std::io;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::core::frame::Value;
use crate::core::serialization::TypeRegistry;
use crate::error::{LinkError, Result};
use crate::protocol::connection::{Connection, ConnectionState, LinkStream, Subscription};
use crate::protocol::controller::ControllerSource;
use crate::protocol::handshake::{self, Credentials};
use crate::protocol::proxy::{RemoteController, RemoteInterface};
use crate::transport::tls::{self, TlsClientConfig};

/// Optional pieces of a client connection beyond the address.
#[derive(Default)]
pub struct ConnectOptions {
    /// Credentials for the exchange; `None` connects anonymously.
    pub credentials: Option<Credentials>,
    /// TLS wrapping for the stream.
    pub tls: Option<TlsClientConfig>,
    /// A shared type registry pre-populated with application types.
    pub registry: Option<Arc<TypeRegistry>>,
}

/// A connected, authenticated client peer.
///
/// After `connect` returns, background listening is enabled: received
/// application values arrive through [`on_received`] handlers, and remote
/// controllers are reachable through [`controller`] / [`controller_as`].
///
/// [`on_received`]: Client::on_received
/// [`controller`]: Client::controller
/// [`controller_as`]: Client::controller_as
pub struct Client {
    connection: Connection,
}

impl Client {
    /// Connect anonymously without TLS.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with(config, ConnectOptions::default()).await
    }

    /// Connect with credentials, TLS, or a shared registry.
    #[instrument(skip(config, options), fields(address = %config.address))]
    pub async fn connect_with(config: ClientConfig, options: ConnectOptions) -> Result<Self> {
        config.validate_strict()?;

        let socket = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(&config.address),
        )
        .await
        .map_err(|_| {
            LinkError::ConnectionOpen(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection attempt timed out",
            ))
        })?
        .map_err(LinkError::ConnectionOpen)?;

        let stream: Box<dyn LinkStream> = match &options.tls {
            Some(tls_config) => Box::new(tls::connect(tls_config, socket).await?),
            None => Box::new(socket),
        };

        // Listening stays off until the exchange is over so the credentials
        // frame and the acknowledgment never reach application handlers.
        let mut link = config.link.clone();
        link.listening = false;
        let registry = options
            .registry
            .unwrap_or_else(|| Arc::new(TypeRegistry::new()));
        let connection = Connection::new(stream, link, registry);

        if let Err(err) =
            handshake::client_handshake(&connection, options.credentials.as_ref()).await
        {
            connection.close().await;
            return Err(err);
        }

        debug!("connected and authenticated");
        connection.set_listening(true);
        Ok(Client { connection })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.connection.registry()
    }

    /// Send one application value.
    pub async fn send(&self, value: Value) -> Result<()> {
        self.connection.write_value(value).await
    }

    /// Send a registered application object.
    pub async fn send_object<T: std::any::Any + Send + Sync>(&self, instance: T) -> Result<()> {
        self.connection.send_object(instance).await
    }

    /// Register a local controller the server may invoke.
    pub fn expose(&self, identifier: &str, source: ControllerSource) {
        self.connection.expose(identifier, source);
    }

    /// The cached proxy for a remote controller identifier.
    pub fn controller(&self, identifier: &str) -> Arc<RemoteController> {
        self.connection.controller(identifier)
    }

    /// A typed stub attached to the proxy for `T::IDENTIFIER`.
    pub fn controller_as<T: RemoteInterface>(&self) -> T {
        self.connection.controller_as::<T>()
    }

    /// Observe received application values.
    pub fn on_received(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.connection.on_received(handler)
    }

    /// Observe non-fatal receive errors.
    pub fn on_received_error(
        &self,
        handler: impl Fn(&LinkError) + Send + Sync + 'static,
    ) -> Subscription {
        self.connection.on_received_error(handler)
    }

    /// Observe disconnection; the payload is `None` for a graceful close.
    pub fn on_closed(
        &self,
        handler: impl Fn(&Option<LinkError>) + Send + Sync + 'static,
    ) -> Subscription {
        self.connection.on_closed(handler)
    }

    /// Gracefully close the connection.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish()
    }
}
