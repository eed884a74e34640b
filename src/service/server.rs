//! # Server Service
//!
//! The TCP accept loop: accepts sockets, optionally performs the TLS server
//! handshake, runs the credential exchange before anything else flows, and
//! maintains the list of live peers.
//!
//! The server is a thin collaborator around the connection core — every
//! accepted socket ends up as an ordinary [`Connection`] with background
//! listening enabled and the server's controllers installed.

use std::sync::{Arc, Mutex, Weak};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::serialization::TypeRegistry;
use crate::error::{LinkError, Result};
use crate::protocol::connection::{Connection, LinkStream};
use crate::protocol::controller::{Controller, ControllerSource};
use crate::protocol::handshake::{self, Authenticator};
use crate::transport::tls::{self, TlsServerConfig};

/// One authenticated peer connection tracked by the server.
pub struct Peer {
    /// Identity chosen by the authenticate callback.
    pub identity: String,
    /// The live connection to this peer.
    pub connection: Connection,
    /// Remote socket address.
    pub address: std::net::SocketAddr,
}

struct ExposedController {
    identifier: String,
    source: Arc<ControllerSource>,
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<TypeRegistry>,
    authenticator: Authenticator,
    tls: Option<TlsServerConfig>,
    controllers: Mutex<Vec<ExposedController>>,
    peers: Mutex<Vec<Arc<Peer>>>,
    shutdown: CancellationToken,
}

/// Staged configuration for a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: Arc<TypeRegistry>,
    authenticator: Authenticator,
    tls: Option<TlsServerConfig>,
}

impl ServerBuilder {
    /// Use a shared type registry (pre-populated with application types).
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Install the credential-exchange callback.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Serve TLS on every accepted socket.
    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                registry: self.registry,
                authenticator: self.authenticator,
                tls: self.tls,
                controllers: Mutex::new(Vec::new()),
                peers: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// Accepts connections, authenticates them, and keeps the peer list.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// A server with the default registry and an accept-all authenticator.
    pub fn new(config: ServerConfig) -> Self {
        Server::builder(config).build()
    }

    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            registry: Arc::new(TypeRegistry::new()),
            authenticator: handshake::accept_all(),
            tls: None,
        }
    }

    /// Expose a controller on every current and future peer connection.
    pub fn expose(&self, identifier: &str, source: ControllerSource) {
        let shared = Arc::new(source);
        for peer in self.peers() {
            peer.connection
                .expose(identifier, shared_source(&shared));
        }
        self.inner
            .controllers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExposedController {
                identifier: identifier.to_owned(),
                source: shared,
            });
    }

    /// The registry application types should be registered into.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    /// Snapshot of the live peers.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bind the configured address and accept connections until
    /// [`shutdown`] is called.
    ///
    /// [`shutdown`]: Server::shutdown
    #[instrument(skip(self), fields(address = %self.inner.config.address))]
    pub async fn listen(&self) -> Result<()> {
        self.inner.config.validate_strict()?;
        let listener = TcpListener::bind(&self.inner.config.address)
            .await
            .map_err(LinkError::ConnectionOpen)?;
        info!("listening");
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener until [`shutdown`]
    /// is called.
    ///
    /// [`shutdown`]: Server::shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let acceptor = match &self.inner.tls {
            Some(tls) => Some(tls.acceptor()?),
            None => None,
        };

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    info!("accept loop shutting down");
                    self.disconnect_peers().await;
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, address)) => {
                            let server = self.clone();
                            let acceptor = acceptor.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_socket(socket, address, acceptor).await {
                                    warn!(peer = %address, error = %e, "connection setup failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }

    /// Serve a single accepted socket: TLS, credential exchange, peer
    /// registration, background listening.
    async fn handle_socket(
        &self,
        socket: TcpStream,
        address: std::net::SocketAddr,
        acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) -> Result<()> {
        {
            let peers = self.inner.peers.lock().unwrap_or_else(|e| e.into_inner());
            if peers.len() >= self.inner.config.max_connections {
                warn!(peer = %address, "connection limit reached, rejecting");
                return Ok(());
            }
        }

        let stream: Box<dyn LinkStream> = match &acceptor {
            Some(acceptor) => Box::new(tls::accept(acceptor, socket).await?),
            None => Box::new(socket),
        };

        // The handshake runs on the foreground primitives, so listening must
        // stay off until it has finished.
        let mut link = self.inner.config.link.clone();
        link.listening = false;
        let connection = Connection::new(stream, link, Arc::clone(&self.inner.registry));

        let identity = match handshake::server_handshake(&connection, &self.inner.authenticator).await
        {
            Ok(identity) => identity,
            Err(err) => {
                debug!(peer = %address, error = %err, "credential exchange rejected");
                connection.close().await;
                return Err(err);
            }
        };

        for exposed in self
            .inner
            .controllers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            connection.expose(&exposed.identifier, shared_source(&exposed.source));
        }

        let peer = Arc::new(Peer {
            identity: identity.clone(),
            connection: connection.clone(),
            address,
        });
        self.inner
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&peer));

        // Drop the peer from the list whenever its connection ends.
        let server: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let peer_ref = Arc::downgrade(&peer);
        connection
            .on_closed(move |_| {
                if let (Some(server), Some(peer)) = (server.upgrade(), peer_ref.upgrade()) {
                    server
                        .peers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retain(|candidate| !Arc::ptr_eq(candidate, &peer));
                }
            })
            .detach();

        connection.set_listening(true);
        info!(peer = %address, %identity, "peer connected");
        Ok(())
    }

    async fn disconnect_peers(&self) {
        if !self.inner.config.link.disconnect_clients_on_dispose {
            return;
        }
        let peers: Vec<Arc<Peer>> = {
            let mut guard = self.inner.peers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for peer in peers {
            peer.connection.close().await;
        }
    }

    /// Stop accepting and, when configured, disconnect every live peer.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Per-connection view of a server-wide controller registration. The
/// connection's own registry still memoizes the resolved instance, so a
/// constructor or factory runs at most once per peer.
fn shared_source(source: &Arc<ControllerSource>) -> ControllerSource {
    let shared = Arc::clone(source);
    ControllerSource::Factory(Box::new(move |connection| -> Arc<dyn Controller> {
        match shared.as_ref() {
            ControllerSource::Instance(instance) => Arc::clone(instance),
            ControllerSource::Constructor(ctor) => ctor(),
            ControllerSource::Factory(factory) => factory(connection),
        }
    }))
}
