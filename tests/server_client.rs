#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end scenarios over real TCP: the credential exchange, peer
//! bookkeeping, RMI in both directions, TLS wrapping, and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, Adder, EchoController, Recorder, ADDER, ECHO};
use objlink::{
    Authenticator, Client, ClientConfig, ConnectOptions, ControllerSource, Credentials, LinkError,
    Server, ServerConfig, TlsClientConfig, TlsServerConfig, TypeRegistry, Value,
};
use tokio::net::TcpListener;

async fn bound_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

fn client_config(address: &str) -> ClientConfig {
    ClientConfig {
        address: address.to_owned(),
        ..ClientConfig::default()
    }
}

fn password_authenticator() -> Authenticator {
    Arc::new(|credentials: Option<&Credentials>| match credentials {
        Some(c) if c.password == "s3cret" => Ok(c.user_name.clone()),
        Some(_) => Err("bad password".into()),
        None => Err("anonymous connections not allowed".into()),
    })
}

#[tokio::test]
async fn authenticated_end_to_end_messaging_and_rmi() {
    let (listener, address) = bound_listener().await;

    let server = Server::builder(ServerConfig::default())
        .with_authenticator(password_authenticator())
        .build();
    server.expose(ADDER, ControllerSource::instance(Adder));
    let accept_loop = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    let client = Client::connect_with(
        client_config(&address),
        ConnectOptions {
            credentials: Some(Credentials::new("ada", "s3cret", "")),
            ..ConnectOptions::default()
        },
    )
    .await
    .unwrap();
    client.expose(ECHO, ControllerSource::instance(EchoController));

    // The authenticate callback's identity is recorded on the peer.
    wait_until("peer registered", || server.peers().len() == 1).await;
    let peer = server.peers().remove(0);
    assert_eq!(peer.identity, "ada");

    // Client -> server application message.
    let inbound: Recorder<Value> = Recorder::new();
    let sink = inbound.clone();
    peer.connection
        .on_received(move |value| sink.push(value.clone()))
        .detach();
    client.send(Value::String("hi server".into())).await.unwrap();
    wait_until("server received", || inbound.len() == 1).await;
    assert_eq!(inbound.snapshot()[0].as_str(), Some("hi server"));

    // Client -> server RMI.
    let adder = client.controller(ADDER);
    let sum = adder
        .invoke("Add", vec![40i32.into(), 2i32.into()])
        .await
        .unwrap();
    assert_eq!(sum.as_i32(), Some(42));

    // Server -> client RMI over the same connection.
    let echo = peer.connection.controller(ECHO);
    let echoed = echo.invoke("Echo", vec!["round trip".into()]).await.unwrap();
    assert_eq!(echoed.as_str(), Some("round trip"));

    // Shutdown disconnects the peers (disconnect_clients_on_dispose = true).
    let closed: Recorder<bool> = Recorder::new();
    let closed_sink = closed.clone();
    client
        .on_closed(move |error| closed_sink.push(error.is_some()))
        .detach();
    server.shutdown();
    accept_loop.await.unwrap().unwrap();
    wait_until("client disconnected", || closed.len() == 1).await;
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn rejected_credentials_yield_client_authentication() {
    let (listener, address) = bound_listener().await;
    let server = Server::builder(ServerConfig::default())
        .with_authenticator(password_authenticator())
        .build();
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    let err = Client::connect_with(
        client_config(&address),
        ConnectOptions {
            credentials: Some(Credentials::new("eve", "wrong", "")),
            ..ConnectOptions::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LinkError::ClientAuthentication(_)));

    let err = Client::connect(client_config(&address)).await.unwrap_err();
    assert!(matches!(err, LinkError::ClientAuthentication(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.peers().is_empty());
    server.shutdown();
}

#[tokio::test]
async fn handshake_frames_never_reach_application_handlers() {
    let (listener, address) = bound_listener().await;
    let server = Server::new(ServerConfig::default());
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    let client = Client::connect_with(
        client_config(&address),
        ConnectOptions {
            credentials: Some(Credentials::new("ada", "", "")),
            ..ConnectOptions::default()
        },
    )
    .await
    .unwrap();

    // Both sides observe every application value from the moment the
    // connection exists.
    let client_seen: Recorder<Value> = Recorder::new();
    let sink = client_seen.clone();
    client
        .on_received(move |value| sink.push(value.clone()))
        .detach();

    wait_until("peer registered", || server.peers().len() == 1).await;
    let peer = server.peers().remove(0);
    let server_seen: Recorder<Value> = Recorder::new();
    let sink = server_seen.clone();
    peer.connection
        .on_received(move |value| sink.push(value.clone()))
        .detach();

    client.send(Value::String("only this".into())).await.unwrap();
    peer.connection
        .write_value(Value::String("and this".into()))
        .await
        .unwrap();

    wait_until("both deliveries", || {
        client_seen.len() == 1 && server_seen.len() == 1
    })
    .await;

    // No credentials object, no boolean acknowledgment: just the payloads.
    assert_eq!(server_seen.snapshot()[0].as_str(), Some("only this"));
    assert_eq!(client_seen.snapshot()[0].as_str(), Some("and this"));
    server.shutdown();
}

#[tokio::test]
async fn tls_wrapped_connections_carry_the_same_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("server.pem");
    let key_path = dir.path().join("server.key");
    let tls_server =
        TlsServerConfig::generate_self_signed(cert_path.as_path(), key_path.as_path()).unwrap();

    let (listener, address) = bound_listener().await;
    let registry = Arc::new(TypeRegistry::new());
    let server = Server::builder(ServerConfig::default())
        .with_registry(Arc::clone(&registry))
        .with_tls(tls_server)
        .build();
    server.expose(ADDER, ControllerSource::instance(Adder));
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    let client = Client::connect_with(
        client_config(&address),
        ConnectOptions {
            tls: Some(TlsClientConfig::new("localhost").insecure()),
            ..ConnectOptions::default()
        },
    )
    .await
    .unwrap();

    let sum = client
        .controller(ADDER)
        .invoke("Add", vec![5i32.into(), 6i32.into()])
        .await
        .unwrap();
    assert_eq!(sum.as_i32(), Some(11));

    client.close().await;
    server.shutdown();
}

#[tokio::test]
async fn connect_to_a_dead_port_is_connection_open() {
    // Bind then drop to find a port with nothing listening.
    let (listener, address) = bound_listener().await;
    drop(listener);

    let err = Client::connect(client_config(&address)).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectionOpen(_)));
}

#[tokio::test]
async fn connection_limit_rejects_excess_clients() {
    let (listener, address) = bound_listener().await;
    let server = Server::new(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    });
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    let first = Client::connect(client_config(&address)).await.unwrap();
    wait_until("first peer", || server.peers().len() == 1).await;

    // The second connection is dropped before the handshake completes.
    let second = Client::connect(client_config(&address)).await;
    assert!(second.is_err());
    assert_eq!(server.peers().len(), 1);

    first.close().await;
    server.shutdown();
}
