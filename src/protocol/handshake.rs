//! Credential exchange performed immediately after TCP/TLS establishment.
//!
//! The exchange runs over the ordinary framed protocol, with the foreground
//! read/write primitives, strictly before background listening is enabled —
//! so application handlers can never observe the credentials frame or the
//! boolean acknowledgment.
//!
//! Flow:
//! 1. the client writes one frame: a `Credentials` object, or Empty/DBNull
//!    for an anonymous connection;
//! 2. the server validates the frame shape, runs its authenticate callback,
//!    and on success answers with a single `true` frame — on rejection it
//!    just closes the connection;
//! 3. the client treats anything but `true` as an authentication failure.
//!
//! Credential material is zeroized on drop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::core::frame::{ObjectValue, Value};
use crate::core::serialization::TypeRegistry;
use crate::error::{constants, LinkError, Result};
use crate::protocol::connection::Connection;

/// Wire identifier of the credentials object.
pub const CREDENTIALS_TYPE: &str = "objlink.auth.Credentials, objlink";

/// Client credentials. Any field may be empty; an entirely absent
/// credentials frame means an anonymous connection.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
    pub token: String,
}

impl Credentials {
    pub fn new(
        user_name: impl Into<String>,
        password: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Credentials {
            user_name: user_name.into(),
            password: password.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Validates a peer's credentials and names its identity.
///
/// `None` means the peer connected anonymously. Returning `Err` rejects the
/// connection with the given reason.
pub type Authenticator =
    Arc<dyn Fn(Option<&Credentials>) -> std::result::Result<String, String> + Send + Sync>;

/// An authenticator that admits everyone, naming anonymous peers
/// `"anonymous"` and others by their user name.
pub fn accept_all() -> Authenticator {
    Arc::new(|credentials| {
        Ok(credentials
            .map(|c| c.user_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "anonymous".to_owned()))
    })
}

pub(crate) fn register_builtins(registry: &TypeRegistry) {
    registry.register::<Credentials>(CREDENTIALS_TYPE);
}

/// Client side of the exchange: write credentials, await the acknowledgment.
pub(crate) async fn client_handshake(
    connection: &Connection,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let frame_value = match credentials {
        Some(credentials) => Value::Object(ObjectValue::new(CREDENTIALS_TYPE, credentials.clone())),
        None => Value::Empty,
    };
    connection.write_value(frame_value).await?;

    match connection.read_value().await {
        Ok(value) if value.as_bool() == Some(true) => {
            debug!("credential exchange accepted");
            Ok(())
        }
        Ok(_) => Err(LinkError::ClientAuthentication(
            constants::ERR_AUTH_REJECTED.into(),
        )),
        // The server closes without an acknowledgment on rejection.
        Err(LinkError::ConnectionBroken) => Err(LinkError::ClientAuthentication(
            constants::ERR_AUTH_NO_ACK.into(),
        )),
        Err(err) => Err(err),
    }
}

/// Server side of the exchange. Returns the identity chosen by the
/// authenticator; on any failure the caller closes the connection without
/// writing an acknowledgment.
pub(crate) async fn server_handshake(
    connection: &Connection,
    authenticator: &Authenticator,
) -> Result<String> {
    let value = connection.read_value().await?;

    let credentials = if value.is_empty_or_null() {
        None
    } else {
        match value.get::<Credentials>() {
            Some(credentials) => Some(credentials),
            None => {
                return Err(LinkError::ClientAuthentication(
                    constants::ERR_NOT_CREDENTIALS.into(),
                ))
            }
        }
    };

    let identity = authenticator(credentials.as_deref())
        .map_err(LinkError::ClientAuthentication)?;

    connection.write_value(Value::Bool(true)).await?;
    debug!(%identity, "peer authenticated");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;

    fn pair() -> (Connection, Connection) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let registry = || Arc::new(TypeRegistry::new());
        (
            Connection::new(Box::new(left), LinkConfig::default(), registry()),
            Connection::new(Box::new(right), LinkConfig::default(), registry()),
        )
    }

    #[tokio::test]
    async fn anonymous_exchange_succeeds() {
        let (client, server) = pair();
        let auth = accept_all();
        let server_task = tokio::spawn(async move {
            let identity = server_handshake(&server, &auth).await.unwrap();
            assert_eq!(identity, "anonymous");
        });
        client_handshake(&client, None).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn named_credentials_carry_the_identity() {
        let (client, server) = pair();
        let auth: Authenticator = Arc::new(|credentials| match credentials {
            Some(c) if c.password == "s3cret" => Ok(c.user_name.clone()),
            _ => Err("bad password".into()),
        });
        let server_task = tokio::spawn(async move {
            server_handshake(&server, &auth).await
        });
        client_handshake(&client, Some(&Credentials::new("ada", "s3cret", "")))
            .await
            .unwrap();
        assert_eq!(server_task.await.unwrap().unwrap(), "ada");
    }

    #[tokio::test]
    async fn rejected_credentials_close_without_ack() {
        let (client, server) = pair();
        let auth: Authenticator = Arc::new(|_| Err("nobody gets in".into()));
        let server_task = tokio::spawn(async move {
            let err = server_handshake(&server, &auth).await.unwrap_err();
            assert!(matches!(err, LinkError::ClientAuthentication(_)));
            // Reject path: close with no acknowledgment frame.
            server.close().await;
        });
        let err = client_handshake(&client, Some(&Credentials::new("eve", "x", "")))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ClientAuthentication(_)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn non_credentials_first_frame_is_rejected() {
        let (client, server) = pair();
        let auth = accept_all();
        let server_task = tokio::spawn(async move {
            server_handshake(&server, &auth).await
        });
        client.write_value(Value::I32(42)).await.unwrap();
        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::ClientAuthentication(_)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let text = format!("{:?}", Credentials::new("ada", "hunter2", "tok-99"));
        assert!(text.contains("ada"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("tok-99"));
        assert!(text.contains("<redacted>"));
    }
}
