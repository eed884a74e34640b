//! # Remote Controller Proxies
//!
//! The caller side of the RMI path: a proxy bound to a controller identifier
//! that forwards every call over the connection and awaits the correlated
//! response.
//!
//! Statically typed stubs are layered on top through [`RemoteInterface`]:
//! a hand-written wrapper declares its wire identifier and methods, and each
//! method body funnels into [`RemoteController::invoke`] with positional
//! [`CallArg`]s. That keeps the wire contract of the dynamic original (name
//! plus parameter-type-name matching) while the call sites stay typed.

use std::sync::{Arc, Weak};

use crate::core::frame::Value;
use crate::error::Result;
use crate::protocol::connection::ConnectionInner;
use crate::protocol::invoke::{CallArg, InvokeRequest};

/// A proxy over a remote controller. Cheap to clone; cached per connection
/// and identifier.
pub struct RemoteController {
    connection: Weak<ConnectionInner>,
    identifier: String,
}

impl RemoteController {
    pub(crate) fn new(connection: Weak<ConnectionInner>, identifier: String) -> Self {
        RemoteController {
            connection,
            identifier,
        }
    }

    /// The controller identifier this proxy is bound to.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Invoke a remote method and await its return value.
    ///
    /// Fails with `ControllerInvocation` when the remote reports a fault,
    /// with `ObjectDisposed` after the connection is gone.
    pub async fn invoke(&self, method: &str, args: Vec<CallArg>) -> Result<Value> {
        let connection = self
            .connection
            .upgrade()
            .ok_or(crate::error::LinkError::ObjectDisposed)?;

        let mut param_types = Vec::with_capacity(args.len());
        let mut params = Vec::with_capacity(args.len());
        for arg in args {
            param_types.push(arg.type_name);
            params.push(arg.value);
        }

        let request = InvokeRequest {
            controller: self.identifier.clone(),
            method: method.to_owned(),
            param_types,
            params,
        };
        connection.invoke_remote(request).await
    }

    /// Invoke a remote method that returns nothing.
    pub async fn invoke_unit(&self, method: &str, args: Vec<CallArg>) -> Result<()> {
        self.invoke(method, args).await.map(|_| ())
    }
}

impl std::fmt::Debug for RemoteController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteController")
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// A hand-written typed stub over a remote controller.
///
/// ```ignore
/// struct AddClient {
///     remote: Arc<RemoteController>,
/// }
///
/// impl RemoteInterface for AddClient {
///     const IDENTIFIER: &'static str = "demo.IAdd, demo";
///     fn attach(remote: Arc<RemoteController>) -> Self {
///         AddClient { remote }
///     }
/// }
///
/// impl AddClient {
///     async fn add(&self, a: i32, b: i32) -> Result<i32> {
///         let value = self.remote.invoke("Add", vec![a.into(), b.into()]).await?;
///         Ok(value.as_i32().unwrap_or_default())
///     }
/// }
/// ```
pub trait RemoteInterface: Sized {
    /// The wire identifier of the remote controller,
    /// `"<full type name>, <module name>"`.
    const IDENTIFIER: &'static str;

    /// Bind the stub to its proxy.
    fn attach(remote: Arc<RemoteController>) -> Self;
}
