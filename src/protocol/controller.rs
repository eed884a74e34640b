//! # Local Controllers
//!
//! Service objects that handle incoming remote invocations.
//!
//! A controller is registered under an identifier string
//! (`"<full type name>, <module name>"`) and dispatches by method name plus
//! element-wise parameter type matching. Registration can hand over a live
//! instance, a zero-argument constructor, or a factory that receives the
//! owning connection; whichever form is used, the first successful
//! resolution is memoized for the connection's lifetime and the registry is
//! append-only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::frame::Value;
use crate::protocol::connection::Connection;
use crate::protocol::invoke::{InvokeFault, InvokeRequest};

/// One incoming method invocation, ready for dispatch.
#[derive(Debug)]
pub struct MethodCall {
    /// Method name requested by the peer.
    pub method: String,
    /// Positional parameter type full-names.
    pub param_types: Vec<String>,
    /// Argument values, positionally matching `param_types`.
    pub args: Vec<Value>,
}

impl MethodCall {
    pub(crate) fn from_request(request: &InvokeRequest) -> Self {
        MethodCall {
            method: request.method.clone(),
            param_types: request.param_types.clone(),
            args: request.params.clone(),
        }
    }

    /// True when the call names `method` with exactly these parameter types,
    /// compared element-wise. This is the protocol's whole overload rule.
    pub fn matches(&self, method: &str, param_types: &[&str]) -> bool {
        self.method == method
            && self.param_types.len() == param_types.len()
            && self
                .param_types
                .iter()
                .zip(param_types)
                .all(|(have, want)| have == want)
    }

    /// The standard fault for a call nothing matched.
    pub fn not_found(&self) -> InvokeFault {
        InvokeFault::method_not_found(&self.method, &self.param_types)
    }
}

/// A service object invokable by the remote peer.
///
/// Implementations match on `(method, parameter types)` and return the result
/// value or a fault. Unmatched calls must return [`MethodCall::not_found`];
/// the dispatcher turns it into the MethodNotFound reply.
///
/// ```ignore
/// struct Adder;
///
/// #[async_trait]
/// impl Controller for Adder {
///     async fn invoke(&self, call: MethodCall) -> Result<Value, InvokeFault> {
///         if call.matches("Add", &["i32", "i32"]) {
///             let (a, b) = (call.args[0].as_i32().unwrap(), call.args[1].as_i32().unwrap());
///             return Ok(Value::I32(a + b));
///         }
///         Err(call.not_found())
///     }
/// }
/// ```
#[async_trait]
pub trait Controller: Send + Sync {
    async fn invoke(&self, call: MethodCall) -> Result<Value, InvokeFault>;
}

/// How a controller registration produces its instance.
pub enum ControllerSource {
    /// A live instance shared by every invocation.
    Instance(Arc<dyn Controller>),
    /// A zero-argument constructor, run on first resolution.
    Constructor(Box<dyn Fn() -> Arc<dyn Controller> + Send + Sync>),
    /// A factory receiving the owning connection, run on first resolution.
    Factory(Box<dyn Fn(&Connection) -> Arc<dyn Controller> + Send + Sync>),
}

impl ControllerSource {
    pub fn instance(controller: impl Controller + 'static) -> Self {
        ControllerSource::Instance(Arc::new(controller))
    }

    pub fn constructor<C, F>(ctor: F) -> Self
    where
        C: Controller + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        ControllerSource::Constructor(Box::new(move || Arc::new(ctor())))
    }

    pub fn factory<C, F>(factory: F) -> Self
    where
        C: Controller + 'static,
        F: Fn(&Connection) -> C + Send + Sync + 'static,
    {
        ControllerSource::Factory(Box::new(move |conn| Arc::new(factory(conn))))
    }
}

struct ControllerSlot {
    source: Arc<ControllerSource>,
    resolved: Option<Arc<dyn Controller>>,
}

/// Identifier string -> controller slot, memoizing the first resolution.
pub(crate) struct ControllerRegistry {
    slots: Mutex<HashMap<String, ControllerSlot>>,
}

impl ControllerRegistry {
    pub(crate) fn new() -> Self {
        ControllerRegistry {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Append-only registration; the first registration of a name wins.
    pub(crate) fn register(&self, identifier: &str, source: ControllerSource) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(identifier.to_owned()).or_insert(ControllerSlot {
            source: Arc::new(source),
            resolved: None,
        });
    }

    /// Resolve an identifier to its controller, constructing and memoizing
    /// on first use. Construction runs outside the registry lock so a
    /// factory may inspect the connection freely.
    pub(crate) fn resolve(
        &self,
        identifier: &str,
        connection: &Connection,
    ) -> Option<Arc<dyn Controller>> {
        let source = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots.get(identifier)?;
            if let Some(resolved) = &slot.resolved {
                return Some(Arc::clone(resolved));
            }
            Arc::clone(&slot.source)
        };

        let constructed = match source.as_ref() {
            ControllerSource::Instance(instance) => Arc::clone(instance),
            ControllerSource::Constructor(ctor) => ctor(),
            ControllerSource::Factory(factory) => factory(connection),
        };

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get_mut(identifier)?;
        // Two racing resolutions: the first memoized instance wins.
        Some(Arc::clone(
            slot.resolved.get_or_insert(constructed),
        ))
    }
}
