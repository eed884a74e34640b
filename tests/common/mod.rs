#![allow(dead_code)]
//! Shared fixtures for the integration tests: in-memory connection pairs,
//! event recorders, and a few sample controllers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use objlink::async_trait;
use objlink::{
    Connection, Controller, InvokeFault, LinkConfig, MethodCall, TypeRegistry, Value,
};
use serde::{Deserialize, Serialize};

pub const ADDER: &str = "demo.IAdd, demo";
pub const ECHO: &str = "demo.IEcho, demo";
pub const POINT: &str = "demo.Point, demo";
pub const SENSOR: &str = "demo.Sensor, demo";

/// Two connections talking to each other over an in-memory duplex.
pub fn pair() -> (Connection, Connection) {
    pair_with(Arc::new(TypeRegistry::new()), Arc::new(TypeRegistry::new()))
}

pub fn pair_with(
    left_registry: Arc<TypeRegistry>,
    right_registry: Arc<TypeRegistry>,
) -> (Connection, Connection) {
    let (left, right) = tokio::io::duplex(256 * 1024);
    (
        Connection::new(Box::new(left), LinkConfig::default(), left_registry),
        Connection::new(Box::new(right), LinkConfig::default(), right_registry),
    )
}

/// Poll until a condition holds, panicking after five seconds.
pub async fn wait_until(label: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {label}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Thread-safe event collector for handler callbacks.
#[derive(Clone)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Recorder {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub reading: f64,
}

/// Integer arithmetic controller used by most RMI scenarios.
pub struct Adder;

#[async_trait]
impl Controller for Adder {
    async fn invoke(&self, call: MethodCall) -> Result<Value, InvokeFault> {
        if call.matches("Add", &["i32", "i32"]) {
            let a = call.args[0]
                .as_i32()
                .ok_or_else(|| InvokeFault::from_error("argument 0 is not an i32"))?;
            let b = call.args[1]
                .as_i32()
                .ok_or_else(|| InvokeFault::from_error("argument 1 is not an i32"))?;
            return Ok(Value::I32(a + b));
        }
        if call.matches("Fail", &[]) {
            return Err(InvokeFault::from_error("boom").with_detail("Fail always faults"));
        }
        if call.matches("SlowAdd", &["i32", "i32"]) {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let a = call.args[0].as_i32().unwrap_or_default();
            let b = call.args[1].as_i32().unwrap_or_default();
            return Ok(Value::I32(a + b));
        }
        Err(call.not_found())
    }
}

/// String echo controller.
pub struct EchoController;

#[async_trait]
impl Controller for EchoController {
    async fn invoke(&self, call: MethodCall) -> Result<Value, InvokeFault> {
        if call.matches("Echo", &["string"]) {
            let text = call.args[0].as_str().unwrap_or_default();
            return Ok(Value::String(text.to_owned()));
        }
        Err(call.not_found())
    }
}

/// Controller translating a registered object parameter.
pub struct Translator {
    pub registry: Arc<TypeRegistry>,
}

#[async_trait]
impl Controller for Translator {
    async fn invoke(&self, call: MethodCall) -> Result<Value, InvokeFault> {
        if call.matches("Translate", &[POINT, "i32"]) {
            let point = call.args[0]
                .get::<Point>()
                .ok_or_else(|| InvokeFault::from_error("argument 0 is not a Point"))?;
            let delta = call.args[1].as_i32().unwrap_or_default();
            let moved = Point {
                x: point.x + delta,
                y: point.y + delta,
            };
            let object = self
                .registry
                .object(moved)
                .map_err(InvokeFault::from_error)?;
            return Ok(Value::Object(object));
        }
        Err(call.not_found())
    }
}
