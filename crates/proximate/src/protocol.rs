//! Protocol handlers — pluggable codecs for value kinds that cannot be
//! structurally cloned.
//!
//! A handler is keyed by a string and must be installed under the same key at
//! both peers. Each connection carries an overlay table consulted before the
//! process-wide table, so a handler can be scoped to a single connection.

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};

use crate::codec::{DecodeCx, EncodeCx};
use crate::error::{ProximateError, ProximateResult};
use crate::value::Value;

/// Reserved key of the default error protocol.
pub const ERROR_KEY: &str = "error";

/// A pluggable codec for one kind of value.
pub trait Protocol: Send + Sync {
    /// Whether this handler claims the value.
    fn can_handle(&self, value: &Value) -> bool;

    /// Encode the value into a handler payload, registering receivers and
    /// appending transferables through the context as needed.
    fn serialize(&self, value: Value, cx: &mut EncodeCx) -> ProximateResult<JsonValue>;

    /// Rebuild a value from a handler payload, minting handles and taking
    /// transferables through the context as needed.
    fn deserialize(&self, data: JsonValue, cx: &mut DecodeCx<'_>) -> ProximateResult<Value>;
}

/// A keyed table of protocol handlers.
#[derive(Default)]
pub struct ProtocolTable {
    handlers: DashMap<String, Arc<dyn Protocol>>,
}

impl ProtocolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler under a key, replacing any previous one.
    pub fn install(&self, key: impl Into<String>, handler: Arc<dyn Protocol>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Remove a handler.
    pub fn uninstall(&self, key: &str) -> Option<Arc<dyn Protocol>> {
        self.handlers.remove(key).map(|(_, handler)| handler)
    }

    /// Look up a handler by key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Protocol>> {
        self.handlers.get(key).map(|entry| entry.value().clone())
    }

    /// Find the first handler whose `can_handle` accepts the value.
    pub fn find_handler(&self, value: &Value) -> Option<(String, Arc<dyn Protocol>)> {
        self.handlers.iter().find_map(|entry| {
            entry
                .value()
                .can_handle(value)
                .then(|| (entry.key().clone(), entry.value().clone()))
        })
    }
}

static PROTOCOLS: OnceLock<ProtocolTable> = OnceLock::new();

/// The process-wide protocol table. Ships with the error protocol installed
/// under [`ERROR_KEY`]; removing it falls back to the structural `{error}`
/// wire encoding.
pub fn protocols() -> &'static ProtocolTable {
    PROTOCOLS.get_or_init(|| {
        let table = ProtocolTable::new();
        table.install(ERROR_KEY, Arc::new(ErrorByValue));
        table
    })
}

/// The convenience pass-by-handle base: serialization registers the value in
/// the receiver registry and transmits its id; deserialization resolves an
/// own id to the registered value, or mints a tracked handle otherwise.
pub struct ByHandle {
    accepts: Box<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl ByHandle {
    /// Build a pass-by-handle protocol over a predicate.
    pub fn new(accepts: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            accepts: Box::new(accepts),
        }
    }

    /// A pass-by-handle protocol claiming callables: callable objects and
    /// handles.
    pub fn callables() -> Self {
        Self::new(|value| match value {
            Value::Object(o) => o.is_callable(),
            Value::Handle(_) => true,
            _ => false,
        })
    }
}

impl Protocol for ByHandle {
    fn can_handle(&self, value: &Value) -> bool {
        (self.accepts)(value)
    }

    fn serialize(&self, value: Value, cx: &mut EncodeCx) -> ProximateResult<JsonValue> {
        Ok(JsonValue::String(cx.register(&value)))
    }

    fn deserialize(&self, data: JsonValue, cx: &mut DecodeCx<'_>) -> ProximateResult<Value> {
        let id = data.as_str().ok_or_else(|| {
            ProximateError::MalformedPayload("pass-by-handle payload must be an id string".into())
        })?;
        Ok(cx.mint(id))
    }
}

/// The default error protocol, carrying message and stack.
struct ErrorByValue;

impl Protocol for ErrorByValue {
    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Error(_))
    }

    fn serialize(&self, value: Value, _cx: &mut EncodeCx) -> ProximateResult<JsonValue> {
        let Value::Error(fault) = value else {
            return Err(ProximateError::MalformedPayload(
                "error protocol over a non-error value".into(),
            ));
        };
        Ok(serde_json::to_value(fault)?)
    }

    fn deserialize(&self, data: JsonValue, _cx: &mut DecodeCx<'_>) -> ProximateResult<Value> {
        let fault = serde_json::from_value(data)?;
        Ok(Value::Error(fault))
    }
}
