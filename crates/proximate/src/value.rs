//! The dynamic value tree crossing the remote-object boundary.
//!
//! A [`Value`] is either plain data (primitives, lists, maps — copied
//! structurally across the wire), a live [`Object`] (identity-bearing, with
//! named slots and an optional native call implementation), a remote
//! [`Handle`], a detachable [`ByteBuf`], or a captured [`Fault`].
//!
//! Member access and assignment walk this tree on the receiving side of a
//! connection. Live objects alias through `Arc`; plain compounds are values.

use crate::error::{ProximateError, ProximateResult};
use crate::handle::Handle;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

/// Native call implementation of a callable [`Object`].
pub type NativeFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ProximateResult<Value>> + Send + Sync>;

/// A value in the remote-object graph.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent / undefined.
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Integer primitive.
    Int(i64),
    /// Floating-point primitive.
    Float(f64),
    /// String primitive.
    Str(String),
    /// A shared, detachable byte buffer.
    Bytes(ByteBuf),
    /// An ordered list, copied structurally.
    List(Vec<Value>),
    /// A string-keyed record, copied structurally.
    Map(BTreeMap<String, Value>),
    /// A captured error value.
    Error(Fault),
    /// A live local object.
    Object(Object),
    /// A surrogate for an object on the other side of a connection.
    Handle(Handle),
}

impl Value {
    /// Short kind name, used in shape-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Error(_) => "error",
            Value::Object(_) => "object",
            Value::Handle(_) => "handle",
        }
    }

    /// Pointer identity for identity-bearing values, used by the receiver
    /// registry to offer the same value under a stable id.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(o) => Some(o.addr()),
            Value::Handle(h) => Some(h.identity_addr()),
            Value::Bytes(b) => Some(b.addr()),
            _ => None,
        }
    }

    /// Read a member: object slot, map key, or list index.
    ///
    /// Missing members read as [`Value::Null`]. Member access on a handle
    /// extends its path without any message. Anything else has no members.
    pub fn member(&self, name: &str) -> ProximateResult<Value> {
        match self {
            Value::Object(o) => Ok(o.slot(name).unwrap_or(Value::Null)),
            Value::Map(m) => Ok(m.get(name).cloned().unwrap_or(Value::Null)),
            Value::List(items) => {
                let idx: usize = name.parse().map_err(|_| ProximateError::NotWalkable {
                    member: name.to_string(),
                    kind: "list",
                })?;
                Ok(items.get(idx).cloned().unwrap_or(Value::Null))
            }
            Value::Handle(h) => Ok(Value::Handle(h.get(name))),
            other => Err(ProximateError::NotWalkable {
                member: name.to_string(),
                kind: other.kind(),
            }),
        }
    }

    /// Invoke this value as a function: local call for objects, remote call
    /// for handles.
    pub async fn invoke(&self, args: Vec<Value>) -> ProximateResult<Value> {
        match self {
            Value::Object(o) => o.invoke(args).await,
            Value::Handle(h) => h.call(args).await,
            other => Err(ProximateError::NotCallable(other.kind().to_string())),
        }
    }

    /// Integer accessor.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric accessor, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Handle accessor.
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Object accessor.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Convert to plain JSON. Fails with [`ProximateError::NotCloneable`] if
    /// the tree contains live objects, handles, buffers, or faults — those
    /// only cross the wire through a protocol handler.
    pub fn to_json(&self) -> ProximateResult<JsonValue> {
        match self {
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Int(n) => Ok(JsonValue::from(*n)),
            Value::Float(f) => Ok(JsonValue::from(*f)),
            Value::Str(s) => Ok(JsonValue::String(s.clone())),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json()?);
                }
                Ok(JsonValue::Array(out))
            }
            Value::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(JsonValue::Object(out))
            }
            Value::Bytes(_) | Value::Error(_) | Value::Object(_) | Value::Handle(_) => {
                Err(ProximateError::NotCloneable)
            }
        }
    }

    /// Rebuild a value from plain JSON.
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::Str(s),
            JsonValue::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            JsonValue::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// True for null, booleans, numbers, and strings — the values that pass
    /// the wire bare rather than wrapped as a compound.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a.bytes() == b.bytes(),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.addr() == b.addr(),
            (Value::Handle(a), Value::Handle(b)) => a.identity_addr() == b.identity_addr(),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Handle(v)
    }
}

impl From<ByteBuf> for Value {
    fn from(v: ByteBuf) -> Self {
        Value::Bytes(v)
    }
}

impl From<Fault> for Value {
    fn from(v: Fault) -> Self {
        Value::Error(v)
    }
}

/// A live local object: named slots behind a lock, plus an optional native
/// call implementation. Clones alias the same object.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    slots: RwLock<HashMap<String, Value>>,
    call: Option<NativeFn>,
}

impl Object {
    /// Create an empty, non-callable object.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                slots: RwLock::new(HashMap::new()),
                call: None,
            }),
        }
    }

    /// Create a callable object from an async closure.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProximateResult<Value>> + Send + 'static,
    {
        Self {
            inner: Arc::new(ObjectInner {
                slots: RwLock::new(HashMap::new()),
                call: Some(Arc::new(move |args| Box::pin(f(args)))),
            }),
        }
    }

    /// Builder-style slot insertion.
    pub fn with_slot(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_slot(name, value);
        self
    }

    /// Read a slot.
    pub fn slot(&self, name: &str) -> Option<Value> {
        let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(name).cloned()
    }

    /// Write a slot.
    pub fn set_slot(&self, name: impl Into<String>, value: impl Into<Value>) {
        let mut slots = self.inner.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(name.into(), value.into());
    }

    /// Whether this object carries a call implementation.
    pub fn is_callable(&self) -> bool {
        self.inner.call.is_some()
    }

    /// Invoke the native call implementation.
    pub async fn invoke(&self, args: Vec<Value>) -> ProximateResult<Value> {
        let call = self
            .inner
            .call
            .clone()
            .ok_or_else(|| ProximateError::NotCallable("object".to_string()))?;
        call(args).await
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Object")
            .field("slots", &slots.keys().collect::<Vec<_>>())
            .field("callable", &self.is_callable())
            .finish()
    }
}

/// A shared byte buffer that can be detached (moved out, leaving the local
/// buffer empty) for zero-copy transfer across an endpoint.
#[derive(Clone)]
pub struct ByteBuf {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl ByteBuf {
    /// Wrap a byte vector.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Current length; zero after a detach.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the buffer is empty (including detached).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the contents out.
    pub fn bytes(&self) -> Vec<u8> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Move the contents out, leaving this buffer (and every alias) empty.
    pub fn detach(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf").field("len", &self.len()).finish()
    }
}

/// The error shape carried across the wire: message and optional stack.
/// Error identity does not survive a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// The error message.
    pub message: String,
    /// The captured stack trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Fault {
    /// Build a fault from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl From<&ProximateError> for Fault {
    fn from(err: &ProximateError) -> Self {
        let stack = match err {
            ProximateError::Remote { stack, .. } => stack.clone(),
            _ => None,
        };
        Self {
            message: err.to_string(),
            stack,
        }
    }
}

impl From<Fault> for ProximateError {
    fn from(fault: Fault) -> Self {
        ProximateError::Remote {
            message: fault.message,
            stack: fault.stack,
        }
    }
}

/// Walk `names` from `root` by member access.
pub(crate) fn walk(root: &Value, names: &[String]) -> ProximateResult<Value> {
    let mut current = root.clone();
    for name in names {
        current = current.member(name)?;
    }
    Ok(current)
}

/// Outcome of an assignment descent: finished locally, or must be forwarded
/// through a handle found on the path.
#[derive(Debug)]
pub(crate) enum Assign {
    Done,
    Forward(Handle, Vec<String>, Value),
}

/// Assign `value` at `path` below `root`, mutating live objects and nested
/// compounds in place. Object hops release the previous lock before taking
/// the next, so self-referential object graphs cannot deadlock.
pub(crate) fn assign(root: &Object, path: &[String], value: Value) -> ProximateResult<Assign> {
    let mut target = root.clone();
    let mut path = path.to_vec();
    let mut value = value;
    loop {
        let step = {
            let mut slots = target.inner.slots.write().unwrap_or_else(|e| e.into_inner());
            if path.len() == 1 {
                slots.insert(path[0].clone(), value);
                return Ok(Assign::Done);
            }
            let head = path[0].clone();
            let slot = slots.get_mut(&head).ok_or(ProximateError::NotWalkable {
                member: head,
                kind: "null",
            })?;
            assign_in(slot, &path[1..], value)?
        };
        match step {
            Step::Done => return Ok(Assign::Done),
            Step::Into(next, rest, v) => {
                target = next;
                path = rest;
                value = v;
            }
            Step::Forward(handle, rest, v) => return Ok(Assign::Forward(handle, rest, v)),
        }
    }
}

enum Step {
    Done,
    Into(Object, Vec<String>, Value),
    Forward(Handle, Vec<String>, Value),
}

fn assign_in(slot: &mut Value, path: &[String], value: Value) -> ProximateResult<Step> {
    match slot {
        Value::Object(o) => Ok(Step::Into(o.clone(), path.to_vec(), value)),
        Value::Handle(h) => Ok(Step::Forward(h.clone(), path.to_vec(), value)),
        Value::Map(map) => {
            if path.len() == 1 {
                map.insert(path[0].clone(), value);
                return Ok(Step::Done);
            }
            let next = map.get_mut(&path[0]).ok_or(ProximateError::NotWalkable {
                member: path[0].clone(),
                kind: "null",
            })?;
            assign_in(next, &path[1..], value)
        }
        Value::List(items) => {
            let idx: usize = path[0].parse().map_err(|_| ProximateError::NotAssignable {
                member: path[0].clone(),
                kind: "list",
            })?;
            if path.len() == 1 {
                if idx < items.len() {
                    items[idx] = value;
                } else if idx == items.len() {
                    items.push(value);
                } else {
                    return Err(ProximateError::NotAssignable {
                        member: path[0].clone(),
                        kind: "list",
                    });
                }
                return Ok(Step::Done);
            }
            let next = items.get_mut(idx).ok_or(ProximateError::NotWalkable {
                member: path[0].clone(),
                kind: "null",
            })?;
            assign_in(next, &path[1..], value)
        }
        other => Err(ProximateError::NotAssignable {
            member: path[0].clone(),
            kind: other.kind(),
        }),
    }
}
