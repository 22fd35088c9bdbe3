//! The serialization pipeline for values crossing a connection.
//!
//! Serialization tries protocol handlers first (per-connection overlay, then
//! process-wide), then the built-in encodings: faults as `{error}`, compounds
//! as `{data}` (the structural-clone path), primitives bare. Deserialization
//! is the mirror. The encode/decode contexts stand in for the `register` and
//! `mintHandle` closures of the protocol-handler contract and carry the
//! side-channel transfer list.

use std::sync::Arc;

use crate::connection::ConnectionInner;
use crate::endpoint::Transferable;
use crate::error::{ProximateError, ProximateResult};
use crate::handle::Handle;
use crate::message::WireValue;
use crate::protocol::protocols;
use crate::registry::registry;
use crate::value::Value;

/// Serialization context handed to protocol handlers.
pub struct EncodeCx {
    transfers: Vec<Transferable>,
}

impl EncodeCx {
    pub(crate) fn new() -> Self {
        Self {
            transfers: Vec::new(),
        }
    }

    /// Register a value in the receiver registry and return the id to embed
    /// in the handler payload.
    pub fn register(&mut self, value: &Value) -> String {
        registry().inc_ref(value)
    }

    /// Append a transferable to the message's side-channel list, returning
    /// the slot index for the handler payload to reference.
    pub fn transfer(&mut self, transferable: Transferable) -> usize {
        self.transfers.push(transferable);
        self.transfers.len() - 1
    }

    pub(crate) fn into_transfers(self) -> Vec<Transferable> {
        self.transfers
    }
}

/// Deserialization context handed to protocol handlers.
pub struct DecodeCx<'a> {
    conn: &'a Arc<ConnectionInner>,
    transfers: &'a mut Vec<Option<Transferable>>,
}

impl<'a> DecodeCx<'a> {
    pub(crate) fn new(
        conn: &'a Arc<ConnectionInner>,
        transfers: &'a mut Vec<Option<Transferable>>,
    ) -> Self {
        Self { conn, transfers }
    }

    /// Mint a tracked handle for an incoming receiver id. Identity of
    /// repeatedly- and cyclically-passed objects is honored at request
    /// routing: the path head always resolves through the registry to the
    /// originally registered value, so a handle minted for an id we exported
    /// ourselves relays straight back to the original object.
    pub fn mint(&mut self, id: &str) -> Value {
        self.conn.track(id);
        Value::Handle(Handle::minted(self.conn.clone(), id.to_string()))
    }

    /// Take a transferred payload by its slot index.
    pub fn take_transfer(&mut self, index: usize) -> Option<Transferable> {
        self.transfers.get_mut(index).and_then(Option::take)
    }
}

/// Encode one value within an existing context (shared transfer list).
pub(crate) fn encode(
    conn: &ConnectionInner,
    value: Value,
    cx: &mut EncodeCx,
) -> ProximateResult<WireValue> {
    let handler = conn
        .protocols
        .find_handler(&value)
        .or_else(|| protocols().find_handler(&value));
    if let Some((key, handler)) = handler {
        let data = handler.serialize(value, cx)?;
        return Ok(WireValue::Custom {
            protocol: key,
            data,
        });
    }
    if let Value::Error(fault) = value {
        return Ok(WireValue::Fault { error: fault });
    }
    let data = value.to_json()?;
    if value.is_primitive() {
        Ok(WireValue::Primitive(data))
    } else {
        Ok(WireValue::Structured { data })
    }
}

/// Serialize one value, returning its wire form and transfer list.
pub(crate) fn serialize(
    conn: &ConnectionInner,
    value: Value,
) -> ProximateResult<(WireValue, Vec<Transferable>)> {
    let mut cx = EncodeCx::new();
    let wire = encode(conn, value, &mut cx)?;
    Ok((wire, cx.into_transfers()))
}

/// Serialize several values under one shared transfer list (call arguments).
pub(crate) fn serialize_all(
    conn: &ConnectionInner,
    values: Vec<Value>,
) -> ProximateResult<(Vec<WireValue>, Vec<Transferable>)> {
    let mut cx = EncodeCx::new();
    let mut wires = Vec::with_capacity(values.len());
    for value in values {
        wires.push(encode(conn, value, &mut cx)?);
    }
    Ok((wires, cx.into_transfers()))
}

/// Decode one wire value within an existing context.
pub(crate) fn decode(cx: &mut DecodeCx<'_>, wire: WireValue) -> ProximateResult<Value> {
    match wire {
        WireValue::Custom { protocol, data } => {
            let handler = cx
                .conn
                .protocols
                .get(&protocol)
                .or_else(|| protocols().get(&protocol))
                .ok_or(ProximateError::UnknownProtocol(protocol))?;
            handler.deserialize(data, cx)
        }
        WireValue::Fault { error } => Ok(Value::Error(error)),
        WireValue::Structured { data } => Ok(Value::from_json(data)),
        WireValue::Primitive(data) => Ok(Value::from_json(data)),
    }
}
