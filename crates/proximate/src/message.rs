//! Wire protocol message types.
//!
//! Every message crossing an endpoint is a single [`Message`] envelope.
//! Unlike a tagged protocol, messages are discriminated by the presence of
//! structural keys: a message with a `path` is a request, a message with only
//! the correlation `id` is a response, and the request operation is chosen by
//! which payload key is present (`args`, `value`, `release`, `close`, or none
//! for a get).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::value::Fault;

/// Reference counts keyed by receiver id, as carried by `release` and `close`.
pub type RefCounts = HashMap<String, u64>;

/// A wire message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Correlation nonce shared by a request and its response.
    pub id: String,
    /// Receiver-id head plus member names; present on requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    /// Call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<WireValue>>,
    /// Property write value. A bare JSON null is a legal written value, so
    /// presence of the key (not non-nullness) decides the classification.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire_if_present"
    )]
    pub value: Option<WireValue>,
    /// Decrement peer receiver refcounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<RefCounts>,
    /// Closing handshake; the peer replies with its residual counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<RefCounts>,
    /// Success payload.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire_if_present"
    )]
    pub result: Option<WireValue>,
    /// Failure payload.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire_if_present"
    )]
    pub error: Option<WireValue>,
}

/// Only invoked when the key is present, so a null payload deserializes as a
/// present null primitive rather than collapsing into key absence.
fn wire_if_present<'de, D>(deserializer: D) -> Result<Option<WireValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    WireValue::deserialize(deserializer).map(Some)
}

impl Message {
    fn empty(id: String) -> Self {
        Self {
            id,
            path: None,
            args: None,
            value: None,
            release: None,
            close: None,
            result: None,
            error: None,
        }
    }

    /// A get request: path only.
    pub fn get(id: String, path: Vec<String>) -> Self {
        Self {
            path: Some(path),
            ..Self::empty(id)
        }
    }

    /// A call request.
    pub fn call(id: String, path: Vec<String>, args: Vec<WireValue>) -> Self {
        Self {
            path: Some(path),
            args: Some(args),
            ..Self::empty(id)
        }
    }

    /// A property write request.
    pub fn set(id: String, path: Vec<String>, value: WireValue) -> Self {
        Self {
            path: Some(path),
            value: Some(value),
            ..Self::empty(id)
        }
    }

    /// A refcount release request.
    pub fn release(id: String, path: Vec<String>, counts: RefCounts) -> Self {
        Self {
            path: Some(path),
            release: Some(counts),
            ..Self::empty(id)
        }
    }

    /// A closing-handshake request.
    pub fn close(id: String, counts: RefCounts) -> Self {
        Self {
            path: Some(vec![String::new()]),
            close: Some(counts),
            ..Self::empty(id)
        }
    }

    /// A success response.
    pub fn result(id: String, result: WireValue) -> Self {
        Self {
            result: Some(result),
            ..Self::empty(id)
        }
    }

    /// A failure response.
    pub fn failure(id: String, error: WireValue) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(id)
        }
    }

    /// A message with a path is a request; anything else settles a pending
    /// request as a response.
    pub fn is_request(&self) -> bool {
        self.path.is_some()
    }

    /// Classify a request by payload-key presence. Precedence follows the
    /// protocol: args, value, release, close, then get.
    pub fn op(&self) -> RequestOp {
        if let Some(args) = &self.args {
            RequestOp::Call(args.clone())
        } else if let Some(value) = &self.value {
            RequestOp::Set(value.clone())
        } else if let Some(counts) = &self.release {
            RequestOp::Release(counts.clone())
        } else if let Some(counts) = &self.close {
            RequestOp::Close(counts.clone())
        } else {
            RequestOp::Get
        }
    }
}

/// The operation a request message encodes.
#[derive(Debug, Clone)]
pub enum RequestOp {
    /// Invoke the resolved value as a function.
    Call(Vec<WireValue>),
    /// Assign to the final path member.
    Set(WireValue),
    /// Decrement receiver refcounts.
    Release(RefCounts),
    /// Closing handshake.
    Close(RefCounts),
    /// Read the resolved value.
    Get,
}

/// Wire encoding of a single value. One of: a custom protocol payload
/// (`{type, data}`), a captured fault (`{error}`), a structurally cloned
/// compound (`{data}`), or a bare primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    /// Encoded by the protocol handler registered under `type`.
    Custom {
        /// Protocol key; must be registered at both peers.
        #[serde(rename = "type")]
        protocol: String,
        /// Handler payload.
        data: JsonValue,
    },
    /// A captured error.
    Fault {
        /// Message and optional stack.
        error: Fault,
    },
    /// A structurally cloned compound.
    Structured {
        /// The compound as plain JSON.
        data: JsonValue,
    },
    /// A bare primitive (null, boolean, number, or string).
    Primitive(JsonValue),
}
