//! The transport contract.
//!
//! An [`Endpoint`] is any bidirectional message carrier: one side of an
//! in-memory channel pair, a worker port, a framed socket adapter. The core
//! only needs listener registration (here: handing over the incoming packet
//! stream), posting with an optional transfer list, and optional start/close
//! hooks. Parsing and framing, where a real transport needs them, live inside
//! the endpoint implementation — the core always sees typed [`Packet`]s.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProximateResult;
use crate::message::Message;

/// A message plus its side-channel list of transferred payloads.
#[derive(Debug)]
pub struct Packet {
    /// The wire envelope.
    pub message: Message,
    /// Transferred payloads, referenced by index from protocol payloads.
    pub transfers: Vec<Transferable>,
}

impl Packet {
    /// A packet with no transfers.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            transfers: Vec::new(),
        }
    }

    /// A packet carrying transferred payloads.
    pub fn with_transfers(message: Message, transfers: Vec<Transferable>) -> Self {
        Self { message, transfers }
    }
}

/// An opaque payload moved (not copied) across the endpoint.
#[derive(Debug)]
pub enum Transferable {
    /// The contents of a detached byte buffer.
    Buffer(Vec<u8>),
}

/// Minimum transport surface required by a connection.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Hand over the incoming packet stream. Called exactly once, by `wrap`;
    /// dropping the returned receiver unregisters the listener.
    fn listen(&self) -> mpsc::UnboundedReceiver<Packet>;

    /// Post a packet to the peer.
    async fn post(&self, packet: Packet) -> ProximateResult<()>;

    /// Flush any queue buffered before the listener attached. Optional.
    fn start(&self) {}

    /// Release transport resources. Optional.
    fn close(&self) {}
}
