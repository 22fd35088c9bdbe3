//! Connection state and the message dispatcher.
//!
//! [`wrap`] binds an endpoint, registers the optional primary receiver, and
//! spawns the dispatch loop. Each incoming packet is classified by key
//! presence: requests are executed in their own task (so handlers that
//! suspend do not block one another), responses settle the pending table.
//!
//! The closing handshake is a two-message exchange of outstanding refcount
//! maps, so both registries drain even for handles nobody bothered to
//! release.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::codec::{decode, serialize, DecodeCx, EncodeCx};
use crate::endpoint::{Endpoint, Packet, Transferable};
use crate::error::{ProximateError, ProximateResult};
use crate::handle::Handle;
use crate::message::{Message, RefCounts, RequestOp, WireValue};
use crate::nonce::nonce;
use crate::pending::PendingTable;
use crate::protocol::{Protocol, ProtocolTable};
use crate::registry::registry;
use crate::value::{assign, walk, Assign, Fault, Value};

/// Which way a message crossed the endpoint, for the debug sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer.
    Inbound,
    /// Posted to the peer.
    Outbound,
}

/// Sink receiving every raw message crossing the connection.
pub type DebugSink = Arc<dyn Fn(Direction, &Message) + Send + Sync>;

/// Options for [`wrap`].
#[derive(Default)]
pub struct WrapOptions {
    receiver: Option<Value>,
    debug: Option<DebugSink>,
    protocols: Vec<(String, Arc<dyn Protocol>)>,
}

impl WrapOptions {
    /// Empty options: no receiver, no debug sink, no overlay protocols.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a local receiver as this connection's primary — the object the
    /// peer's primary handle addresses under the empty-string id.
    pub fn receiver(mut self, receiver: impl Into<Value>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    /// Install a debug sink receiving every raw inbound and outbound message.
    pub fn debug(mut self, sink: impl Fn(Direction, &Message) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(sink));
        self
    }

    /// Install a protocol handler on this connection only. The overlay is
    /// consulted before the process-wide table.
    pub fn protocol(mut self, key: impl Into<String>, handler: Arc<dyn Protocol>) -> Self {
        self.protocols.push((key.into(), handler));
        self
    }
}

/// Per-connection state shared by the dispatcher and every handle.
pub(crate) struct ConnectionInner {
    endpoint: Box<dyn Endpoint>,
    /// Registry id of the receiver bound at wrap time, if any.
    primary_id: Option<String>,
    /// Per-connection protocol overlay, consulted before the global table.
    pub(crate) protocols: ProtocolTable,
    pending: PendingTable,
    /// id → count of live local handles referring to it.
    handles: Mutex<HashMap<String, u64>>,
    closed: AtomicBool,
    debug_sink: Option<DebugSink>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// Bind an endpoint and return the primary handle for the peer's receiver.
pub fn wrap(endpoint: impl Endpoint, options: WrapOptions) -> Handle {
    let rx = endpoint.listen();
    endpoint.start();
    let primary_id = options.receiver.as_ref().map(|r| registry().inc_ref(r));
    let protocols = ProtocolTable::new();
    for (key, handler) in options.protocols {
        protocols.install(key, handler);
    }
    let inner = Arc::new(ConnectionInner {
        endpoint: Box::new(endpoint),
        primary_id,
        protocols,
        pending: PendingTable::new(),
        handles: Mutex::new(HashMap::new()),
        closed: AtomicBool::new(false),
        debug_sink: options.debug,
        dispatch: Mutex::new(None),
    });
    let task = tokio::spawn(dispatch_loop(inner.clone(), rx));
    *inner
        .dispatch
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(task);
    // The primary handle is tracked like any minted handle, under the
    // on-the-wire placeholder id.
    inner.track("");
    info!(
        has_receiver = inner.primary_id.is_some(),
        "remote-object connection established"
    );
    Handle::primary(inner)
}

impl ConnectionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn track(&self, id: &str) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        *handles.entry(id.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn untrack(&self, id: &str) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = handles.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                handles.remove(id);
            }
        }
    }

    fn handles_snapshot(&self) -> RefCounts {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.clone()
    }

    /// Decrement the registry as instructed by a release or close payload,
    /// mapping the empty-string placeholder to this connection's primary.
    fn apply_refcounts(&self, counts: RefCounts) {
        for (id, n) in counts {
            let id = if id.is_empty() {
                match &self.primary_id {
                    Some(primary) => primary.clone(),
                    None => {
                        debug!("refcount for primary on a connection with no receiver");
                        continue;
                    }
                }
            } else {
                id
            };
            registry().dec_ref(&id, n);
        }
    }

    /// Post a packet to the peer.
    pub(crate) async fn post(
        &self,
        message: Message,
        transfers: Vec<Transferable>,
    ) -> ProximateResult<()> {
        if self.is_closed() {
            return Err(ProximateError::ConnectionClosed);
        }
        if let Some(sink) = &self.debug_sink {
            sink(Direction::Outbound, &message);
        }
        self.endpoint
            .post(Packet::with_transfers(message, transfers))
            .await
    }

    /// Post a request and await its correlated response.
    pub(crate) async fn request(&self, message: Message) -> ProximateResult<Value> {
        self.request_with(message, Vec::new()).await
    }

    pub(crate) async fn request_with(
        &self,
        message: Message,
        transfers: Vec<Transferable>,
    ) -> ProximateResult<Value> {
        if self.is_closed() {
            return Err(ProximateError::ConnectionClosed);
        }
        let id = message.id.clone();
        let rx = self.pending.insert(id.clone());
        if let Err(err) = self.post(message, transfers).await {
            self.pending.remove(&id);
            return Err(err);
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProximateError::ConnectionClosed),
        }
    }

    /// Initiate the closing handshake, then tear down locally.
    pub(crate) async fn initiate_close(self: &Arc<Self>) -> ProximateResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let snapshot = self.handles_snapshot();
        match self.request(Message::close(nonce(), snapshot)).await {
            Ok(residual) => self.apply_refcounts(counts_from_value(&residual)),
            // The peer closed concurrently; local teardown is all that's left.
            Err(ProximateError::ConnectionClosed) => {}
            Err(err) => {
                self.shutdown();
                return Err(err);
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Tear down: reject pendings, drop handle tracking, stop the dispatch
    /// loop, release the endpoint. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.reject_all();
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(task) = self
            .dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.endpoint.close();
        info!("remote-object connection closed");
    }
}

async fn dispatch_loop(conn: Arc<ConnectionInner>, mut rx: mpsc::UnboundedReceiver<Packet>) {
    while let Some(packet) = rx.recv().await {
        if conn.is_closed() {
            break;
        }
        if let Some(sink) = &conn.debug_sink {
            sink(Direction::Inbound, &packet.message);
        }
        if packet.message.is_request() {
            // Calls may suspend in user code, so they run as their own task
            // and interleave freely. Everything else (get, set, release,
            // close) runs inline, preserving delivery order — this is what
            // makes a write observable by the read posted right after it.
            if packet.message.args.is_some() {
                tokio::spawn(handle_request(conn.clone(), packet));
            } else {
                handle_request(conn.clone(), packet).await;
            }
        } else {
            settle_response(&conn, packet);
        }
    }
    debug!("dispatch loop ended");
}

fn settle_response(conn: &Arc<ConnectionInner>, packet: Packet) {
    let Packet { message, transfers } = packet;
    let Message {
        id, result, error, ..
    } = message;
    let mut incoming: Vec<Option<Transferable>> = transfers.into_iter().map(Some).collect();
    let mut cx = DecodeCx::new(conn, &mut incoming);
    let outcome = if let Some(error) = error {
        Err(match decode(&mut cx, error) {
            Ok(Value::Error(fault)) => fault.into(),
            Ok(other) => ProximateError::raised(format!("remote failure: {other:?}")),
            Err(err) => err,
        })
    } else if let Some(result) = result {
        decode(&mut cx, result)
    } else {
        Ok(Value::Null)
    };
    conn.pending.settle(&id, outcome);
}

async fn handle_request(conn: Arc<ConnectionInner>, packet: Packet) {
    let id = packet.message.id.clone();
    let closing = packet.message.close.is_some();
    let (reply, transfers, succeeded) = match execute_request(&conn, packet).await {
        Ok((wire, transfers)) => (Message::result(id, wire), transfers, true),
        Err(err) => {
            debug!(%err, "request failed");
            (Message::failure(id, encode_fault(&conn, &err)), Vec::new(), false)
        }
    };
    if let Err(err) = conn.post(reply, transfers).await {
        debug!(%err, "failed to post response");
    }
    // The close responder tears down only after its reply is on the wire.
    if closing && succeeded {
        conn.shutdown();
    }
}

async fn execute_request(
    conn: &Arc<ConnectionInner>,
    packet: Packet,
) -> ProximateResult<(WireValue, Vec<Transferable>)> {
    let Packet { message, transfers } = packet;
    let path = message.path.clone().unwrap_or_default();
    if path.is_empty() {
        return Err(ProximateError::UnknownReceiver(String::new()));
    }
    let receiver_id = if path[0].is_empty() {
        conn.primary_id
            .clone()
            .ok_or_else(|| ProximateError::UnknownReceiver(String::new()))?
    } else {
        path[0].clone()
    };
    let root = registry()
        .lookup(&receiver_id)
        .ok_or_else(|| ProximateError::UnknownReceiver(receiver_id.clone()))?;
    let members: Vec<String> = path[1..].to_vec();
    let mut incoming: Vec<Option<Transferable>> = transfers.into_iter().map(Some).collect();

    let result = match message.op() {
        RequestOp::Call(wires) => {
            let args = {
                let mut cx = DecodeCx::new(conn, &mut incoming);
                let mut args = Vec::with_capacity(wires.len());
                for wire in wires {
                    args.push(decode(&mut cx, wire)?);
                }
                args
            };
            let target = walk(&root, &members)?;
            target.invoke(args).await?
        }
        RequestOp::Set(wire) => {
            let value = {
                let mut cx = DecodeCx::new(conn, &mut incoming);
                decode(&mut cx, wire)?
            };
            apply_set(&root, &members, value)?;
            Value::Null
        }
        RequestOp::Release(counts) => {
            conn.apply_refcounts(counts);
            Value::Null
        }
        RequestOp::Close(counts) => {
            conn.apply_refcounts(counts);
            counts_to_value(conn.handles_snapshot())
        }
        RequestOp::Get => walk(&root, &members)?,
    };
    serialize(conn, result)
}

/// Apply a remote assignment below a resolved receiver. An assignment that
/// reaches a handle on its path is relayed through that handle's own
/// connection as a background fire-and-forget, matching the write path's
/// unacknowledged semantics (a deadlock otherwise: the relay's response
/// arrives on the very dispatch loop executing this assignment).
fn apply_set(root: &Value, members: &[String], value: Value) -> ProximateResult<()> {
    if members.is_empty() {
        return Err(ProximateError::NotAssignable {
            member: String::new(),
            kind: root.kind(),
        });
    }
    match root {
        Value::Object(obj) => match assign(obj, members, value)? {
            Assign::Done => Ok(()),
            Assign::Forward(handle, rest, value) => {
                forward_set(handle, rest, value);
                Ok(())
            }
        },
        Value::Handle(handle) => {
            forward_set(handle.clone(), members.to_vec(), value);
            Ok(())
        }
        other => Err(ProximateError::NotAssignable {
            member: members[0].clone(),
            kind: other.kind(),
        }),
    }
}

fn forward_set(handle: Handle, names: Vec<String>, value: Value) {
    tokio::spawn(async move {
        if let Err(err) = handle.set_path(&names, value).await {
            debug!(%err, "forwarded assignment failed");
        }
    });
}

fn encode_fault(conn: &ConnectionInner, err: &ProximateError) -> WireValue {
    let fault = Fault::from(err);
    let mut cx = EncodeCx::new();
    match crate::codec::encode(conn, Value::Error(fault.clone()), &mut cx) {
        Ok(wire) => wire,
        Err(_) => WireValue::Fault { error: fault },
    }
}

fn counts_to_value(counts: RefCounts) -> Value {
    Value::Map(
        counts
            .into_iter()
            .map(|(id, n)| (id, Value::Int(n as i64)))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn counts_from_value(value: &Value) -> RefCounts {
    match value {
        Value::Map(map) => map
            .iter()
            .filter_map(|(id, n)| n.as_int().map(|n| (id.clone(), n.max(0) as u64)))
            .collect(),
        other => {
            debug!(kind = other.kind(), "malformed residual refcount payload");
            RefCounts::new()
        }
    }
}

