//! Handles — local surrogates for remote objects.
//!
//! A handle carries a path whose head names a receiver on the peer and whose
//! tail names a chain of member accesses, resolved lazily when the handle is
//! used. Member access ([`Handle::get`]) is free — no message is posted until
//! the handle is fetched, called, assigned through, or released.
//!
//! Release and close are methods rather than member names, so the peer cannot
//! request them with a crafted property string.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{serialize, serialize_all};
use crate::connection::ConnectionInner;
use crate::error::{ProximateError, ProximateResult};
use crate::message::{Message, RefCounts};
use crate::nonce::nonce;
use crate::value::Value;

/// A callable, walkable surrogate for an object on the other side of a
/// connection. Every operation is asynchronous and becomes a protocol
/// message; clones alias the same handle.
#[derive(Clone)]
pub struct Handle {
    conn: Arc<ConnectionInner>,
    path: Arc<Vec<String>>,
    released: Arc<AtomicBool>,
    primary: bool,
}

impl Handle {
    /// The primary handle minted by `wrap`: path `[""]`, addressing the
    /// peer's primary receiver.
    pub(crate) fn primary(conn: Arc<ConnectionInner>) -> Self {
        Self {
            conn,
            path: Arc::new(vec![String::new()]),
            released: Arc::new(AtomicBool::new(false)),
            primary: true,
        }
    }

    /// A tracked handle minted by deserialization: path `[id]`.
    pub(crate) fn minted(conn: Arc<ConnectionInner>, id: String) -> Self {
        Self {
            conn,
            path: Arc::new(vec![id]),
            released: Arc::new(AtomicBool::new(false)),
            primary: false,
        }
    }

    /// The receiver-id head and member tail this handle resolves through.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Whether this handle has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Clone identity, used for registry deduplication and value equality.
    pub(crate) fn identity_addr(&self) -> usize {
        Arc::as_ptr(&self.released) as usize
    }

    fn guard(&self) -> ProximateResult<()> {
        if self.is_released() {
            return Err(ProximateError::Released);
        }
        if self.conn.is_closed() {
            return Err(ProximateError::ConnectionClosed);
        }
        Ok(())
    }

    /// Derive a handle for a member: extends the path, posts nothing. The
    /// derived handle is ephemeral — it holds no remote reference of its own.
    pub fn get(&self, name: impl Into<String>) -> Handle {
        let mut path = (*self.path).clone();
        path.push(name.into());
        Handle {
            conn: self.conn.clone(),
            path: Arc::new(path),
            released: Arc::new(AtomicBool::new(self.is_released())),
            primary: false,
        }
    }

    /// Fetch the value this handle resolves to on the peer.
    pub async fn fetch(&self) -> ProximateResult<Value> {
        self.guard()?;
        self.conn
            .request(Message::get(nonce(), (*self.path).clone()))
            .await
    }

    /// Invoke the value this handle resolves to as a function.
    pub async fn call(&self, args: Vec<Value>) -> ProximateResult<Value> {
        self.guard()?;
        let (wires, transfers) = serialize_all(&self.conn, args)?;
        self.conn
            .request_with(
                Message::call(nonce(), (*self.path).clone(), wires),
                transfers,
            )
            .await
    }

    /// Assign a member on the peer. Fire-and-forget: resolves after the local
    /// post; a peer-side failure comes back against an unregistered nonce and
    /// is logged.
    pub async fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> ProximateResult<()> {
        self.set_path(&[name.into()], value.into()).await
    }

    /// Assign through a chain of members below this handle's path.
    pub(crate) async fn set_path(&self, names: &[String], value: Value) -> ProximateResult<()> {
        self.guard()?;
        let (wire, transfers) = serialize(&self.conn, value)?;
        let mut path = (*self.path).clone();
        path.extend(names.iter().cloned());
        self.conn
            .post(Message::set(nonce(), path, wire), transfers)
            .await
    }

    /// Release this handle: untrack it locally and decrement the peer's
    /// receiver count, resolving when the peer acknowledges. Idempotent
    /// per-handle. Releasing a member-derived handle only poisons it locally
    /// (it holds no remote reference).
    pub async fn release(&self) -> ProximateResult<()> {
        if self.conn.is_closed() {
            return Err(ProximateError::ConnectionClosed);
        }
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.path.len() > 1 {
            return Ok(());
        }
        let id = self.path[0].clone();
        self.conn.untrack(&id);
        let counts = RefCounts::from([(id.clone(), 1)]);
        self.conn
            .request(Message::release(nonce(), vec![id], counts))
            .await?;
        Ok(())
    }

    /// Initiate the closing handshake. Only the wrap-returned primary handle
    /// may close; a second close is a no-op.
    pub async fn close(&self) -> ProximateResult<()> {
        if !self.primary {
            return Err(ProximateError::NotPrimary);
        }
        if self.is_released() {
            return Err(ProximateError::Released);
        }
        self.conn.initiate_close().await
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("path", &self.path)
            .field("released", &self.is_released())
            .field("primary", &self.primary)
            .finish()
    }
}
