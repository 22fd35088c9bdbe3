//! Proximate — a transparent remote-object layer over asynchronous duplex
//! message channels.
//!
//! Code on one side of a channel holds a [`Handle`] to an object on the other
//! side and operates on it — reading members, calling it, assigning values,
//! passing objects back and forth — with every operation asynchronous.
//!
//! ## Architecture
//!
//! - **[`wrap`]**: binds an [`Endpoint`] (any bidirectional message carrier),
//!   optionally exposing a local receiver, and returns the primary handle.
//! - **[`Handle`]**: a callable, walkable surrogate whose operations become
//!   protocol messages.
//! - **[`ReceiverRegistry`]**: the process-wide, reference-counted map of
//!   objects exposed to peers, shared by every connection.
//! - **[`Protocol`]** handlers: pluggable codecs for values that cannot be
//!   structurally cloned, including the pass-by-handle base [`ByHandle`].
//! - The closing handshake exchanges outstanding refcount maps so both
//!   registries drain on shutdown.
//!
//! ```ignore
//! use proximate::{wrap, Object, Value, WrapOptions};
//!
//! let (left, right) = proximate_channel::pair();
//! let _server = wrap(
//!     left,
//!     WrapOptions::new().receiver(Object::function(|mut args| async move {
//!         Ok(args.remove(0))
//!     })),
//! );
//! let proxy = wrap(right, WrapOptions::new());
//! assert_eq!(proxy.call(vec![Value::Int(42)]).await?, Value::Int(42));
//! proxy.close().await?;
//! ```

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod message;
pub mod nonce;
pub mod protocol;
pub mod registry;
pub mod value;

mod pending;

pub use codec::{DecodeCx, EncodeCx};
pub use connection::{wrap, DebugSink, Direction, WrapOptions};
pub use endpoint::{Endpoint, Packet, Transferable};
pub use error::{ProximateError, ProximateResult};
pub use handle::Handle;
pub use message::{Message, RefCounts, RequestOp, WireValue};
pub use nonce::{nonce, nonce_with_len};
pub use protocol::{protocols, ByHandle, Protocol, ProtocolTable, ERROR_KEY};
pub use registry::{registry, ReceiverRegistry};
pub use value::{ByteBuf, Fault, NativeFn, Object, Value};
