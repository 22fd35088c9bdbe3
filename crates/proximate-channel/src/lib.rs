//! In-memory duplex endpoint pair for proximate.
//!
//! [`pair`] returns two cross-wired endpoints with in-order delivery over
//! unbounded channels — the message-port analogue used by the test suite and
//! by same-process demos. Transferables move by value without passing through
//! any encoder. Packets posted before the peer wraps sit in the channel and
//! are delivered once the peer starts listening.

use proximate::{Endpoint, Packet, ProximateError, ProximateResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// One side of an in-memory duplex channel.
pub struct ChannelEndpoint {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    closed: AtomicBool,
}

/// Create a connected endpoint pair.
pub fn pair() -> (ChannelEndpoint, ChannelEndpoint) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();
    (
        ChannelEndpoint {
            tx: tx_ab,
            rx: Mutex::new(Some(rx_ba)),
            closed: AtomicBool::new(false),
        },
        ChannelEndpoint {
            tx: tx_ba,
            rx: Mutex::new(Some(rx_ab)),
            closed: AtomicBool::new(false),
        },
    )
}

#[async_trait::async_trait]
impl Endpoint for ChannelEndpoint {
    fn listen(&self) -> mpsc::UnboundedReceiver<Packet> {
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("channel endpoint listener already taken")
    }

    async fn post(&self, packet: Packet) -> ProximateResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProximateError::ConnectionClosed);
        }
        self.tx
            .send(packet)
            .map_err(|_| ProximateError::ConnectionClosed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("channel endpoint closed");
    }
}
