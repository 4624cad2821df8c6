//! The five reliable-data-transfer protocol variants, from stop-and-wait
//! through sliding-window selective repeat. Each variant exposes a sender
//! and receiver implementing the shared [`RdtSender`]/[`RdtReceiver`]
//! capability, so a test harness can drive any of them identically.

use std::time::Duration;

use crate::err::Error;
use crate::stats::{ReceiverStats, SenderStats};

pub mod gbn;
pub mod rdt20;
pub mod rdt21;
pub mod rdt30;
pub mod sr;

/// The application-facing half of a stop-and-wait or sliding-window sender.
pub trait RdtSender {
    /// Send one application message. Blocks while the protocol's window
    /// (one message for stop-and-wait, `N` for sliding-window variants) is
    /// full, and while awaiting the response the protocol requires before
    /// a send can be considered complete.
    fn send(&self, data: &[u8]) -> Result<(), Error>;

    fn close(&self);

    fn stats(&self) -> SenderStats;
}

/// The application-facing half of a stop-and-wait or sliding-window
/// receiver.
pub trait RdtReceiver {
    /// Return the next in-order delivered payload, or `None` if `timeout`
    /// elapses with nothing delivered.
    fn recv(&self, timeout: Duration) -> Option<Vec<u8>>;

    fn close(&self);

    fn stats(&self) -> ReceiverStats;
}

/// Poll interval the receiver-side network-role loops use while idle (no
/// timer pending). Short enough that `close()` is noticed promptly, long
/// enough to not busy-loop.
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(50);
