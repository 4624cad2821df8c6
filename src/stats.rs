//! Plain statistics snapshots exposed by every RDT endpoint. These are data,
//! not behavior — any presentation layer (CLI, plotting) lives outside this
//! crate and reads these records.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub acked: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub received: u64,
    pub delivered: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub naks_sent: u64,
    /// Entries currently held in a reorder buffer (SR receiver only; always
    /// zero for protocols without out-of-order buffering).
    pub buffered_packets: u64,
}

/// Statistics for a [`crate::tcp::TcpStream`]. `estimated_rtt`/`dev_rtt`/`rto`
/// reflect the Jacobson/Karels estimator's current values, not a cumulative
/// average.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TcpStats {
    pub segments_sent: u64,
    pub segments_received: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub rtt_samples: u64,
    pub estimated_rtt: Duration,
    pub dev_rtt: Duration,
    pub rto: Duration,
}
