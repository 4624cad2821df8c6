//! RDT 3.0: RDT 2.1 plus a sender retransmission timer, for a channel that
//! may lose packets outright in addition to corrupting and delaying them.
//! Corrupt or mismatched responses are simply ignored (not acted on); only
//! a valid ACK for the outstanding sequence number, or the timer firing,
//! moves the sender forward.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::EndpointIo;
use crate::codec::{Kind, RdtPacket};
use crate::err::Error;
use crate::rdt::{RdtReceiver, RdtSender, IDLE_POLL};
use crate::stats::{ReceiverStats, SenderStats};

/// Default retransmission timeout. Fixed, unlike the adaptive RTO the
/// TCP-like transport computes — RDT 3.0 has no RTT sampling of its own.
pub const DEFAULT_RTO: Duration = Duration::from_millis(300);

pub struct Rdt30Sender {
    io: EndpointIo,
    rto: Duration,
    closed: AtomicBool,
    bit: Mutex<u8>,
    stats: Mutex<SenderStats>,
}

impl Rdt30Sender {
    pub fn new(io: EndpointIo) -> Self {
        Self::with_rto(io, DEFAULT_RTO)
    }

    pub fn with_rto(io: EndpointIo, rto: Duration) -> Self {
        Rdt30Sender {
            io,
            rto,
            closed: AtomicBool::new(false),
            bit: Mutex::new(0),
            stats: Mutex::new(SenderStats::default()),
        }
    }
}

impl RdtSender for Rdt30Sender {
    fn send(&self, data: &[u8]) -> Result<(), Error> {
        let s = *self.bit.lock().unwrap();
        let packet = RdtPacket::new(Kind::Data, s, data.to_vec());
        let mut first = true;

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::NotConnected);
            }

            {
                let mut stats = self.stats.lock().unwrap();
                if first {
                    stats.sent += 1;
                    first = false;
                } else {
                    stats.retransmissions += 1;
                }
            }
            self.io.send(packet.encode());
            tracing::debug!(seq = s, rto_ms = self.rto.as_millis(), "rdt3.0 sender: transmitted DATA");

            let deadline = Instant::now() + self.rto;
            let outcome = loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::NotConnected);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break None;
                }
                if let Some(bytes) = self.io.recv_timeout(remaining.min(IDLE_POLL)) {
                    if let Some(pkt) = RdtPacket::decode(&bytes) {
                        if !pkt.is_corrupt && pkt.kind == Kind::Ack && pkt.seq == s {
                            break Some(());
                        }
                    }
                    // Corrupt frame, stale ACK, or anything else: ignored,
                    // keep waiting out the same timer.
                }
            };

            match outcome {
                Some(()) => {
                    *self.bit.lock().unwrap() = 1 - s;
                    self.stats.lock().unwrap().acked += 1;
                    return Ok(());
                }
                None => {
                    self.stats.lock().unwrap().timeouts += 1;
                    tracing::debug!(seq = s, "rdt3.0 sender: timer expired, retransmitting");
                    continue;
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn stats(&self) -> SenderStats {
        *self.stats.lock().unwrap()
    }
}

struct ReceiverInner {
    expected: u8,
    last_ack_sent: u8,
    delivered: VecDeque<Vec<u8>>,
    stats: ReceiverStats,
}

pub struct Rdt30Receiver {
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Rdt30Receiver {
    pub fn new(io: EndpointIo) -> Self {
        let inner = Arc::new(Mutex::new(ReceiverInner {
            expected: 0,
            last_ack_sent: 1,
            delivered: VecDeque::new(),
            stats: ReceiverStats::default(),
        }));
        let cvar = Arc::new(Condvar::new());
        let closed = Arc::new(AtomicBool::new(false));

        let worker = {
            let inner = inner.clone();
            let cvar = cvar.clone();
            let closed = closed.clone();
            thread::spawn(move || network_role(io, inner, cvar, closed))
        };

        Rdt30Receiver {
            inner,
            cvar,
            closed,
            worker: Mutex::new(Some(worker)),
        }
    }
}

fn network_role(
    io: EndpointIo,
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::Acquire) {
        let Some(bytes) = io.recv_timeout(IDLE_POLL) else {
            continue;
        };
        let Some(pkt) = RdtPacket::decode(&bytes) else {
            continue;
        };

        let mut state = inner.lock().unwrap();
        state.stats.received += 1;

        if pkt.is_corrupt {
            // Unlike RDT 2.x there is no NAK here: the sender has a timer
            // and will retransmit on its own. The receiver simply drops.
            state.stats.corrupted += 1;
            continue;
        }

        if pkt.seq == state.expected {
            state.delivered.push_back(pkt.payload);
            state.stats.delivered += 1;
            let acked = state.expected;
            state.last_ack_sent = acked;
            state.expected = 1 - state.expected;
            drop(state);
            cvar.notify_one();
            io.send(RdtPacket::new(Kind::Ack, acked, vec![]).encode());
        } else {
            state.stats.duplicated += 1;
            let acked = state.last_ack_sent;
            drop(state);
            io.send(RdtPacket::new(Kind::Ack, acked, vec![]).encode());
        }
    }
}

impl RdtReceiver for Rdt30Receiver {
    fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        let state = self.inner.lock().unwrap();
        let (mut state, _) = self
            .cvar
            .wait_timeout_while(state, timeout, |s| s.delivered.is_empty())
            .unwrap();
        state.delivered.pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn stats(&self) -> ReceiverStats {
        self.inner.lock().unwrap().stats
    }
}

impl Drop for Rdt30Receiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Link};

    #[test]
    fn delivers_all_messages_over_lossy_corrupting_delaying_channel() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig {
            loss_rate: 0.1,
            corrupt_rate: 0.1,
            delay_min: Duration::from_millis(5),
            delay_max: Duration::from_millis(20),
        });
        let sender = Rdt30Sender::with_rto(sender_io, Duration::from_millis(100));
        let receiver = Rdt30Receiver::new(receiver_io);

        for i in 0..20 {
            sender.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        for i in 0..20 {
            let payload = receiver.recv(Duration::from_secs(5)).unwrap();
            assert_eq!(payload, format!("msg-{i}").as_bytes());
        }
        assert_eq!(receiver.stats().delivered, 20);
        assert!(sender.stats().timeouts > 0 || sender.stats().retransmissions == 0);
    }

    #[test]
    fn lost_ack_causes_retransmission_and_timeout_count() {
        // ACKs are lost outright; the data direction is reliable, so the
        // sender keeps timing out and retransmitting the same packet.
        let (sender_io, receiver_io) = Link::new(
            ChannelConfig::reliable(),
            ChannelConfig {
                loss_rate: 1.0,
                ..ChannelConfig::reliable()
            },
        );
        let sender = Arc::new(Rdt30Sender::with_rto(sender_io, Duration::from_millis(60)));
        let _receiver = Rdt30Receiver::new(receiver_io);

        let sender_clone = sender.clone();
        let sender_thread = thread::spawn(move || sender_clone.send(b"hello"));

        thread::sleep(Duration::from_millis(400));
        sender.close();
        let _ = sender_thread.join();

        assert!(sender.stats().timeouts > 0);
        assert!(sender.stats().retransmissions > 0);
    }
}
