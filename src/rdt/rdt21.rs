//! RDT 2.1: stop-and-wait with a 1-bit alternating sequence number, so the
//! receiver can tell a retransmission from a fresh packet. Still no timer —
//! same lossless-but-corrupting channel assumption as RDT 2.0.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::EndpointIo;
use crate::codec::{Kind, RdtPacket};
use crate::err::Error;
use crate::rdt::{RdtReceiver, RdtSender, IDLE_POLL};
use crate::stats::{ReceiverStats, SenderStats};

pub struct Rdt21Sender {
    io: EndpointIo,
    closed: AtomicBool,
    bit: Mutex<u8>,
    stats: Mutex<SenderStats>,
}

impl Rdt21Sender {
    pub fn new(io: EndpointIo) -> Self {
        Rdt21Sender {
            io,
            closed: AtomicBool::new(false),
            bit: Mutex::new(0),
            stats: Mutex::new(SenderStats::default()),
        }
    }
}

impl RdtSender for Rdt21Sender {
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
            tracing::debug!(seq = s, "rdt2.1 sender: transmitted DATA");

            let response = loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::NotConnected);
                }
                if let Some(bytes) = self.io.recv_timeout(IDLE_POLL) {
                    break RdtPacket::decode(&bytes);
                }
            };

            let Some(pkt) = response else { continue };
            if pkt.is_corrupt {
                continue;
            }
            match pkt.kind {
                Kind::Ack if pkt.seq == s => {
                    *self.bit.lock().unwrap() = 1 - s;
                    self.stats.lock().unwrap().acked += 1;
                    return Ok(());
                }
                Kind::Nak if pkt.seq == s => continue,
                // Stale ACK/NAK from a previous round, or anything else
                // unexpected: keep waiting on a retransmit.
                _ => continue,
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

pub struct Rdt21Receiver {
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Rdt21Receiver {
    pub fn new(io: EndpointIo) -> Self {
        let inner = Arc::new(Mutex::new(ReceiverInner {
            expected: 0,
            last_ack_sent: 1, // no ACK sent yet; any sentinel distinct from a real seq works here
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

        Rdt21Receiver {
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
            state.stats.corrupted += 1;
            state.stats.naks_sent += 1;
            let nak_seq = state.last_ack_sent;
            drop(state);
            io.send(RdtPacket::new(Kind::Nak, nak_seq, vec![]).encode());
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
            // Duplicate of the previous round: re-ack, do not re-deliver.
            state.stats.duplicated += 1;
            state.stats.naks_sent += 1;
            let nak_seq = state.last_ack_sent;
            drop(state);
            io.send(RdtPacket::new(Kind::Nak, nak_seq, vec![]).encode());
        }
    }
}

impl RdtReceiver for Rdt21Receiver {
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

impl Drop for Rdt21Receiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Link};

    #[test]
    fn corrupt_both_directions_still_delivers_all_in_order() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig {
            corrupt_rate: 0.2,
            ..ChannelConfig::reliable()
        });
        let sender = Rdt21Sender::new(sender_io);
        let receiver = Rdt21Receiver::new(receiver_io);

        for i in 0..15 {
            sender.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..15 {
            seen.push(receiver.recv(Duration::from_secs(5)).unwrap());
        }

        for (i, payload) in seen.iter().enumerate() {
            assert_eq!(payload, format!("msg-{i}").as_bytes());
        }
        assert_eq!(receiver.stats().delivered, 15);
        assert_eq!(receiver.stats().received, sender.stats().sent);
    }

    #[test]
    fn duplicate_data_after_ack_loss_is_not_redelivered() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig::reliable());
        let receiver = Rdt21Receiver::new(receiver_io);

        // Manually replay the same DATA(seq=0) twice, simulating an ACK
        // that never made it back to the sender.
        let pkt = RdtPacket::new(Kind::Data, 0, b"once".to_vec());
        sender_io.send(pkt.encode());
        sender_io.send(pkt.encode());

        assert_eq!(
            receiver.recv(Duration::from_secs(1)).unwrap(),
            b"once".to_vec()
        );
        assert_eq!(receiver.recv(Duration::from_millis(200)), None);
        assert_eq!(receiver.stats().delivered, 1);
        assert_eq!(receiver.stats().duplicated, 1);
    }
}
