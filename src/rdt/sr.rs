//! Selective Repeat: an `N`-packet sliding window like Go-Back-N, but ACKs
//! and timers are per-packet and the receiver buffers out-of-order arrivals
//! instead of discarding them. Requires a sequence space of at least `2N`
//! distinct values (enforced in [`SrSender::with_params`] and
//! [`SrReceiver::new`]) so a retransmitted old packet can never be mistaken
//! for a new one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::{EndpointIo, EndpointSender};
use crate::codec::{Kind, RdtPacket};
use crate::err::Error;
use crate::rdt::{RdtReceiver, RdtSender, IDLE_POLL};
use crate::stats::{ReceiverStats, SenderStats};

pub const DEFAULT_WINDOW: u64 = 8;
pub const DEFAULT_RTO: Duration = Duration::from_millis(300);

/// Wire `seq` is one byte, so the sequence space is 256; a window larger
/// than this would make retransmissions ambiguous.
const SEQ_SPACE: u64 = 256;

struct InflightEntry {
    counter: u64,
    wire_seq: u8,
    packet: RdtPacket,
    acked: bool,
    deadline: Instant,
}

struct SenderState {
    base: u64,
    next_seq: u64,
    window: u64,
    inflight: VecDeque<InflightEntry>,
    stats: SenderStats,
}

pub struct SrSender {
    sender_io: EndpointSender,
    state: Arc<Mutex<SenderState>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    rto: Duration,
}

impl SrSender {
    pub fn new(io: EndpointIo, window: u64) -> Result<Self, Error> {
        Self::with_params(io, window, DEFAULT_RTO)
    }

    /// Returns `Error::InvalidConfig` if `window * 2 > 256`, per the
    /// sequence-space requirement.
    pub fn with_params(io: EndpointIo, window: u64, rto: Duration) -> Result<Self, Error> {
        if window * 2 > SEQ_SPACE {
            return Err(Error::InvalidConfig(
                "selective repeat window needs a sequence space of at least 2 * window",
            ));
        }

        let state = Arc::new(Mutex::new(SenderState {
            base: 0,
            next_seq: 0,
            window,
            inflight: VecDeque::new(),
            stats: SenderStats::default(),
        }));
        let cvar = Arc::new(Condvar::new());
        let closed = Arc::new(AtomicBool::new(false));
        let sender_io = io.sender_handle();

        let worker = {
            let state = state.clone();
            let cvar = cvar.clone();
            let closed = closed.clone();
            let retransmit_io = io.sender_handle();
            thread::spawn(move || network_role(io, retransmit_io, state, cvar, closed, rto))
        };

        Ok(SrSender {
            sender_io,
            state,
            cvar,
            closed,
            worker: Mutex::new(Some(worker)),
            rto,
        })
    }
}

fn network_role(
    io: EndpointIo,
    retransmit_io: EndpointSender,
    state: Arc<Mutex<SenderState>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    rto: Duration,
) {
    while !closed.load(Ordering::Acquire) {
        let poll = {
            let s = state.lock().unwrap();
            s.inflight
                .iter()
                .filter(|e| !e.acked)
                .map(|e| e.deadline.saturating_duration_since(Instant::now()))
                .min()
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL)
        };

        match io.recv_timeout(poll) {
            Some(bytes) => {
                let Some(pkt) = RdtPacket::decode(&bytes) else {
                    continue;
                };
                if pkt.is_corrupt || pkt.kind != Kind::Ack {
                    continue;
                }
                let mut s = state.lock().unwrap();
                if let Some(entry) = s.inflight.iter_mut().find(|e| e.wire_seq == pkt.seq) {
                    if !entry.acked {
                        entry.acked = true;
                        s.stats.acked += 1;
                    }
                }
                while s.inflight.front().is_some_and(|e| e.acked) {
                    s.inflight.pop_front();
                    s.base += 1;
                }
                drop(s);
                cvar.notify_all();
            }
            None => {
                let mut s = state.lock().unwrap();
                let now = Instant::now();
                let mut timed_out = Vec::new();
                for entry in s.inflight.iter_mut() {
                    if !entry.acked && now >= entry.deadline {
                        entry.deadline = now + rto;
                        timed_out.push(entry.packet.clone());
                    }
                }
                if !timed_out.is_empty() {
                    s.stats.timeouts += 1;
                    s.stats.retransmissions += timed_out.len() as u64;
                }
                drop(s);
                for pkt in timed_out {
                    tracing::debug!(seq = pkt.seq, "sr sender: entry timer expired, retransmitting");
                    retransmit_io.send(pkt.encode());
                }
            }
        }
    }
}

impl RdtSender for SrSender {
    fn send(&self, data: &[u8]) -> Result<(), Error> {
        let mut s = self.state.lock().unwrap();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::NotConnected);
            }
            if s.next_seq < s.base + s.window {
                break;
            }
            let (guard, _) = self
                .cvar
                .wait_timeout_while(s, IDLE_POLL, |s| {
                    s.next_seq >= s.base + s.window && !self.closed.load(Ordering::Acquire)
                })
                .unwrap();
            s = guard;
        }

        let counter = s.next_seq;
        let wire_seq = (counter % SEQ_SPACE) as u8;
        let packet = RdtPacket::new(Kind::Data, wire_seq, data.to_vec());
        s.next_seq += 1;
        s.stats.sent += 1;
        s.inflight.push_back(InflightEntry {
            counter,
            wire_seq,
            packet: packet.clone(),
            acked: false,
            deadline: Instant::now() + self.rto,
        });
        drop(s);

        self.sender_io.send(packet.encode());
        tracing::debug!(seq = wire_seq, "sr sender: transmitted DATA");
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn stats(&self) -> SenderStats {
        self.state.lock().unwrap().stats
    }
}

impl Drop for SrSender {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReceiverInner {
    rcv_base: u64,
    window: u64,
    buffer: BTreeMap<u64, Vec<u8>>,
    delivered: VecDeque<Vec<u8>>,
    stats: ReceiverStats,
}

pub struct SrReceiver {
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SrReceiver {
    pub fn new(io: EndpointIo, window: u64) -> Result<Self, Error> {
        if window * 2 > SEQ_SPACE {
            return Err(Error::InvalidConfig(
                "selective repeat window needs a sequence space of at least 2 * window",
            ));
        }

        let inner = Arc::new(Mutex::new(ReceiverInner {
            rcv_base: 0,
            window,
            buffer: BTreeMap::new(),
            delivered: VecDeque::new(),
            stats: ReceiverStats::default(),
        }));
        let cvar = Arc::new(Condvar::new());
        let closed = Arc::new(AtomicBool::new(false));

        let worker = {
            let inner = inner.clone();
            let cvar = cvar.clone();
            let closed = closed.clone();
            thread::spawn(move || network_role_recv(io, inner, cvar, closed))
        };

        Ok(SrReceiver {
            inner,
            cvar,
            closed,
            worker: Mutex::new(Some(worker)),
        })
    }
}

fn network_role_recv(
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
            continue; // corrupt frames are simply discarded, no ACK
        }

        let window = state.window;
        let base_byte = (state.rcv_base % SEQ_SPACE) as u8;
        let diff = pkt.seq.wrapping_sub(base_byte) as u64;

        if diff < window {
            let counter = state.rcv_base + diff;
            let ack_seq = pkt.seq;
            if counter == state.rcv_base {
                state.delivered.push_back(pkt.payload);
                state.stats.delivered += 1;
                state.rcv_base += 1;
                while let Some(payload) = state.buffer.remove(&state.rcv_base) {
                    state.delivered.push_back(payload);
                    state.stats.delivered += 1;
                    state.rcv_base += 1;
                }
            } else {
                state.buffer.entry(counter).or_insert(pkt.payload);
            }
            state.stats.buffered_packets = state.buffer.len() as u64;
            drop(state);
            cvar.notify_one();
            io.send(RdtPacket::new(Kind::Ack, ack_seq, vec![]).encode());
        } else if diff >= SEQ_SPACE - window {
            // Falls in the previous window: already delivered, re-ACK.
            state.stats.duplicated += 1;
            drop(state);
            io.send(RdtPacket::new(Kind::Ack, pkt.seq, vec![]).encode());
        }
        // else: outside both windows entirely, discard.
    }
}

impl RdtReceiver for SrReceiver {
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

impl Drop for SrReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Link};

    #[test]
    fn delivers_fifty_packets_in_order_over_lossy_channel() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig {
            loss_rate: 0.15,
            ..ChannelConfig::reliable()
        });
        let sender = SrSender::with_params(sender_io, 8, Duration::from_millis(150)).unwrap();
        let receiver = SrReceiver::new(receiver_io, 8).unwrap();

        for i in 0..50 {
            sender.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        for i in 0..50 {
            let payload = receiver.recv(Duration::from_secs(10)).unwrap();
            assert_eq!(payload, format!("msg-{i}").as_bytes());
        }
        assert_eq!(receiver.stats().delivered, 50);
    }

    #[test]
    fn window_larger_than_half_sequence_space_is_rejected() {
        let (sender_io, _receiver_io) = Link::symmetric(ChannelConfig::reliable());
        let err = SrSender::with_params(sender_io, 200, DEFAULT_RTO).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn duplicate_seq_is_never_delivered_twice() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig::reliable());
        let receiver = SrReceiver::new(receiver_io, 8).unwrap();

        let pkt = RdtPacket::new(Kind::Data, 0, b"once".to_vec());
        sender_io.send(pkt.encode());
        sender_io.send(pkt.encode());

        assert_eq!(
            receiver.recv(Duration::from_secs(1)).unwrap(),
            b"once".to_vec()
        );
        assert_eq!(receiver.recv(Duration::from_millis(200)), None);
        assert_eq!(receiver.stats().delivered, 1);
    }

    #[test]
    fn out_of_order_arrival_is_buffered_until_gap_closes() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig::reliable());
        let receiver = SrReceiver::new(receiver_io, 8).unwrap();

        // seq 1 arrives before seq 0.
        sender_io.send(RdtPacket::new(Kind::Data, 1, b"second".to_vec()).encode());
        std::thread::sleep(Duration::from_millis(50));
        assert!(receiver.stats().buffered_packets >= 1);

        sender_io.send(RdtPacket::new(Kind::Data, 0, b"first".to_vec()).encode());

        assert_eq!(
            receiver.recv(Duration::from_secs(1)).unwrap(),
            b"first".to_vec()
        );
        assert_eq!(
            receiver.recv(Duration::from_secs(1)).unwrap(),
            b"second".to_vec()
        );
        assert_eq!(receiver.stats().buffered_packets, 0);
    }
}
