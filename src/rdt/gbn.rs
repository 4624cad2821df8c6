//! Go-Back-N: an `N`-packet sliding window with cumulative ACKs and a single
//! timer covering the whole in-flight buffer. A timeout retransmits
//! everything currently outstanding, not just the oldest entry — that's the
//! "go back N" in the name.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::{EndpointIo, EndpointSender};
use crate::codec::{Kind, RdtPacket};
use crate::err::Error;
use crate::rdt::{RdtReceiver, RdtSender, IDLE_POLL};
use crate::stats::{ReceiverStats, SenderStats};

pub const DEFAULT_WINDOW: u64 = 5;
pub const DEFAULT_RTO: Duration = Duration::from_millis(300);

struct InflightEntry {
    counter: u64,
    wire_seq: u8,
    packet: RdtPacket,
}

struct SenderState {
    base: u64,
    next_seq: u64,
    window: u64,
    inflight: VecDeque<InflightEntry>,
    deadline: Option<Instant>,
    stats: SenderStats,
}

pub struct GbnSender {
    sender_io: EndpointSender,
    state: Arc<Mutex<SenderState>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    rto: Duration,
}

impl GbnSender {
    pub fn new(io: EndpointIo, window: u64) -> Self {
        Self::with_params(io, window, DEFAULT_RTO)
    }

    pub fn with_params(io: EndpointIo, window: u64, rto: Duration) -> Self {
        let state = Arc::new(Mutex::new(SenderState {
            base: 0,
            next_seq: 0,
            window,
            inflight: VecDeque::new(),
            deadline: None,
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

        GbnSender {
            sender_io,
            state,
            cvar,
            closed,
            worker: Mutex::new(Some(worker)),
            rto,
        }
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
            match s.deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(IDLE_POLL),
                None => IDLE_POLL,
            }
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
                if let Some(pos) = s
                    .inflight
                    .iter()
                    .position(|entry| entry.wire_seq == pkt.seq)
                {
                    let acked_counter = s.inflight[pos].counter;
                    for _ in 0..=pos {
                        s.inflight.pop_front();
                    }
                    s.base = acked_counter + 1;
                    s.stats.acked += 1;
                    s.deadline = if s.inflight.is_empty() {
                        None
                    } else {
                        Some(Instant::now() + rto)
                    };
                    drop(s);
                    cvar.notify_all();
                }
            }
            None => {
                let mut s = state.lock().unwrap();
                let expired = s.deadline.is_some_and(|d| Instant::now() >= d);
                if !expired {
                    continue;
                }
                s.stats.timeouts += 1;
                s.stats.retransmissions += s.inflight.len() as u64;
                let to_send: Vec<Vec<u8>> = s.inflight.iter().map(|e| e.packet.encode()).collect();
                s.deadline = Some(Instant::now() + rto);
                drop(s);
                tracing::debug!(count = to_send.len(), "gbn sender: timer expired, retransmitting window");
                for bytes in to_send {
                    retransmit_io.send(bytes);
                }
            }
        }
    }
}

impl RdtSender for GbnSender {
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
        let wire_seq = (counter % 256) as u8;
        let packet = RdtPacket::new(Kind::Data, wire_seq, data.to_vec());
        s.next_seq += 1;
        s.stats.sent += 1;
        if s.inflight.is_empty() {
            s.deadline = Some(Instant::now() + self.rto);
        }
        s.inflight.push_back(InflightEntry {
            counter,
            wire_seq,
            packet: packet.clone(),
        });
        drop(s);

        self.sender_io.send(packet.encode());
        tracing::debug!(seq = wire_seq, "gbn sender: transmitted DATA");
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

impl Drop for GbnSender {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReceiverInner {
    expected: u64,
    last_ack_sent: Option<u8>,
    delivered: VecDeque<Vec<u8>>,
    stats: ReceiverStats,
}

pub struct GbnReceiver {
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GbnReceiver {
    pub fn new(io: EndpointIo) -> Self {
        let inner = Arc::new(Mutex::new(ReceiverInner {
            expected: 0,
            last_ack_sent: None,
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

        GbnReceiver {
            inner,
            cvar,
            closed,
            worker: Mutex::new(Some(worker)),
        }
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
            let last_ack = state.last_ack_sent;
            drop(state);
            if let Some(ack) = last_ack {
                io.send(RdtPacket::new(Kind::Ack, ack, vec![]).encode());
            }
            continue;
        }

        let expected_wire = (state.expected % 256) as u8;
        if pkt.seq == expected_wire {
            state.delivered.push_back(pkt.payload);
            state.stats.delivered += 1;
            state.last_ack_sent = Some(expected_wire);
            state.expected += 1;
            drop(state);
            cvar.notify_one();
            io.send(RdtPacket::new(Kind::Ack, expected_wire, vec![]).encode());
        } else {
            state.stats.duplicated += 1;
            let last_ack = state.last_ack_sent;
            drop(state);
            if let Some(ack) = last_ack {
                io.send(RdtPacket::new(Kind::Ack, ack, vec![]).encode());
            }
        }
    }
}

impl RdtReceiver for GbnReceiver {
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

impl Drop for GbnReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
