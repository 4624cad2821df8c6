//! A simplified, TCP-like byte-stream transport: three-way handshake,
//! cumulative ACK over a reassembly window, Jacobson/Karels adaptive RTO,
//! advertised-window flow control, and a graceful close with a scaled-down
//! TIME_WAIT dwell.
//!
/*
                    RFC 9293 - S3.3.2 - Fig 5 (subset implemented here)

                            +---------+
                            |  CLOSED |
                            +---------+
                              |     ^
                 passive OPEN |     |   CLOSE
                              V     |
          rcv FIN          +---------+            active OPEN, snd SYN
       ------------------->|  LISTEN |----------------------------\
      /                     +---------+                            \
     /           rcv SYN      |                                     V
+--------+      snd SYN,ACK  /                                 +--------+
|  SYN   |<-----------------                                    |  SYN   |
|  RCVD  |                                     rcv SYN,ACK      |  SENT  |
|        |-------------------- snd ACK -------------------------|        |
+--------+                                                      +--------+
     |                          rcv ACK of SYN                       |
     \------------------------------V------------------------------/
                                +-----------+
                                |ESTABLISHED|
                                +-----------+
                   CLOSE       /           \       rcv FIN
                  snd FIN     V             V      snd ACK
              +----------+          +-----------+
              |FIN_WAIT_1|          |CLOSE_WAIT |
              +----------+          +-----------+
                   | rcv ACK              | CLOSE, snd FIN
                   V of FIN               V
              +----------+          +-----------+
              |FIN_WAIT_2|          | LAST_ACK  |
              +----------+          +-----------+
                   | rcv FIN              | rcv ACK of FIN
                   V snd ACK              V
              +----------+          +---------+
              |TIME_WAIT |--------->| CLOSED  |
              +----------+  timeout +---------+
*/

mod listener;
mod stream;

pub use listener::TcpListener;
pub use stream::TcpStream;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::{EndpointIo, EndpointSender};
use crate::codec::{tcp_flags, TcpSegment, MSS};
use crate::err::Error;
use crate::stats::TcpStats;

/// Scaled-down "maximum segment lifetime": real TCP dwells in TIME_WAIT for
/// 2*MSL (minutes); this simulation dwells for 2*MSL of milliseconds.
const TIME_WAIT_DWELL: Duration = Duration::from_millis(400);

const INITIAL_RTO: Duration = Duration::from_millis(500);
const MIN_RTO: Duration = Duration::from_millis(50);
const MAX_RTO: Duration = Duration::from_secs(4);

/// `send_window` before any advertisement has been received from the peer:
/// one MSS, a conservative default (see the design notes' open question).
const INITIAL_SEND_WINDOW: u16 = MSS as u16;

/// Fixed placeholder "congestion window" — no real congestion control.
const FIXED_CWND: u16 = 8 * MSS as u16;

const RECV_QUEUE_CAP: usize = 64 * 1024;

pub(crate) const IDLE_POLL: Duration = Duration::from_millis(20);

fn bound_ports() -> &'static Mutex<HashSet<u16>> {
    static PORTS: OnceLock<Mutex<HashSet<u16>>> = OnceLock::new();
    PORTS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Reserve `port` for the lifetime of a connection. Released by
/// [`release_port`] once the owning [`stream::TcpStream`] is torn down.
pub(crate) fn reserve_port(port: u16) -> Result<(), Error> {
    let mut ports = bound_ports().lock().unwrap();
    if !ports.insert(port) {
        return Err(Error::PortInUse(port));
    }
    Ok(())
}

pub(crate) fn release_port(port: u16) {
    bound_ports().lock().unwrap().remove(&port);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    TimeWait,
}

struct SendEntry {
    seq: u32,
    bytes: Vec<u8>,
    is_fin: bool,
    timestamp: Instant,
    retried: bool,
}

impl SendEntry {
    fn len(&self) -> u32 {
        if self.is_fin {
            1
        } else {
            self.bytes.len() as u32
        }
    }
}

pub(crate) struct TcbInner {
    state: TcpState,
    local_port: u16,
    remote_port: u16,

    snd_next: u32,
    send_buffer: VecDeque<SendEntry>,

    rcv_next: u32,
    recv_reorder: BTreeMap<u32, Vec<u8>>,
    app_recv_queue: VecDeque<u8>,
    peer_eof: bool,

    send_window: u16,

    estimated_rtt: Option<Duration>,
    dev_rtt: Duration,
    rto: Duration,

    timer_deadline: Option<Instant>,
    time_wait_deadline: Option<Instant>,

    /// Set once a RST has been received or generated for this connection.
    /// Distinct from the app-initiated `Shared::closed`: a reset connection
    /// reports [`crate::err::Error::ConnectionReset`] from in-flight I/O
    /// instead of the plain "not connected" a graceful close produces.
    reset: bool,

    stats: TcpStats,
}

impl TcbInner {
    fn unacked_bytes(&self) -> u32 {
        self.send_buffer.iter().map(SendEntry::len).sum()
    }

    fn advertise_window(&self) -> u16 {
        RECV_QUEUE_CAP
            .saturating_sub(self.app_recv_queue.len())
            .min(u16::MAX as usize) as u16
    }

    fn in_flight_ceiling(&self) -> u32 {
        self.send_window.min(FIXED_CWND) as u32
    }
}

pub(crate) struct Shared {
    inner: Mutex<TcbInner>,
    cvar: Condvar,
    closed: AtomicBool,
    sender: EndpointSender,
}

impl Shared {
    fn send_segment(&self, inner: &TcbInner, seq: u32, flags: u8, payload: Vec<u8>) {
        let seg = TcpSegment {
            src_port: inner.local_port,
            dst_port: inner.remote_port,
            seq,
            ack: inner.rcv_next,
            flags,
            window: inner.advertise_window(),
            payload,
            is_corrupt: false,
        };
        self.sender.send(seg.encode());
    }

    fn deliver_reassembled(inner: &mut TcbInner) -> bool {
        let mut delivered_any = false;
        while let Some(bytes) = inner.recv_reorder.remove(&inner.rcv_next) {
            let advance = bytes.len() as u32;
            inner.app_recv_queue.extend(bytes);
            inner.rcv_next = inner.rcv_next.wrapping_add(advance);
            delivered_any = true;
        }
        delivered_any
    }
}

fn fresh_inner(local_port: u16, remote_port: u16, state: TcpState, iss: u32) -> TcbInner {
    TcbInner {
        state,
        local_port,
        remote_port,
        snd_next: iss,
        send_buffer: VecDeque::new(),
        rcv_next: 0,
        recv_reorder: BTreeMap::new(),
        app_recv_queue: VecDeque::new(),
        peer_eof: false,
        send_window: INITIAL_SEND_WINDOW,
        estimated_rtt: None,
        dev_rtt: Duration::ZERO,
        rto: INITIAL_RTO,
        timer_deadline: None,
        time_wait_deadline: None,
        reset: false,
        stats: TcpStats { rto: INITIAL_RTO, ..TcpStats::default() },
    }
}

/// Spawn the network-role thread: owns `io` for receiving, reacts to
/// inbound segments and timer expiry, and drives every state transition.
pub(crate) fn spawn_worker(io: EndpointIo, shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            if shared.closed.load(Ordering::Acquire) {
                return;
            }

            let poll = {
                let inner = shared.inner.lock().unwrap();
                next_deadline(&inner)
                    .map(|d| d.saturating_duration_since(Instant::now()).min(IDLE_POLL))
                    .unwrap_or(IDLE_POLL)
            };

            match io.recv_timeout(poll) {
                Some(bytes) => {
                    let Some(seg) = TcpSegment::decode(&bytes) else {
                        continue;
                    };
                    let mut inner = shared.inner.lock().unwrap();
                    inner.stats.segments_received += 1;
                    if seg.is_corrupt {
                        continue;
                    }
                    if inner.state == TcpState::Closed {
                        handle_closed_quad(&shared, &inner, &seg);
                        continue;
                    }
                    on_segment(&shared, inner, &seg);
                }
                None => on_timer(&shared),
            }
        }
    })
}

fn next_deadline(inner: &TcbInner) -> Option<Instant> {
    match (inner.timer_deadline, inner.time_wait_deadline) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn sample_rtt(inner: &mut TcbInner, sample: Duration) {
    inner.stats.rtt_samples += 1;
    match inner.estimated_rtt {
        None => {
            inner.estimated_rtt = Some(sample);
            inner.dev_rtt = sample / 2;
        }
        Some(estimated) => {
            let diff = sample.abs_diff(estimated);
            inner.dev_rtt = inner.dev_rtt.mul_f64(0.75) + diff.mul_f64(0.25);
            inner.estimated_rtt = Some(estimated.mul_f64(0.875) + sample.mul_f64(0.125));
        }
    }
    let estimated = inner.estimated_rtt.unwrap();
    inner.rto = (estimated + inner.dev_rtt * 4).clamp(MIN_RTO, MAX_RTO);
    inner.stats.estimated_rtt = estimated;
    inner.stats.dev_rtt = inner.dev_rtt;
    inner.stats.rto = inner.rto;
}

fn on_segment(shared: &Arc<Shared>, mut inner: std::sync::MutexGuard<TcbInner>, seg: &TcpSegment) {
    if seg.has_flag(tcp_flags::RST) {
        inner.state = TcpState::Closed;
        inner.reset = true;
        inner.timer_deadline = None;
        inner.time_wait_deadline = None;
        tracing::debug!("tcp: connection reset by peer");
        drop(inner);
        shared.cvar.notify_all();
        return;
    }

    if seg.has_flag(tcp_flags::SYN) && !seg.has_flag(tcp_flags::ACK) {
        handle_syn(shared, &mut inner, seg);
        return;
    }

    if inner.state == TcpState::SynSent
        && seg.has_flag(tcp_flags::SYN)
        && seg.has_flag(tcp_flags::ACK)
        && seg.ack == inner.snd_next
    {
        inner.rcv_next = seg.seq.wrapping_add(1);
        inner.state = TcpState::Established;
        inner.timer_deadline = None;
        shared.send_segment(&inner, inner.snd_next, tcp_flags::ACK, vec![]);
        drop(inner);
        shared.cvar.notify_all();
        return;
    }

    if inner.state == TcpState::SynReceived
        && seg.has_flag(tcp_flags::ACK)
        && seg.ack == inner.snd_next
    {
        inner.state = TcpState::Established;
        inner.timer_deadline = None;
        drop(inner);
        shared.cvar.notify_all();
        return;
    }

    if seg.has_flag(tcp_flags::ACK) {
        inner.send_window = seg.window;
        handle_ack(&mut inner, seg.ack);
    }

    if !seg.payload.is_empty() {
        handle_payload(&mut inner, seg.seq, &seg.payload);
        Shared::deliver_reassembled(&mut inner);
        shared.send_segment(&inner, inner.snd_next, tcp_flags::ACK, vec![]);
    }

    if seg.has_flag(tcp_flags::FIN) {
        let fin_seq = seg.seq.wrapping_add(seg.payload.len() as u32);
        if fin_seq == inner.rcv_next {
            inner.rcv_next = inner.rcv_next.wrapping_add(1);
            shared.send_segment(&inner, inner.snd_next, tcp_flags::ACK, vec![]);
            match inner.state {
                TcpState::Established => {
                    inner.state = TcpState::CloseWait;
                    inner.peer_eof = true;
                }
                TcpState::FinWait1 | TcpState::FinWait2 => {
                    inner.state = TcpState::TimeWait;
                    inner.time_wait_deadline = Some(Instant::now() + TIME_WAIT_DWELL);
                    inner.peer_eof = true;
                }
                _ => {}
            }
        }
    }

    drop(inner);
    shared.cvar.notify_all();
}

/// A segment arrived for a connection whose TCB has already reached
/// CLOSED. Per RFC 9293 S3.10.7.1, anything but a RST gets answered with
/// one (never RST a RST, to avoid an infinite reply loop).
fn handle_closed_quad(shared: &Arc<Shared>, inner: &TcbInner, seg: &TcpSegment) {
    if seg.has_flag(tcp_flags::RST) {
        return;
    }
    let seq = seg.ack;
    tracing::debug!(src = seg.src_port, "tcp: replying RST to closed quad");
    shared.send_segment(inner, seq, tcp_flags::RST, vec![]);
}

fn handle_syn(shared: &Arc<Shared>, inner: &mut TcbInner, seg: &TcpSegment) {
    if inner.state != TcpState::Listen {
        return;
    }
    inner.remote_port = seg.src_port;
    inner.rcv_next = seg.seq.wrapping_add(1);
    inner.state = TcpState::SynReceived;
    inner.timer_deadline = Some(Instant::now() + inner.rto);
    shared.send_segment(inner, inner.snd_next, tcp_flags::SYN | tcp_flags::ACK, vec![]);
    inner.snd_next = inner.snd_next.wrapping_add(1);
}

fn handle_ack(inner: &mut TcbInner, ack: u32) {
    let mut newly_acked_fin = false;
    while let Some(entry) = inner.send_buffer.front() {
        if wrapping_le(entry.seq.wrapping_add(entry.len()), ack) {
            let entry = inner.send_buffer.pop_front().unwrap();
            if !entry.retried {
                sample_rtt(inner, entry.timestamp.elapsed());
            }
            if entry.is_fin {
                newly_acked_fin = true;
            }
        } else {
            break;
        }
    }
    inner.timer_deadline = if inner.send_buffer.is_empty() {
        None
    } else {
        Some(Instant::now() + inner.rto)
    };

    if newly_acked_fin {
        match inner.state {
            TcpState::FinWait1 => inner.state = TcpState::FinWait2,
            TcpState::LastAck => inner.state = TcpState::Closed,
            _ => {}
        }
    }
}

fn handle_payload(inner: &mut TcbInner, seq: u32, payload: &[u8]) {
    if seq == inner.rcv_next || wrapping_lt(inner.rcv_next, seq) {
        inner.recv_reorder.entry(seq).or_insert_with(|| payload.to_vec());
    }
    // seq < rcv_next: an already-delivered retransmission; still ACKed above.
}

fn on_timer(shared: &Arc<Shared>) {
    let mut inner = shared.inner.lock().unwrap();
    let now = Instant::now();

    if inner.state == TcpState::TimeWait {
        if inner.time_wait_deadline.is_some_and(|d| now >= d) {
            inner.state = TcpState::Closed;
            drop(inner);
            shared.cvar.notify_all();
        }
        return;
    }

    let Some(deadline) = inner.timer_deadline else { return };
    if now < deadline {
        return;
    }

    match inner.state {
        TcpState::SynSent => {
            inner.rto = (inner.rto * 2).min(MAX_RTO);
            inner.timer_deadline = Some(now + inner.rto);
            let seq = inner.snd_next.wrapping_sub(1);
            shared.send_segment(&inner, seq, tcp_flags::SYN, vec![]);
        }
        TcpState::SynReceived => {
            inner.rto = (inner.rto * 2).min(MAX_RTO);
            inner.timer_deadline = Some(now + inner.rto);
            let seq = inner.snd_next.wrapping_sub(1);
            shared.send_segment(&inner, seq, tcp_flags::SYN | tcp_flags::ACK, vec![]);
        }
        _ => {
            inner.stats.timeouts += 1;
            let retransmit: Vec<(u32, u8, Vec<u8>)> = inner
                .send_buffer
                .iter_mut()
                .map(|entry| {
                    entry.retried = true;
                    entry.timestamp = now;
                    let flags = if entry.is_fin {
                        tcp_flags::ACK | tcp_flags::FIN
                    } else {
                        tcp_flags::ACK
                    };
                    (entry.seq, flags, entry.bytes.clone())
                })
                .collect();
            inner.stats.retransmissions += retransmit.len() as u64;
            inner.timer_deadline = Some(now + inner.rto);
            for (seq, flags, payload) in &retransmit {
                shared.send_segment(&inner, *seq, *flags, payload.clone());
            }
            tracing::debug!(count = retransmit.len(), "tcp: retransmit timer expired");
        }
    }
}

fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    (lhs.wrapping_sub(rhs) as i32) < 0
}

fn wrapping_le(lhs: u32, rhs: u32) -> bool {
    lhs == rhs || wrapping_lt(lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Link};

    fn spawn_shared(io: EndpointIo, state: TcpState) -> Arc<Shared> {
        let inner = fresh_inner(100, 200, state, 0);
        let shared = Arc::new(Shared {
            sender: io.sender_handle(),
            inner: Mutex::new(inner),
            cvar: Condvar::new(),
            closed: AtomicBool::new(false),
        });
        spawn_worker(io, shared.clone());
        shared
    }

    fn teardown(shared: &Arc<Shared>) {
        shared.closed.store(true, Ordering::Release);
        shared.cvar.notify_all();
    }

    #[test]
    fn closed_quad_replies_with_reset() {
        let (local_io, peer_io) = Link::symmetric(ChannelConfig::reliable());
        let shared = spawn_shared(local_io, TcpState::Closed);

        let probe = TcpSegment {
            src_port: 200,
            dst_port: 100,
            seq: 0,
            ack: 0,
            flags: tcp_flags::ACK,
            window: 1024,
            payload: vec![],
            is_corrupt: false,
        };
        peer_io.send(probe.encode());

        let reply = peer_io
            .recv_timeout(Duration::from_secs(1))
            .expect("closed quad should reply");
        let seg = TcpSegment::decode(&reply).unwrap();
        assert!(seg.has_flag(tcp_flags::RST));

        teardown(&shared);
    }

    #[test]
    fn closed_quad_does_not_reset_a_reset() {
        let (local_io, peer_io) = Link::symmetric(ChannelConfig::reliable());
        let shared = spawn_shared(local_io, TcpState::Closed);

        let probe = TcpSegment {
            src_port: 200,
            dst_port: 100,
            seq: 0,
            ack: 0,
            flags: tcp_flags::RST,
            window: 1024,
            payload: vec![],
            is_corrupt: false,
        };
        peer_io.send(probe.encode());

        assert_eq!(peer_io.recv_timeout(Duration::from_millis(200)), None);

        teardown(&shared);
    }

    #[test]
    fn reset_segment_marks_connection_reset_and_closes() {
        let (local_io, peer_io) = Link::symmetric(ChannelConfig::reliable());
        let shared = spawn_shared(local_io, TcpState::Established);

        let rst = TcpSegment {
            src_port: 200,
            dst_port: 100,
            seq: 0,
            ack: 0,
            flags: tcp_flags::RST,
            window: 1024,
            payload: vec![],
            is_corrupt: false,
        };
        peer_io.send(rst.encode());

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut inner = shared.inner.lock().unwrap();
        while inner.state != TcpState::Closed && Instant::now() < deadline {
            let (guard, _) = shared
                .cvar
                .wait_timeout(inner, Duration::from_millis(20))
                .unwrap();
            inner = guard;
        }
        assert_eq!(inner.state, TcpState::Closed);
        assert!(inner.reset);
        drop(inner);

        teardown(&shared);
    }
}
