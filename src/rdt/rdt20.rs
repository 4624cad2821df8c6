//! RDT 2.0: stop-and-wait over a channel that may corrupt but never loses
//! or reorders. No sequence numbers, no timer — a corrupt or negative
//! response simply causes a retransmit of the one outstanding packet.

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

pub struct Rdt20Sender {
    io: EndpointIo,
    closed: AtomicBool,
    stats: Mutex<SenderStats>,
}

impl Rdt20Sender {
    pub fn new(io: EndpointIo) -> Self {
        Rdt20Sender {
            io,
            closed: AtomicBool::new(false),
            stats: Mutex::new(SenderStats::default()),
        }
    }
}

impl RdtSender for Rdt20Sender {
    fn send(&self, data: &[u8]) -> Result<(), Error> {
        let packet = RdtPacket::new(Kind::Data, 0, data.to_vec());
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
            tracing::debug!(seq = packet.seq, "rdt2.0 sender: transmitted DATA");

            // The channel is assumed lossless for this variant, so there is
            // no timer: we simply keep polling (in short slices, so close()
            // is noticed) until a response arrives.
            let response = loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::NotConnected);
                }
                if let Some(bytes) = self.io.recv_timeout(IDLE_POLL) {
                    break RdtPacket::decode(&bytes);
                }
            };

            match response {
                Some(pkt) if !pkt.is_corrupt && pkt.kind == Kind::Ack => {
                    self.stats.lock().unwrap().acked += 1;
                    return Ok(());
                }
                // Corrupt response, an explicit NAK, or an unparseable
                // frame: all call for retransmitting the same packet.
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
    delivered: VecDeque<Vec<u8>>,
    stats: ReceiverStats,
}

pub struct Rdt20Receiver {
    inner: Arc<Mutex<ReceiverInner>>,
    cvar: Arc<Condvar>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Rdt20Receiver {
    pub fn new(io: EndpointIo) -> Self {
        let inner = Arc::new(Mutex::new(ReceiverInner {
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

        Rdt20Receiver {
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
            continue; // malformed frame: ignore
        };

        let mut state = inner.lock().unwrap();
        state.stats.received += 1;

        if pkt.is_corrupt {
            state.stats.corrupted += 1;
            state.stats.naks_sent += 1;
            drop(state);
            tracing::debug!("rdt2.0 receiver: corrupt DATA, sending NAK");
            io.send(RdtPacket::new(Kind::Nak, 0, vec![]).encode());
            continue;
        }

        state.delivered.push_back(pkt.payload);
        state.stats.delivered += 1;
        drop(state);
        cvar.notify_one();
        io.send(RdtPacket::new(Kind::Ack, 0, vec![]).encode());
    }
}

impl RdtReceiver for Rdt20Receiver {
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

impl Drop for Rdt20Receiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Link};

    #[test]
    fn delivers_ten_messages_in_order_over_reliable_channel() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig::reliable());
        let sender = Rdt20Sender::new(sender_io);
        let receiver = Rdt20Receiver::new(receiver_io);

        for i in 0..10 {
            sender.send(format!("Mensagem {i}").as_bytes()).unwrap();
        }

        for i in 0..10 {
            let payload = receiver.recv(Duration::from_secs(2)).unwrap();
            assert_eq!(payload, format!("Mensagem {i}").as_bytes());
        }

        assert_eq!(sender.stats().retransmissions, 0);
        assert_eq!(receiver.stats().delivered, 10);
    }

    #[test]
    fn corruption_triggers_retransmission_but_exactly_once_delivery() {
        let (sender_io, receiver_io) = Link::symmetric(ChannelConfig {
            corrupt_rate: 0.3,
            ..ChannelConfig::reliable()
        });
        let sender = Rdt20Sender::new(sender_io);
        let receiver = Rdt20Receiver::new(receiver_io);

        for i in 0..15 {
            sender.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        for i in 0..15 {
            let payload = receiver.recv(Duration::from_secs(5)).unwrap();
            assert_eq!(payload, format!("msg-{i}").as_bytes());
        }
        assert_eq!(receiver.stats().delivered, 15);
    }
}
