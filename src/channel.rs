//! The fault-injection channel every protocol in this crate is validated
//! against. A [`Link`] is a pair of directional [`UnreliableChannel`]s
//! connecting two in-process endpoints; each direction drops, corrupts, and
//! delays independently, and delivery explicitly does not preserve
//! per-pair ordering (see `send` below).

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;

/// Loss/corruption/delay knobs for one direction of a [`Link`].
///
/// The default is the "reliable channel" from the design: every rate zero,
/// zero delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
        }
    }
}

impl ChannelConfig {
    pub fn reliable() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub lost: u64,
    pub corrupted: u64,
    pub cumulative_delay: Duration,
}

/// One direction of a link: takes ownership of outgoing bytes, applies loss
/// and corruption in-line, then hands surviving bytes to a background
/// thread that sleeps for the configured delay before delivering them.
///
/// Because each send schedules its own delay independently, a burst of
/// sends does not arrive in send order when delays differ — this is the
/// reordering the design calls out explicitly.
#[derive(Debug, Clone)]
pub struct UnreliableChannel {
    config: ChannelConfig,
    stats: Arc<Mutex<ChannelStats>>,
}

impl UnreliableChannel {
    pub fn new(config: ChannelConfig) -> Self {
        UnreliableChannel {
            config,
            stats: Arc::new(Mutex::new(ChannelStats::default())),
        }
    }

    pub fn stats(&self) -> ChannelStats {
        *self.stats.lock().unwrap()
    }

    /// Send `bytes` toward `sink`. Dropped and delivered datagrams are both
    /// counted; corruption flips 1-5 random bytes via XOR 0xFF before the
    /// (possibly still corrupted) bytes are scheduled for delivery.
    fn send(&self, mut bytes: Vec<u8>, sink: Sender<Vec<u8>>) {
        let mut rng = rand::thread_rng();

        let mut stats = self.stats.lock().unwrap();
        stats.sent += 1;

        if rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            stats.lost += 1;
            return;
        }

        if rng.gen_bool(self.config.corrupt_rate.clamp(0.0, 1.0)) && !bytes.is_empty() {
            let flips = rng.gen_range(1..=5.min(bytes.len()));
            for _ in 0..flips {
                let idx = rng.gen_range(0..bytes.len());
                bytes[idx] ^= 0xFF;
            }
            stats.corrupted += 1;
        }

        let delay = if self.config.delay_max > self.config.delay_min {
            rng.gen_range(self.config.delay_min..=self.config.delay_max)
        } else {
            self.config.delay_min
        };
        stats.cumulative_delay += delay;
        drop(stats);

        if delay.is_zero() {
            let _ = sink.send(bytes);
        } else {
            thread::spawn(move || {
                thread::sleep(delay);
                let _ = sink.send(bytes);
            });
        }
    }
}

/// One endpoint's view of a [`Link`]: outgoing datagrams pass through this
/// direction's [`UnreliableChannel`] on the way to the peer's inbox;
/// incoming datagrams are read off this endpoint's own inbox.
#[derive(Debug)]
pub struct EndpointIo {
    channel: UnreliableChannel,
    outbox: Sender<Vec<u8>>,
    inbox: Receiver<Vec<u8>>,
}

impl EndpointIo {
    pub fn send(&self, bytes: Vec<u8>) {
        self.channel.send(bytes, self.outbox.clone());
    }

    /// Block for up to `timeout` for the next inbound datagram. Returns
    /// `None` on timeout; this is the primitive the network-role loops in
    /// `rdt` and `tcp` poll against, with `timeout` set to the next timer
    /// deadline (see §9 of the design).
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(bytes) => Some(bytes),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// A cheap, cloneable send-only handle onto this endpoint. Windowed
    /// protocols hand one of these to the application role (for transmitting
    /// newly windowed packets) while the network-role thread retains the
    /// full `EndpointIo` for receiving.
    pub fn sender_handle(&self) -> EndpointSender {
        EndpointSender {
            channel: self.channel.clone(),
            outbox: self.outbox.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSender {
    channel: UnreliableChannel,
    outbox: Sender<Vec<u8>>,
}

impl EndpointSender {
    pub fn send(&self, bytes: Vec<u8>) {
        self.channel.send(bytes, self.outbox.clone());
    }
}

/// A pair of connected endpoints, one [`UnreliableChannel`] per direction.
pub struct Link;

impl Link {
    /// Build a link with independently configured directions.
    pub fn new(a_to_b: ChannelConfig, b_to_a: ChannelConfig) -> (EndpointIo, EndpointIo) {
        let (tx_to_b, rx_for_b) = mpsc::channel();
        let (tx_to_a, rx_for_a) = mpsc::channel();

        let a = EndpointIo {
            channel: UnreliableChannel::new(a_to_b),
            outbox: tx_to_b,
            inbox: rx_for_a,
        };
        let b = EndpointIo {
            channel: UnreliableChannel::new(b_to_a),
            outbox: tx_to_a,
            inbox: rx_for_b,
        };

        (a, b)
    }

    /// Build a link whose two directions share one configuration.
    pub fn symmetric(config: ChannelConfig) -> (EndpointIo, EndpointIo) {
        Self::new(config, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_link_delivers_everything_in_order_of_no_delay() {
        let (a, b) = Link::symmetric(ChannelConfig::reliable());
        for i in 0..10u8 {
            a.send(vec![i]);
        }
        for i in 0..10u8 {
            assert_eq!(b.recv_timeout(Duration::from_secs(1)), Some(vec![i]));
        }
        assert_eq!(a.channel_stats().sent, 10);
        assert_eq!(a.channel_stats().lost, 0);
    }

    #[test]
    fn full_loss_never_delivers() {
        let (a, b) = Link::symmetric(ChannelConfig {
            loss_rate: 1.0,
            ..ChannelConfig::reliable()
        });
        a.send(vec![1, 2, 3]);
        assert_eq!(b.recv_timeout(Duration::from_millis(50)), None);
        assert_eq!(a.channel_stats().lost, 1);
    }

    #[test]
    fn full_corruption_flips_at_least_one_bit() {
        let (a, b) = Link::symmetric(ChannelConfig {
            corrupt_rate: 1.0,
            ..ChannelConfig::reliable()
        });
        a.send(vec![0, 0, 0, 0]);
        let received = b.recv_timeout(Duration::from_millis(50)).unwrap();
        assert_ne!(received, vec![0, 0, 0, 0]);
        assert_eq!(a.channel_stats().corrupted, 1);
    }
}
