mod common;

use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::{drive_rdt, numbered_messages};
use rdtlab::rdt::rdt30::{Rdt30Receiver, Rdt30Sender};
use rdtlab::rdt::{RdtReceiver, RdtSender};

/// RDT3.0 over a channel that loses, corrupts, and delays: twenty messages
/// over a 15% loss / 10% corruption / 50-500ms delay channel, with a 2s
/// RTO — every message must still arrive, in order, exactly once, and the
/// loss rate must have forced at least one timeout and one retransmit.
#[test]
fn twenty_messages_over_a_lossy_corrupting_delaying_channel() {
    common::init_tracing();

    let config = ChannelConfig {
        loss_rate: 0.15,
        corrupt_rate: 0.10,
        delay_min: Duration::from_millis(50),
        delay_max: Duration::from_millis(500),
    };
    let (sender_io, receiver_io) = Link::symmetric(config);

    let sender = Rdt30Sender::with_rto(sender_io, Duration::from_secs(2));
    let receiver = Rdt30Receiver::new(receiver_io);

    let messages = numbered_messages("msg", 20, 2);
    let delivered = drive_rdt(&sender, &messages, &receiver, Duration::from_secs(60));

    assert_eq!(delivered, messages);
    assert_eq!(receiver.stats().delivered, 20);
    assert!(
        sender.stats().timeouts > 0,
        "a 15% loss rate over 20 messages should trigger at least one RTO expiry"
    );
    assert!(
        sender.stats().retransmissions > 0,
        "a 15% loss rate over 20 messages should trigger at least one retransmit"
    );

    sender.close();
    receiver.close();
}
