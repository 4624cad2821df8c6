mod common;

use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::{drive_rdt, numbered_messages};
use rdtlab::rdt::rdt21::{Rdt21Receiver, Rdt21Sender};
use rdtlab::rdt::{RdtReceiver, RdtSender};

/// RDT2.1 over a channel corrupting 20% of traffic in both directions:
/// fifteen messages, all must arrive exactly once, in order, with the
/// alternating-bit scheme absorbing every corrupted DATA/ACK/NAK.
#[test]
fn fifteen_messages_over_bidirectional_corruption() {
    common::init_tracing();

    let config = ChannelConfig {
        corrupt_rate: 0.2,
        ..ChannelConfig::reliable()
    };
    let (sender_io, receiver_io) = Link::symmetric(config);

    let sender = Rdt21Sender::new(sender_io);
    let receiver = Rdt21Receiver::new(receiver_io);

    let messages = numbered_messages("msg", 15, 2);
    let delivered = drive_rdt(&sender, &messages, &receiver, Duration::from_secs(2));

    assert_eq!(delivered, messages);
    assert_eq!(receiver.stats().delivered, 15);
    // The channel here only corrupts, never drops: every DATA frame the
    // sender puts on the wire (first send plus every retransmit) must show
    // up at the receiver, corrupted or not.
    let sender_stats = sender.stats();
    assert_eq!(
        receiver.stats().received,
        sender_stats.sent + sender_stats.retransmissions
    );

    sender.close();
    receiver.close();
}
