mod common;

use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::{drive_rdt, numbered_messages};
use rdtlab::rdt::rdt20::{Rdt20Receiver, Rdt20Sender};
use rdtlab::rdt::{RdtReceiver, RdtSender};

/// RDT2.0 over a channel with no errors at all: ten messages, all ten must
/// arrive in order, with zero retransmissions (nothing ever needed one).
#[test]
fn ten_messages_over_an_error_free_channel() {
    common::init_tracing();

    let (sender_io, receiver_io) = Link::symmetric(ChannelConfig::reliable());

    let sender = Rdt20Sender::new(sender_io);
    let receiver = Rdt20Receiver::new(receiver_io);

    let messages = numbered_messages("Mensagem", 10, 1);
    let delivered = drive_rdt(&sender, &messages, &receiver, Duration::from_secs(2));

    assert_eq!(delivered, messages);
    assert_eq!(sender.stats().sent, 10);
    assert_eq!(sender.stats().retransmissions, 0);
    assert_eq!(receiver.stats().delivered, 10);

    sender.close();
    receiver.close();
}
