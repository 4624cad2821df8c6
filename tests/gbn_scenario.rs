mod common;

use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::{drive_rdt, numbered_messages};
use rdtlab::rdt::gbn::{GbnReceiver, GbnSender};
use rdtlab::rdt::{RdtReceiver, RdtSender};

/// Go-Back-N with a window of 5 over a 10% loss / 5% corruption channel:
/// fifty messages, all delivered in order despite the full-window
/// retransmits a lost packet triggers.
#[test]
fn fifty_packets_with_window_five_over_a_lossy_channel() {
    common::init_tracing();

    let config = ChannelConfig {
        loss_rate: 0.1,
        corrupt_rate: 0.05,
        ..ChannelConfig::reliable()
    };
    let (sender_io, receiver_io) = Link::symmetric(config);

    let sender = GbnSender::with_params(sender_io, 5, Duration::from_millis(200));
    let receiver = GbnReceiver::new(receiver_io);

    let messages = numbered_messages("Pacote", 50, 3);
    let delivered = drive_rdt(&sender, &messages, &receiver, Duration::from_secs(10));

    assert_eq!(delivered, messages);
    assert_eq!(receiver.stats().delivered, 50);
    assert!(
        sender.stats().retransmissions > 0,
        "a 10% loss rate over 50 packets should trigger at least one window retransmit"
    );

    sender.close();
    receiver.close();
}
