mod common;

use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::numbered_messages;
use rdtlab::rdt::sr::{SrReceiver, SrSender};
use rdtlab::rdt::{RdtReceiver, RdtSender};

/// Selective Repeat with a window of 8 over a 15% loss channel: fifty
/// messages, all delivered in order exactly once, with the receiver's
/// reorder buffer having held at least one packet at some point (a loss
/// ahead of the gap is the only way SR ever buffers anything) and fully
/// drained by the end.
#[test]
fn fifty_packets_with_window_eight_over_a_lossy_channel() {
    common::init_tracing();

    let config = ChannelConfig {
        loss_rate: 0.15,
        ..ChannelConfig::reliable()
    };
    let (sender_io, receiver_io) = Link::symmetric(config);

    let sender = SrSender::with_params(sender_io, 8, Duration::from_millis(150)).unwrap();
    let receiver = SrReceiver::new(receiver_io, 8).unwrap();

    let messages = numbered_messages("msg", 50, 2);
    for msg in &messages {
        sender.send(msg).unwrap();
    }

    let mut delivered = Vec::with_capacity(messages.len());
    let mut max_buffered = 0u64;
    for _ in 0..messages.len() {
        max_buffered = max_buffered.max(receiver.stats().buffered_packets);
        match receiver.recv(Duration::from_secs(10)) {
            Some(payload) => delivered.push(payload),
            None => break,
        }
    }
    max_buffered = max_buffered.max(receiver.stats().buffered_packets);

    assert_eq!(delivered, messages);
    assert_eq!(receiver.stats().delivered, 50);
    assert!(
        max_buffered >= 1,
        "a 15% loss rate over 50 packets should force at least one out-of-order reorder"
    );
    assert_eq!(
        receiver.stats().buffered_packets,
        0,
        "every buffered packet should have drained by the end"
    );

    sender.close();
    receiver.close();
}
