mod common;

use std::thread;
use std::time::Duration;

use rdtlab::channel::{ChannelConfig, Link};
use rdtlab::harness::drain_until_eof;
use rdtlab::tcp::{TcpListener, TcpStream};

/// A 1 MiB payload over a connection with 5% loss on both directions: the
/// handshake, full transfer, and graceful close must all complete, the
/// bytes must arrive byte-exact, and the loss must have produced at least
/// one retransmission and a converged adaptive RTT estimate.
#[test]
fn one_megabyte_transfer_over_a_lossy_connection() {
    common::init_tracing();

    let config = ChannelConfig {
        loss_rate: 0.05,
        ..ChannelConfig::reliable()
    };
    let (client_io, server_io) = Link::symmetric(config);

    let listener = TcpListener::bind(server_io, 9000);
    let server_thread = thread::spawn(move || listener.accept(Duration::from_secs(5)));

    let client = TcpStream::connect(client_io, 9001, 9000, Duration::from_secs(5))
        .expect("handshake should complete despite loss");
    let server = server_thread
        .join()
        .unwrap()
        .expect("server side of the handshake should complete too");

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let payload_for_client = payload.clone();

    let client_thread = thread::spawn(move || {
        client.send(&payload_for_client).unwrap();
        client.close(Duration::from_secs(10)).unwrap();
        client
    });

    let received = drain_until_eof(&server, Duration::from_secs(30), Duration::from_millis(200));
    server.close(Duration::from_secs(10)).unwrap();

    let client = client_thread.join().unwrap();

    assert_eq!(received, payload);
    assert!(
        client.stats().retransmissions > 0 || server.stats().retransmissions > 0,
        "a 5% loss rate over a megabyte transfer should force at least one retransmission"
    );
    assert!(
        client.stats().estimated_rtt > Duration::ZERO,
        "the adaptive RTT estimator should have converged to a nonzero value"
    );
}
