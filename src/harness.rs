//! Shared "spawn a pair, feed messages, collect what arrives" scaffolding
//! used by this crate's own scenario tests. Not a mock: the pair still talks
//! over a real (in-process) [`crate::channel::UnreliableChannel`].

use std::time::Duration;

use crate::rdt::{RdtReceiver, RdtSender};
use crate::tcp::TcpStream;

/// Feed every message in `messages` to `sender`, then pull up to
/// `messages.len()` payloads off `receiver`, stopping early if `recv`
/// times out. Returns whatever was actually delivered, in delivery order.
pub fn drive_rdt<S, R>(sender: &S, messages: &[Vec<u8>], receiver: &R, recv_timeout: Duration) -> Vec<Vec<u8>>
where
    S: RdtSender,
    R: RdtReceiver,
{
    for msg in messages {
        sender
            .send(msg)
            .expect("harness: send should not fail against an in-process channel");
    }

    let mut delivered = Vec::with_capacity(messages.len());
    for _ in 0..messages.len() {
        match receiver.recv(recv_timeout) {
            Some(payload) => delivered.push(payload),
            None => break,
        }
    }
    delivered
}

/// Build `[b"label 000", b"label 001", ...]`-style fixtures, matching the
/// naming convention used by several of the scenario tests.
pub fn numbered_messages(label: &str, count: usize, width: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{label} {i:0width$}").into_bytes())
        .collect()
}

/// Drain `stream` with repeated `recv` calls until its peer's FIN has been
/// seen and fully delivered, or `overall_timeout` elapses.
pub fn drain_until_eof(
    stream: &TcpStream,
    overall_timeout: Duration,
    chunk_timeout: Duration,
) -> Vec<u8> {
    let deadline = std::time::Instant::now() + overall_timeout;
    let mut out = Vec::new();
    while std::time::Instant::now() < deadline {
        if stream.is_eof() {
            break;
        }
        match stream.recv(64 * 1024, chunk_timeout) {
            Ok(chunk) if chunk.is_empty() => {
                if stream.is_eof() {
                    break;
                }
            }
            Ok(mut chunk) => out.append(&mut chunk),
            Err(_) => break,
        }
    }
    out
}
