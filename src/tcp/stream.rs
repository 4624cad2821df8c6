use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::EndpointIo;
use crate::codec::{tcp_flags, MSS};
use crate::err::Error;
use crate::stats::TcpStats;

use super::{fresh_inner, spawn_worker, SendEntry, Shared, TcpState, IDLE_POLL, INITIAL_RTO};

/// A connected, byte-stream endpoint. Construct one with [`TcpStream::connect`]
/// or by accepting on a [`super::TcpListener`].
pub struct TcpStream {
    pub(crate) shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TcpStream {
    /// Active open: send a SYN and block until ESTABLISHED or `timeout`
    /// elapses with no SYN+ACK.
    pub fn connect(
        io: EndpointIo,
        local_port: u16,
        remote_port: u16,
        timeout: Duration,
    ) -> Result<TcpStream, Error> {
        super::reserve_port(local_port)?;

        let iss = rand::random::<u32>();
        let mut inner = fresh_inner(local_port, remote_port, TcpState::SynSent, iss);
        inner.snd_next = iss.wrapping_add(1);
        inner.timer_deadline = Some(Instant::now() + INITIAL_RTO);

        let shared = Arc::new(Shared {
            sender: io.sender_handle(),
            inner: Mutex::new(inner),
            cvar: std::sync::Condvar::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        {
            let inner = shared.inner.lock().unwrap();
            shared.send_segment(&inner, iss, tcp_flags::SYN, vec![]);
        }

        let worker = spawn_worker(io, shared.clone());

        let deadline = Instant::now() + timeout;
        let mut inner = shared.inner.lock().unwrap();
        while inner.state == TcpState::SynSent {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (guard, _) = shared
                .cvar
                .wait_timeout(inner, remaining.min(IDLE_POLL))
                .unwrap();
            inner = guard;
        }

        if inner.state != TcpState::Established {
            drop(inner);
            shared.closed.store(true, Ordering::Release);
            shared.cvar.notify_all();
            let _ = worker.join();
            super::release_port(local_port);
            return Err(Error::TimedOut);
        }
        drop(inner);

        Ok(TcpStream {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Wrap an already-SYN_RECEIVED TCB (built by [`super::TcpListener`])
    /// once the worker thread has been spawned on its behalf.
    pub(crate) fn from_shared(shared: Arc<Shared>, worker: JoinHandle<()>) -> TcpStream {
        TcpStream {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Send `bytes`, split into MSS-sized segments. Blocks while the
    /// in-flight byte count would exceed `min(send_window, cwnd)`.
    pub fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        for chunk in bytes.chunks(MSS) {
            self.send_chunk(chunk)?;
        }
        Ok(())
    }

    fn send_chunk(&self, chunk: &[u8]) -> Result<(), Error> {
        let mut inner = self.shared.inner.lock().unwrap();
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::NotConnected);
            }
            if inner.reset {
                return Err(Error::ConnectionReset);
            }
            match inner.state {
                TcpState::Established | TcpState::CloseWait => {}
                _ => return Err(Error::NotConnected),
            }
            if inner.unacked_bytes() < inner.in_flight_ceiling() {
                break;
            }
            let (guard, _) = self.shared.cvar.wait_timeout(inner, IDLE_POLL).unwrap();
            inner = guard;
        }

        let seq = inner.snd_next;
        inner.snd_next = inner.snd_next.wrapping_add(chunk.len() as u32);
        let was_empty = inner.send_buffer.is_empty();
        inner.send_buffer.push_back(SendEntry {
            seq,
            bytes: chunk.to_vec(),
            is_fin: false,
            timestamp: Instant::now(),
            retried: false,
        });
        if was_empty {
            let rto = inner.rto;
            inner.timer_deadline = Some(Instant::now() + rto);
        }
        inner.stats.segments_sent += 1;
        self.shared
            .send_segment(&inner, seq, tcp_flags::ACK, chunk.to_vec());
        Ok(())
    }

    /// Return up to `max_bytes` delivered application bytes, blocking for up
    /// to `timeout` if none are available yet. Returns an empty vector both
    /// on idle timeout and once the peer's FIN has been fully drained (EOF);
    /// use [`TcpStream::is_eof`] to distinguish the two.
    pub fn recv(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, Error> {
        let inner = self.shared.inner.lock().unwrap();
        let (mut inner, _) = self
            .shared
            .cvar
            .wait_timeout_while(inner, timeout, |s| {
                s.app_recv_queue.is_empty() && !s.peer_eof && s.state != TcpState::Closed
            })
            .unwrap();

        if inner.reset && inner.app_recv_queue.is_empty() {
            return Err(Error::ConnectionReset);
        }

        let take = max_bytes.min(inner.app_recv_queue.len());
        let out: Vec<u8> = inner.app_recv_queue.drain(..take).collect();
        Ok(out)
    }

    /// True once the peer's FIN has been received and every buffered byte
    /// ahead of it has been drained by `recv`.
    pub fn is_eof(&self) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        inner.peer_eof && inner.app_recv_queue.is_empty()
    }

    /// Initiate a graceful close and block until the connection reaches
    /// CLOSED or `timeout` elapses.
    pub fn close(&self, timeout: Duration) -> Result<(), Error> {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                TcpState::Established | TcpState::CloseWait => {
                    let next_state = if inner.state == TcpState::Established {
                        TcpState::FinWait1
                    } else {
                        TcpState::LastAck
                    };
                    let seq = inner.snd_next;
                    inner.snd_next = inner.snd_next.wrapping_add(1);
                    let was_empty = inner.send_buffer.is_empty();
                    inner.send_buffer.push_back(SendEntry {
                        seq,
                        bytes: vec![],
                        is_fin: true,
                        timestamp: Instant::now(),
                        retried: false,
                    });
                    if was_empty {
                        let rto = inner.rto;
                        inner.timer_deadline = Some(Instant::now() + rto);
                    }
                    self.shared
                        .send_segment(&inner, seq, tcp_flags::ACK | tcp_flags::FIN, vec![]);
                    inner.state = next_state;
                }
                TcpState::Listen | TcpState::SynSent | TcpState::SynReceived => {
                    inner.state = TcpState::Closed;
                }
                _ => {}
            }
        }

        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock().unwrap();
        while inner.state != TcpState::Closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (guard, _) = self
                .shared
                .cvar
                .wait_timeout(inner, remaining.min(IDLE_POLL))
                .unwrap();
            inner = guard;
        }
        let reached_closed = inner.state == TcpState::Closed;
        drop(inner);

        self.shared.closed.store(true, Ordering::Release);
        self.shared.cvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        if reached_closed {
            Ok(())
        } else {
            Err(Error::TimedOut)
        }
    }

    pub fn stats(&self) -> TcpStats {
        self.shared.inner.lock().unwrap().stats
    }

    pub fn state(&self) -> TcpState {
        self.shared.inner.lock().unwrap().state
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        let local_port = self.shared.inner.lock().unwrap().local_port;
        super::release_port(local_port);
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
            .map(|_| buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self
            .recv(buf.len(), Duration::from_secs(30))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}
