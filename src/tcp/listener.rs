use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::channel::EndpointIo;
use crate::err::Error;

use super::{fresh_inner, spawn_worker, Shared, TcpState, TcpStream, IDLE_POLL};

/// A passive-open endpoint bound to one local port, waiting for a single
/// incoming connection over its [`EndpointIo`]. A [`super::TcpStream`]'s
/// point-to-point channel means one listener accepts exactly one peer.
pub struct TcpListener {
    io: Option<EndpointIo>,
    local_port: u16,
}

impl TcpListener {
    pub fn bind(io: EndpointIo, local_port: u16) -> Self {
        TcpListener {
            io: Some(io),
            local_port,
        }
    }

    /// Block until a SYN arrives and the handshake completes, or `timeout`
    /// elapses with nothing incoming.
    pub fn accept(mut self, timeout: Duration) -> Result<TcpStream, Error> {
        let io = self
            .io
            .take()
            .ok_or(Error::PortClosed(self.local_port))?;

        super::reserve_port(self.local_port)?;

        let iss = rand::random::<u32>();
        let inner = fresh_inner(self.local_port, 0, TcpState::Listen, iss);

        let shared = Arc::new(Shared {
            sender: io.sender_handle(),
            inner: Mutex::new(inner),
            cvar: Condvar::new(),
            closed: AtomicBool::new(false),
        });

        let worker = spawn_worker(io, shared.clone());

        let deadline = Instant::now() + timeout;
        let mut inner = shared.inner.lock().unwrap();
        while inner.state != TcpState::Established {
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
            super::release_port(self.local_port);
            return Err(Error::TimedOut);
        }
        drop(inner);

        Ok(TcpStream::from_shared(shared, worker))
    }
}
