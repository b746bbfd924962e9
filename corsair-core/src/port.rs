//! Messaging port: the thin adapter over libzmq that the core runs on.
//!
//! The broker owns two ROUTER sockets; each worker owns one REQ socket plus
//! a PUSH for status reports. Everything here converts between libzmq's
//! `Vec<Vec<u8>>` multipart form and the `Bytes` frames the rest of the
//! crate uses.
//!
//! A `Transport` wraps one messaging context. Contexts are strictly
//! per-process: a forked child must build its own and never touch the one
//! it inherited, or the context's background I/O threads misbehave.

use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::children::{ChildStatus, StatusReport};
use crate::error::{CorsairError, Result};

/// The byte a worker sends once after connecting to announce availability.
pub const READY_SENTINEL: &[u8] = b"\x01";

/// One messaging context and the sockets hanging off it.
pub struct Transport {
    ctx: zmq::Context,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            ctx: zmq::Context::new(),
        }
    }

    /// Bind a ROUTER socket to `endpoint`.
    ///
    /// With `mandatory` set, sending to an identity with no connected peer
    /// returns an error instead of vanishing. The backend wants that: a
    /// send to a reaped worker's stale identity must be observable so the
    /// broker can log the dropped request. The frontend does not: a client
    /// that gave up and disconnected is routine.
    pub fn router(&self, endpoint: &str, mandatory: bool) -> Result<RouterSocket> {
        let sock = self.ctx.socket(zmq::ROUTER)?;
        sock.set_linger(0)?;
        if mandatory {
            sock.set_router_mandatory(true)?;
        }
        sock.bind(endpoint).map_err(|source| CorsairError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(RouterSocket { sock })
    }

    /// Open the worker-side REQ socket: identity set before connect, linger
    /// zero, and a bounded receive so the serve loop can observe stop flags.
    pub fn worker(
        &self,
        endpoint: &str,
        identity: &[u8],
        recv_timeout: Duration,
    ) -> Result<WorkerSocket> {
        let sock = self.ctx.socket(zmq::REQ)?;
        sock.set_identity(identity)?;
        sock.set_linger(0)?;
        sock.set_rcvtimeo(recv_timeout.as_millis() as i32)?;
        sock.connect(endpoint)?;
        Ok(WorkerSocket { sock })
    }

    /// Bind the supervisor end of the status channel.
    pub fn status_pull(&self, endpoint: &str) -> Result<StatusPull> {
        let sock = self.ctx.socket(zmq::PULL)?;
        sock.set_linger(0)?;
        sock.bind(endpoint).map_err(|source| CorsairError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(StatusPull { sock })
    }

    /// Connect the worker end of the status channel.
    pub fn status_push(&self, endpoint: &str) -> Result<StatusPush> {
        let sock = self.ctx.socket(zmq::PUSH)?;
        sock.set_linger(0)?;
        sock.connect(endpoint)?;
        Ok(StatusPush { sock })
    }
}

fn to_bytes(frames: Vec<Vec<u8>>) -> Vec<Bytes> {
    frames.into_iter().map(Bytes::from).collect()
}

/// Peer-addressable server socket. Inbound messages carry the sender's
/// identity as frame 0; outbound messages are addressed the same way.
pub struct RouterSocket {
    sock: zmq::Socket,
}

impl RouterSocket {
    /// Non-blocking readable check.
    pub fn has_pollin(&self) -> Result<bool> {
        Ok(self.sock.poll(zmq::POLLIN, 0)? != 0)
    }

    /// Receive one complete multipart message. Retries on EINTR; the caller
    /// re-checks signal flags at the top of its loop.
    pub fn recv_multipart(&self) -> Result<Vec<Bytes>> {
        loop {
            match self.sock.recv_multipart(0) {
                Ok(frames) => return Ok(to_bytes(frames)),
                Err(zmq::Error::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one multipart message without blocking. The broker never
    /// buffers: a full peer queue or an unroutable identity is an error
    /// for the caller to log and drop.
    pub fn send_multipart(&self, frames: &[Bytes]) -> Result<()> {
        self.sock
            .send_multipart(frames.iter().map(|f| &f[..]), zmq::DONTWAIT)?;
        Ok(())
    }
}

/// The worker's REQ socket. Send and receive alternate strictly: READY,
/// then recv request / send reply forever.
pub struct WorkerSocket {
    sock: zmq::Socket,
}

impl WorkerSocket {
    /// Announce availability. The socket inserts the empty delimiter, so
    /// the backend ROUTER sees `[identity, empty, READY]`.
    pub fn send_ready(&self) -> Result<()> {
        self.sock.send(READY_SENTINEL, 0)?;
        Ok(())
    }

    /// Receive the next request, or `None` when the receive timeout or a
    /// signal interrupted the wait.
    pub fn recv_request(&self) -> Result<Option<Vec<Bytes>>> {
        match self.sock.recv_multipart(0) {
            Ok(frames) => Ok(Some(to_bytes(frames))),
            Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Send a reply envelope. On the backend ROUTER this doubles as the
    /// worker's return to the idle queue.
    pub fn send_reply(&self, frames: &[Bytes]) -> Result<()> {
        self.sock
            .send_multipart(frames.iter().map(|f| &f[..]), 0)?;
        Ok(())
    }
}

/// Supervisor end of the status channel.
pub struct StatusPull {
    sock: zmq::Socket,
}

impl StatusPull {
    /// Drain one pending report without blocking.
    pub fn try_recv(&self) -> Result<Option<Vec<Bytes>>> {
        match self.sock.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => Ok(Some(to_bytes(frames))),
            Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Worker end of the status channel.
pub struct StatusPush {
    sock: zmq::Socket,
}

impl StatusPush {
    /// Best-effort, non-blocking report. A worker must never hang on its
    /// status socket, so a full queue drops the report with a warning.
    pub fn report(&self, pid: nix::unistd::Pid, status: ChildStatus) {
        let frames = StatusReport::new(pid, status).to_frames();
        if let Err(e) = self
            .sock
            .send_multipart(frames.iter().map(|f| &f[..]), zmq::DONTWAIT)
        {
            warn!(error = %e, status = ?status, "status report dropped");
        }
    }
}

/// Which sockets came up readable from a poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub frontend: bool,
    pub backend: bool,
    pub status: bool,
}

/// Poll the broker's sockets in one call. The frontend is only part of the
/// poll set when the caller passes it: with no idle workers (or while
/// draining) frontend traffic stays queued in the transport and
/// back-pressure falls to the clients.
///
/// Returns an empty readiness on EINTR so the caller's signal check runs.
pub fn poll_sockets(
    frontend: Option<&RouterSocket>,
    backend: &RouterSocket,
    status: &StatusPull,
    timeout: Duration,
) -> Result<Readiness> {
    let mut items = Vec::with_capacity(3);
    if let Some(f) = frontend {
        items.push(f.sock.as_poll_item(zmq::POLLIN));
    }
    items.push(backend.sock.as_poll_item(zmq::POLLIN));
    items.push(status.sock.as_poll_item(zmq::POLLIN));

    match zmq::poll(&mut items, timeout.as_millis() as i64) {
        Ok(_) => {}
        Err(zmq::Error::EINTR) => return Ok(Readiness::default()),
        Err(e) => return Err(e.into()),
    }

    let mut ready = Readiness::default();
    let mut iter = items.iter();
    if frontend.is_some() {
        ready.frontend = iter.next().is_some_and(zmq::PollItem::is_readable);
    }
    ready.backend = iter.next().is_some_and(zmq::PollItem::is_readable);
    ready.status = iter.next().is_some_and(zmq::PollItem::is_readable);
    Ok(ready)
}
