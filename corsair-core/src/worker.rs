//! Worker runtime.
//!
//! One instance per forked child. The worker opens its own context and REQ
//! socket, announces READY, then serves requests one at a time: receive,
//! invoke the application callback, reply. Sending the reply is also what
//! re-marks the worker idle on the backend ROUTER, so there is no separate
//! "done" message.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::unistd::Pid;
use tracing::{debug, error, trace};

use crate::children::ChildStatus;
use crate::config::PoolConfig;
use crate::envelope;
use crate::error::Result;
use crate::port::Transport;
use crate::process;
use crate::signals;

/// Error type the application callback may return.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one application invocation.
pub type AppResult = std::result::Result<Vec<u8>, AppError>;

/// The application callback: opaque request bytes in, reply bytes out.
/// Must be installed before the supervisor forks so every worker inherits it.
pub type App = Arc<dyn Fn(&[u8]) -> AppResult + Send + Sync>;

/// The default application: echo.
#[must_use]
pub fn echo() -> App {
    Arc::new(|payload| Ok(payload.to_vec()))
}

/// What a worker replies when the application callback fails or panics.
/// Either way the worker stays alive and the client gets *something*;
/// silence would look like a lost request and force a pointless retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Reply with an empty payload
    #[default]
    EmptyReply,
    /// Reply with `error: <description>`
    ErrorReply,
}

/// How long a worker blocks in receive before re-checking its stop flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Child-process entry point. Returns the process exit code; the caller
/// `exit`s with it immediately, so nothing inherited from the supervisor is
/// ever dropped here.
pub fn run(cfg: &PoolConfig, app: &App, policy: FailurePolicy) -> i32 {
    if let Err(e) = signals::install_worker_handlers() {
        error!(error = %e, "worker could not install signal handlers");
        return 1;
    }
    process::die_with_parent();
    process::set_title(&format!("zmq worker {}", cfg.backend_port));

    let pid = nix::unistd::getpid();
    match serve(cfg, pid, app, policy) {
        Ok(served) => {
            debug!(%pid, served, "worker exiting");
            0
        }
        Err(e) => {
            error!(%pid, error = %e, "worker failed");
            1
        }
    }
}

fn serve(cfg: &PoolConfig, pid: Pid, app: &App, policy: FailurePolicy) -> Result<u64> {
    // Fresh context: the one inherited across fork must not be touched.
    let transport = Transport::new();
    let identity = format!("child_{pid}");
    let socket = transport.worker(
        &cfg.worker_connect_endpoint(),
        identity.as_bytes(),
        RECV_TIMEOUT,
    )?;
    let status = transport.status_push(&cfg.status_endpoint)?;

    socket.send_ready()?;
    status.report(pid, ChildStatus::Waiting);
    debug!(%pid, identity, "worker ready");

    let mut served = 0u64;
    loop {
        if signals::stop_requested() {
            break;
        }
        let Some(frames) = socket.recv_request()? else {
            continue; // timeout tick; loop re-checks the stop flag
        };

        // The broker composed this envelope, so parse leniently: a reply
        // must go out for every receive or the REQ state machine wedges.
        let (client, payload) = split_request(&frames);

        status.report(pid, ChildStatus::Processing);
        trace!(%pid, request = payload.len(), "processing");
        let reply = invoke_app(app, &payload, policy);
        socket.send_reply(&envelope::reply_frames(&client, &reply))?;
        served += 1;
        status.report(pid, ChildStatus::Waiting);

        if cfg.max_requests > 0 && served >= cfg.max_requests as u64 {
            debug!(%pid, served, "request budget exhausted");
            break;
        }
    }

    status.report(pid, ChildStatus::Exiting);
    // Sockets and context drop here, in that order; skipping context
    // teardown leaves libzmq I/O threads that block process exit.
    Ok(served)
}

/// Pull `(client, payload)` out of `[client_id, empty, payload]` without
/// rejecting odd frame counts.
fn split_request(frames: &[Bytes]) -> (Bytes, Bytes) {
    let client = frames.first().cloned().unwrap_or_default();
    let payload = if frames.len() >= 3 {
        frames[frames.len() - 1].clone()
    } else {
        Bytes::new()
    };
    (client, payload)
}

/// Run the application callback, absorbing errors and panics per policy.
fn invoke_app(app: &App, payload: &[u8], policy: FailurePolicy) -> Bytes {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| app(payload)));
    let description = match outcome {
        Ok(Ok(reply)) => return Bytes::from(reply),
        Ok(Err(e)) => {
            error!(error = %e, "application callback failed");
            e.to_string()
        }
        Err(_) => {
            error!("application callback panicked");
            "application callback panicked".to_string()
        }
    };
    match policy {
        FailurePolicy::EmptyReply => Bytes::new(),
        FailurePolicy::ErrorReply => Bytes::from(format!("error: {description}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_app() {
        let app = echo();
        assert_eq!(app(b"hello").unwrap(), b"hello");
        assert_eq!(app(b"").unwrap(), b"");
    }

    #[test]
    fn test_invoke_app_success() {
        let app: App = Arc::new(|p| Ok(p.to_ascii_uppercase()));
        let reply = invoke_app(&app, b"abc", FailurePolicy::EmptyReply);
        assert_eq!(reply.as_ref(), b"ABC");
    }

    #[test]
    fn test_invoke_app_error_policies() {
        let app: App = Arc::new(|_| Err("boom".into()));
        assert!(invoke_app(&app, b"x", FailurePolicy::EmptyReply).is_empty());
        assert_eq!(
            invoke_app(&app, b"x", FailurePolicy::ErrorReply).as_ref(),
            b"error: boom"
        );
    }

    #[test]
    fn test_invoke_app_catches_panic() {
        let app: App = Arc::new(|_| panic!("worker bug"));
        let reply = invoke_app(&app, b"x", FailurePolicy::ErrorReply);
        assert_eq!(reply.as_ref(), b"error: application callback panicked");
    }

    #[test]
    fn test_split_request() {
        let frames = vec![
            Bytes::from_static(b"c1"),
            Bytes::new(),
            Bytes::from_static(b"job"),
        ];
        let (client, payload) = split_request(&frames);
        assert_eq!(client.as_ref(), b"c1");
        assert_eq!(payload.as_ref(), b"job");

        let (client, payload) = split_request(&[]);
        assert!(client.is_empty());
        assert!(payload.is_empty());
    }
}
