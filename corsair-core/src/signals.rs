//! Signal dispatch.
//!
//! Handlers are async-signal-safe: they only store into static atomics. The
//! broker loop drains the pending set at the top of every iteration and the
//! supervisor acts on it from ordinary code. Workers install a reduced set
//! that collapses INT/TERM/HUP into a single stop flag.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Result;

const SHUTDOWN_NONE: u8 = 0;
const SHUTDOWN_GRACEFUL: u8 = 1;
const SHUTDOWN_QUIT: u8 = 2;

static SHUTDOWN: AtomicU8 = AtomicU8::new(SHUTDOWN_NONE);
static HUP_PENDING: AtomicBool = AtomicBool::new(false);
static CHLD_PENDING: AtomicBool = AtomicBool::new(false);
static TTIN_PENDING: AtomicUsize = AtomicUsize::new(0);
static TTOU_PENDING: AtomicUsize = AtomicUsize::new(0);
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// How a shutdown was requested, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// SIGINT or SIGTERM
    Graceful,
    /// SIGQUIT
    Quit,
}

/// Snapshot of everything that arrived since the last drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSignals {
    pub shutdown: Option<ShutdownKind>,
    pub hup: bool,
    pub chld: bool,
    /// Number of SIGTTIN deliveries (grow the pool by one each)
    pub raise: usize,
    /// Number of SIGTTOU deliveries (shrink the pool by one each)
    pub lower: usize,
}

extern "C" fn on_supervisor_signal(signum: libc::c_int) {
    match signum {
        libc::SIGINT | libc::SIGTERM => {
            let _ = SHUTDOWN.compare_exchange(
                SHUTDOWN_NONE,
                SHUTDOWN_GRACEFUL,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        libc::SIGQUIT => SHUTDOWN.store(SHUTDOWN_QUIT, Ordering::SeqCst),
        libc::SIGHUP => HUP_PENDING.store(true, Ordering::SeqCst),
        libc::SIGCHLD => CHLD_PENDING.store(true, Ordering::SeqCst),
        libc::SIGTTIN => {
            TTIN_PENDING.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGTTOU => {
            TTOU_PENDING.fetch_add(1, Ordering::SeqCst);
        }
        _ => {}
    }
}

extern "C" fn on_worker_signal(_signum: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install(signal: Signal, handler: SigHandler) -> Result<()> {
    // No SA_RESTART: a pending signal must interrupt the broker's poll so
    // it is acted on before the next timeout tick.
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Install the supervisor's handler set. SIGPIPE is ignored: a peer closing
/// mid-send must surface as a send error, not kill the broker.
pub fn install_supervisor_handlers() -> Result<()> {
    let handler = SigHandler::Handler(on_supervisor_signal);
    for signal in [
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGQUIT,
        Signal::SIGHUP,
        Signal::SIGCHLD,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        install(signal, handler)?;
    }
    install(Signal::SIGPIPE, SigHandler::SigIgn)?;
    Ok(())
}

/// Install the worker's handler set and clear any state inherited from the
/// supervisor across fork. INT/TERM/HUP all mean "finish the current
/// request, then exit".
pub fn install_worker_handlers() -> Result<()> {
    STOP_REQUESTED.store(false, Ordering::SeqCst);
    SHUTDOWN.store(SHUTDOWN_NONE, Ordering::SeqCst);
    HUP_PENDING.store(false, Ordering::SeqCst);
    CHLD_PENDING.store(false, Ordering::SeqCst);
    TTIN_PENDING.store(0, Ordering::SeqCst);
    TTOU_PENDING.store(0, Ordering::SeqCst);

    let handler = SigHandler::Handler(on_worker_signal);
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        install(signal, handler)?;
    }
    install(Signal::SIGPIPE, SigHandler::SigIgn)?;
    for signal in [Signal::SIGCHLD, Signal::SIGTTIN, Signal::SIGTTOU] {
        install(signal, SigHandler::SigDfl)?;
    }
    Ok(())
}

/// Snapshot-and-clear the pending set. Shutdown requests are sticky: once
/// requested, every later drain keeps reporting the kind so the drain logic
/// cannot lose it.
pub fn drain_pending() -> PendingSignals {
    let shutdown = match SHUTDOWN.load(Ordering::SeqCst) {
        SHUTDOWN_GRACEFUL => Some(ShutdownKind::Graceful),
        SHUTDOWN_QUIT => Some(ShutdownKind::Quit),
        _ => None,
    };
    PendingSignals {
        shutdown,
        hup: HUP_PENDING.swap(false, Ordering::SeqCst),
        chld: CHLD_PENDING.swap(false, Ordering::SeqCst),
        raise: TTIN_PENDING.swap(0, Ordering::SeqCst),
        lower: TTOU_PENDING.swap(0, Ordering::SeqCst),
    }
}

/// Worker-side: has INT/TERM/HUP been delivered?
#[must_use]
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The pending set is process-global, so the whole flag lifecycle is
    // exercised in one test to keep the harness's parallelism out of it.
    #[test]
    fn test_pending_signal_lifecycle() {
        assert_eq!(drain_pending(), PendingSignals::default());

        on_supervisor_signal(libc::SIGCHLD);
        on_supervisor_signal(libc::SIGHUP);
        on_supervisor_signal(libc::SIGTTIN);
        on_supervisor_signal(libc::SIGTTIN);
        on_supervisor_signal(libc::SIGTTOU);

        let pending = drain_pending();
        assert!(pending.chld);
        assert!(pending.hup);
        assert_eq!(pending.raise, 2);
        assert_eq!(pending.lower, 1);
        assert_eq!(pending.shutdown, None);

        // Drained flags are cleared.
        assert_eq!(drain_pending(), PendingSignals::default());

        // TERM requests a graceful shutdown; QUIT upgrades it.
        on_supervisor_signal(libc::SIGTERM);
        assert_eq!(drain_pending().shutdown, Some(ShutdownKind::Graceful));
        on_supervisor_signal(libc::SIGQUIT);
        let pending = drain_pending();
        assert_eq!(pending.shutdown, Some(ShutdownKind::Quit));

        // Shutdown is sticky across drains.
        assert_eq!(drain_pending().shutdown, Some(ShutdownKind::Quit));

        // Worker stop flag.
        SHUTDOWN.store(SHUTDOWN_NONE, Ordering::SeqCst);
        assert!(!stop_requested());
        on_worker_signal(libc::SIGTERM);
        assert!(stop_requested());
        STOP_REQUESTED.store(false, Ordering::SeqCst);
    }
}
