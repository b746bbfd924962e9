//! Broker router.
//!
//! Single-threaded dispatch loop over two ROUTER sockets. The frontend is
//! read only while a worker is idle: without that gate the broker would
//! have to queue requests itself, an unbounded-memory hazard the transport
//! and client retries already cover. Every backend message re-enqueues the
//! sending worker, because a worker sends (READY or a reply) only on its
//! way back into its own receive.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::children::StatusReport;
use crate::envelope::{self, BackendMessage, RequestEnvelope};
use crate::error::Result;
use crate::port::{self, RouterSocket, StatusPull};
use crate::queue::IdleQueue;
use crate::signals::{self, ShutdownKind};
use crate::supervisor::Supervisor;

pub struct Broker {
    frontend: RouterSocket,
    backend: RouterSocket,
    status: StatusPull,
    idle: IdleQueue,
    dropped_requests: u64,
    dropped_sends: u64,
}

impl Broker {
    pub fn new(frontend: RouterSocket, backend: RouterSocket, status: StatusPull) -> Self {
        Self {
            frontend,
            backend,
            status,
            idle: IdleQueue::new(),
            dropped_requests: 0,
            dropped_sends: 0,
        }
    }

    /// Run the dispatch loop until a shutdown signal has been drained.
    pub fn run(&mut self, sup: &mut Supervisor) -> Result<()> {
        info!("broker loop running");
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let pending = signals::drain_pending();
            if pending.chld {
                sup.note_chld();
            }
            if pending.raise > 0 || pending.lower > 0 {
                sup.adjust_limits(pending.raise, pending.lower);
            }
            if pending.hup {
                sup.broadcast_hup();
            }
            if let Some(kind) = pending.shutdown {
                if drain_deadline.is_none() {
                    match kind {
                        ShutdownKind::Graceful => {
                            info!("shutdown requested; draining in-flight requests");
                        }
                        ShutdownKind::Quit => {
                            info!("shutdown requested (kind quit); draining in-flight requests");
                        }
                    }
                    drain_deadline = Some(Instant::now() + sup.config().shutdown_grace);
                }
            }

            // Keep the tally current before any sizing or drain decision.
            self.drain_status(sup);

            if let Some(deadline) = drain_deadline {
                // A worker sends its reply on the backend before its
                // Waiting report lands on the status socket, and the two
                // transports do not order against each other. Flush the
                // backend before trusting the tally, or a drained reply
                // is thrown away with the pool.
                while self.backend.has_pollin()? {
                    self.handle_backend()?;
                }
                if sup.processing() == 0 {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        processing = sup.processing(),
                        "drain grace period elapsed with requests in flight"
                    );
                    break;
                }
            }

            // A SIGCHLD must not wait for an idle tick: a dead worker's
            // identity stays dispatchable until it is reaped. While
            // draining, reap only; no replacement forks.
            if sup.reap_pending() {
                if drain_deadline.is_some() {
                    sup.reap_now(&mut self.idle);
                } else {
                    sup.maintain(&mut self.idle)?;
                }
            }

            let gate_frontend = drain_deadline.is_none() && !self.idle.is_empty();
            let ready = port::poll_sockets(
                gate_frontend.then_some(&self.frontend),
                &self.backend,
                &self.status,
                sup.config().check_for_waiting,
            )?;

            if ready.frontend && gate_frontend && !self.idle.is_empty() {
                self.dispatch_one()?;
                continue;
            }
            if ready.backend {
                self.handle_backend()?;
                continue;
            }
            if ready.status {
                continue; // drained at the top of the next iteration
            }

            // Nothing readable: housekeeping.
            if drain_deadline.is_none() {
                sup.maintain(&mut self.idle)?;
            }
        }

        info!(
            dropped_requests = self.dropped_requests,
            dropped_sends = self.dropped_sends,
            "broker loop stopped"
        );
        Ok(())
    }

    /// Pair one frontend request with the longest-idle worker.
    fn dispatch_one(&mut self) -> Result<()> {
        // Pop before receiving: the frontend message stays queued in the
        // transport until a worker is actually in hand.
        let Some(worker) = self.idle.pop_next() else {
            return Ok(());
        };
        let frames = self.frontend.recv_multipart()?;
        let request = match RequestEnvelope::parse(&frames) {
            Ok(request) => request,
            Err(e) => {
                self.dropped_requests += 1;
                debug!(error = %e, frames = frames.len(), "malformed frontend message dropped");
                // Nothing was dispatched; the worker is still idle.
                self.idle.push_idle(worker);
                return Ok(());
            }
        };
        trace!(worker = ?worker, payload = request.payload.len(), "dispatching request");
        let msg = envelope::dispatch_frames(&worker, &request.client, &request.payload);
        if let Err(e) = self.backend.send_multipart(&msg) {
            self.dropped_sends += 1;
            warn!(error = %e, worker = ?worker, "backend send failed; request dropped");
        }
        Ok(())
    }

    /// Handle one backend message: re-enqueue the worker, and forward the
    /// reply when it is one.
    fn handle_backend(&mut self) -> Result<()> {
        let frames = self.backend.recv_multipart()?;
        match BackendMessage::parse(&frames) {
            Ok(BackendMessage::Ready { worker }) => {
                debug!(worker = ?worker, "worker checked in");
                self.idle.push_idle(worker);
            }
            Ok(BackendMessage::Reply {
                worker,
                client,
                payload,
            }) => {
                trace!(worker = ?worker, payload = payload.len(), "reply received");
                self.idle.push_idle(worker);
                let msg = envelope::reply_frames(&client, &payload);
                if let Err(e) = self.frontend.send_multipart(&msg) {
                    self.dropped_sends += 1;
                    warn!(error = %e, client = ?client, "frontend send failed; reply dropped");
                }
            }
            Err(e) => {
                debug!(error = %e, frames = frames.len(), "malformed backend message dropped");
            }
        }
        Ok(())
    }

    /// Drain every queued status report into the supervisor.
    fn drain_status(&mut self, sup: &mut Supervisor) {
        loop {
            match self.status.try_recv() {
                Ok(Some(frames)) => match StatusReport::parse(&frames) {
                    Some(report) => sup.observe_status(report),
                    None => debug!(frames = frames.len(), "malformed status report dropped"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "status channel receive failed");
                    break;
                }
            }
        }
    }
}
