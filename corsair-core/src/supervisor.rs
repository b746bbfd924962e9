//! Preforking supervisor.
//!
//! Runs inside the broker loop's idle branch: forks workers up to the pool
//! bounds, reaps the ones SIGCHLD flagged, retires spares over the limit,
//! and applies the TTIN/TTOU resize signals. All of it is ordinary
//! single-threaded code; the only thing signal handlers do is set flags.

use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::children::{ChildStatus, ChildTable, StatusReport};
use crate::config::PoolConfig;
use crate::error::{CorsairError, Result};
use crate::queue::IdleQueue;
use crate::worker::{self, App, FailurePolicy};

/// Transient fork failures are retried this many times before escalating.
const FORK_RETRY_LIMIT: u32 = 3;

/// Initial delay between fork retries; doubles per attempt.
const FORK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Owns the child processes and the pool-sizing policy.
pub struct Supervisor {
    cfg: PoolConfig,
    children: ChildTable,
    app: App,
    policy: FailurePolicy,
    reap_pending: bool,
}

impl Supervisor {
    pub fn new(cfg: PoolConfig, app: App, policy: FailurePolicy) -> Self {
        Self {
            cfg,
            children: ChildTable::new(),
            app,
            policy,
            reap_pending: false,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    /// Number of live workers.
    pub fn alive(&self) -> usize {
        self.children.alive()
    }

    /// Number of workers currently computing a request.
    pub fn processing(&self) -> usize {
        self.children.processing()
    }

    /// Bring the pool up to `min_servers` before the broker loop starts.
    pub fn prefork(&mut self) -> Result<()> {
        for _ in 0..self.cfg.min_servers {
            self.fork_worker()?;
        }
        info!(workers = self.children.alive(), "pool preforked");
        Ok(())
    }

    /// Fork one worker. The child never returns: it runs the worker runtime
    /// on a fresh context and exits, so nothing inherited from the
    /// supervisor (sockets, the broker's context) is ever dropped in it.
    pub fn fork_worker(&mut self) -> Result<()> {
        let mut delay = FORK_RETRY_DELAY;
        for attempt in 1..=FORK_RETRY_LIMIT {
            // Safety: the supervisor process is single-threaded by design;
            // the child calls only fork-safe code before exec-free exit.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    self.children.insert_starting(child);
                    debug!(pid = %child, "forked worker");
                    return Ok(());
                }
                Ok(ForkResult::Child) => {
                    let code = worker::run(&self.cfg, &self.app, self.policy);
                    std::process::exit(code);
                }
                Err(errno @ (nix::errno::Errno::EAGAIN | nix::errno::Errno::ENOMEM))
                    if attempt < FORK_RETRY_LIMIT =>
                {
                    warn!(%errno, attempt, "fork failed; retrying");
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(errno) => {
                    return Err(CorsairError::Fork {
                        attempts: attempt,
                        source: errno,
                    })
                }
            }
        }
        Err(CorsairError::Fork {
            attempts: FORK_RETRY_LIMIT,
            source: nix::errno::Errno::EAGAIN,
        })
    }

    /// Note a SIGCHLD observed by the signal dispatcher; the actual reap
    /// happens on the next housekeeping pass.
    pub fn note_chld(&mut self) {
        self.reap_pending = true;
    }

    pub fn reap_pending(&self) -> bool {
        self.reap_pending
    }

    /// Apply a status-channel report to the child table.
    pub fn observe_status(&mut self, report: StatusReport) {
        if self.children.observe(report.pid, report.status) {
            debug!(pid = %report.pid, status = ?report.status, "worker status");
        } else {
            // Late report from a worker that was already reaped.
            debug!(pid = %report.pid, status = ?report.status, "status from unknown worker");
        }
    }

    /// Reap without resizing. Used while the broker drains for shutdown,
    /// when replacement forks would be wrong.
    pub fn reap_now(&mut self, idle: &mut IdleQueue) {
        self.reap_pending = false;
        self.reap(idle);
    }

    /// Housekeeping, run from the broker's idle branch: reap, then resize
    /// the pool toward its configured bounds.
    pub fn maintain(&mut self, idle: &mut IdleQueue) -> Result<()> {
        if self.reap_pending {
            self.reap_pending = false;
            self.reap(idle);
        }

        // Top up: honor the floor first, then the spare target, never
        // exceeding the ceiling. Starting workers count as spares so one
        // slow READY does not trigger a fork stampede.
        while self.children.alive() < self.cfg.min_servers
            || (self.children.spare() < self.cfg.min_spare_servers
                && self.children.alive() < self.cfg.max_servers)
        {
            if self.children.alive() >= self.cfg.max_servers {
                break;
            }
            self.fork_worker()?;
        }

        // Shrink: one polite retirement per pass keeps the pool from
        // oscillating.
        if self.children.spare() > self.cfg.max_spare_servers
            && self.children.alive() > self.cfg.min_servers
        {
            self.stop_one_spare();
        }

        Ok(())
    }

    /// Reap every child the kernel has ready, removing records and
    /// scrubbing their identities from the idle queue.
    fn reap(&mut self, idle: &mut IdleQueue) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.forget(pid, idle, &format!("exited with code {code}"));
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    self.forget(pid, idle, &format!("killed by {signal}"));
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(errno) => {
                    warn!(%errno, "waitpid failed during reap");
                    break;
                }
            }
        }
    }

    fn forget(&mut self, pid: Pid, idle: &mut IdleQueue, how: &str) {
        match self.children.remove(pid) {
            Some(record) => {
                let scrubbed = idle.scrub(&record.identity);
                debug!(%pid, how, scrubbed, "reaped worker");
            }
            None => debug!(%pid, how, "reaped unknown child"),
        }
    }

    /// SIGTERM one waiting worker; it finishes nothing (it is idle) and
    /// exits. Marked exiting immediately so the next pass picks another.
    fn stop_one_spare(&mut self) {
        let Some(pid) = self.children.pick_spare() else {
            return;
        };
        debug!(%pid, "retiring spare worker");
        if let Err(errno) = kill(pid, Signal::SIGTERM) {
            warn!(%pid, %errno, "failed to signal spare worker");
            return;
        }
        self.children.observe(pid, ChildStatus::Exiting);
    }

    /// SIGHUP every child: each exits after its current request and the
    /// next housekeeping passes fork replacements.
    pub fn broadcast_hup(&mut self) {
        let pids = self.children.pids();
        info!(workers = pids.len(), "restarting all workers");
        for pid in pids {
            if let Err(errno) = kill(pid, Signal::SIGHUP) {
                warn!(%pid, %errno, "failed to HUP worker");
            } else {
                self.children.observe(pid, ChildStatus::Exiting);
            }
        }
    }

    /// Apply TTIN/TTOU pool resizes, one step per delivered signal. The
    /// pool never shrinks below one server.
    pub fn adjust_limits(&mut self, raise: usize, lower: usize) {
        for _ in 0..raise {
            self.cfg.min_servers += 1;
            self.cfg.max_servers += 1;
            info!(
                min_servers = self.cfg.min_servers,
                max_servers = self.cfg.max_servers,
                "raised worker limits"
            );
        }
        for _ in 0..lower {
            if self.cfg.min_servers <= 1 {
                warn!("ignoring TTOU: already at minimum pool size");
                continue;
            }
            self.cfg.min_servers -= 1;
            self.cfg.max_servers -= 1;
            info!(
                min_servers = self.cfg.min_servers,
                max_servers = self.cfg.max_servers,
                "lowered worker limits"
            );
        }
    }

    /// Terminate the pool: SIGTERM everyone, wait out the grace period,
    /// then SIGKILL stragglers. Used after the broker loop has drained.
    pub fn shutdown(&mut self, idle: &mut IdleQueue) {
        let pids = self.children.pids();
        if pids.is_empty() {
            return;
        }
        info!(workers = pids.len(), "stopping workers");
        for pid in &pids {
            let _ = kill(*pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + self.cfg.shutdown_grace;
        while self.children.alive() > 0 && Instant::now() < deadline {
            self.reap(idle);
            if self.children.alive() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        for pid in self.children.pids() {
            warn!(%pid, "worker ignored SIGTERM; killing");
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
            self.forget(pid, idle, "killed at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::echo;

    fn supervisor() -> Supervisor {
        let cfg = PoolConfig::new(6660, 6661)
            .with_min_servers(2)
            .with_max_servers(4);
        Supervisor::new(cfg, echo(), FailurePolicy::default())
    }

    #[test]
    fn test_adjust_limits_steps() {
        let mut sup = supervisor();
        sup.adjust_limits(3, 0);
        assert_eq!(sup.config().min_servers, 5);
        assert_eq!(sup.config().max_servers, 7);
        sup.adjust_limits(0, 2);
        assert_eq!(sup.config().min_servers, 3);
        assert_eq!(sup.config().max_servers, 5);
    }

    #[test]
    fn test_adjust_limits_floor() {
        let cfg = PoolConfig::new(6660, 6661)
            .with_min_servers(1)
            .with_max_servers(1);
        let mut sup = Supervisor::new(cfg, echo(), FailurePolicy::default());
        sup.adjust_limits(0, 5);
        assert_eq!(sup.config().min_servers, 1);
        assert_eq!(sup.config().max_servers, 1);
    }

    #[test]
    fn test_observe_status_unknown_pid_is_ignored() {
        let mut sup = supervisor();
        sup.observe_status(StatusReport::new(Pid::from_raw(424242), ChildStatus::Waiting));
        assert_eq!(sup.alive(), 0);
        assert_eq!(sup.processing(), 0);
    }

    #[test]
    fn test_note_chld_sets_reap_flag() {
        let mut sup = supervisor();
        assert!(!sup.reap_pending());
        sup.note_chld();
        assert!(sup.reap_pending());
    }
}
