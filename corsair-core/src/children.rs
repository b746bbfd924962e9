//! Child table and per-status tally.
//!
//! One record per live forked worker, keyed by pid. Status transitions
//! arrive over the status channel; the tally is updated on every transition
//! so pool-sizing decisions never have to rescan the table.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use nix::unistd::Pid;

/// Lifecycle state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Forked, READY not yet observed
    Starting,
    /// Idle, blocked on its socket receive
    Waiting,
    /// A request is being computed
    Processing,
    /// The worker announced it is about to exit
    Exiting,
}

impl ChildStatus {
    /// Single-byte encoding used on the status channel.
    #[must_use]
    pub fn wire_byte(self) -> u8 {
        match self {
            Self::Starting => b'S',
            Self::Waiting => b'W',
            Self::Processing => b'P',
            Self::Exiting => b'X',
        }
    }

    /// Decode a status byte from the wire.
    #[must_use]
    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            b'S' => Some(Self::Starting),
            b'W' => Some(Self::Waiting),
            b'P' => Some(Self::Processing),
            b'X' => Some(Self::Exiting),
            _ => None,
        }
    }
}

/// A worker's state transition report: `[pid_ascii, status_byte]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub pid: Pid,
    pub status: ChildStatus,
}

impl StatusReport {
    pub fn new(pid: Pid, status: ChildStatus) -> Self {
        Self { pid, status }
    }

    /// Frames for the status PUSH socket.
    #[must_use]
    pub fn to_frames(&self) -> Vec<Bytes> {
        vec![
            Bytes::from(self.pid.as_raw().to_string()),
            Bytes::copy_from_slice(&[self.status.wire_byte()]),
        ]
    }

    /// Parse a report off the status PULL socket. Anything that does not
    /// decode is dropped by the caller.
    #[must_use]
    pub fn parse(frames: &[Bytes]) -> Option<Self> {
        if frames.len() != 2 || frames[1].len() != 1 {
            return None;
        }
        let pid: i32 = std::str::from_utf8(&frames[0]).ok()?.parse().ok()?;
        let status = ChildStatus::from_wire_byte(frames[1][0])?;
        Some(Self {
            pid: Pid::from_raw(pid),
            status,
        })
    }
}

/// Record of one live forked worker.
#[derive(Debug, Clone)]
pub struct ChildRecord {
    /// Routing identity the worker uses on the backend socket
    pub identity: Bytes,
    pub status: ChildStatus,
    pub started_at: Instant,
}

/// Per-status worker counts, kept consistent with the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub starting: usize,
    pub waiting: usize,
    pub processing: usize,
    pub exiting: usize,
}

impl Tally {
    fn slot(&mut self, status: ChildStatus) -> &mut usize {
        match status {
            ChildStatus::Starting => &mut self.starting,
            ChildStatus::Waiting => &mut self.waiting,
            ChildStatus::Processing => &mut self.processing,
            ChildStatus::Exiting => &mut self.exiting,
        }
    }
}

/// Mapping from pid to child record, plus the tally.
#[derive(Debug, Default)]
pub struct ChildTable {
    children: HashMap<Pid, ChildRecord>,
    tally: Tally,
}

impl ChildTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly forked worker in `Starting` state. The identity
    /// follows the worker-side convention of `child_<pid>`.
    pub fn insert_starting(&mut self, pid: Pid) {
        let record = ChildRecord {
            identity: Bytes::from(format!("child_{pid}")),
            status: ChildStatus::Starting,
            started_at: Instant::now(),
        };
        if let Some(old) = self.children.insert(pid, record) {
            // A recycled pid before the old record was reaped; keep the
            // tally consistent with the replacement.
            *self.tally.slot(old.status) -= 1;
        }
        self.tally.starting += 1;
    }

    /// Apply a status transition. Returns false when the pid is unknown
    /// (a late report from an already-reaped worker).
    pub fn observe(&mut self, pid: Pid, status: ChildStatus) -> bool {
        match self.children.get_mut(&pid) {
            Some(record) => {
                let old = record.status;
                if old != status {
                    record.status = status;
                    *self.tally.slot(old) -= 1;
                    *self.tally.slot(status) += 1;
                }
                true
            }
            None => false,
        }
    }

    /// Delete a child record, returning it so the caller can scrub the
    /// idle queue.
    pub fn remove(&mut self, pid: Pid) -> Option<ChildRecord> {
        let record = self.children.remove(&pid)?;
        *self.tally.slot(record.status) -= 1;
        Some(record)
    }

    /// Number of live workers.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.children.len()
    }

    /// Workers currently waiting plus those still starting up. Counting
    /// starters avoids overshooting the pool while READY is in flight.
    #[must_use]
    pub fn spare(&self) -> usize {
        self.tally.waiting + self.tally.starting
    }

    /// Workers currently computing a request.
    #[must_use]
    pub fn processing(&self) -> usize {
        self.tally.processing
    }

    #[must_use]
    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Pick a waiting worker to retire when the pool is over-spare.
    #[must_use]
    pub fn pick_spare(&self) -> Option<Pid> {
        self.children
            .iter()
            .find(|(_, r)| r.status == ChildStatus::Waiting)
            .map(|(pid, _)| *pid)
    }

    /// All live pids, for signal broadcast.
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        self.children.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_byte_round_trip() {
        for status in [
            ChildStatus::Starting,
            ChildStatus::Waiting,
            ChildStatus::Processing,
            ChildStatus::Exiting,
        ] {
            assert_eq!(ChildStatus::from_wire_byte(status.wire_byte()), Some(status));
        }
        assert_eq!(ChildStatus::from_wire_byte(b'?'), None);
    }

    #[test]
    fn test_status_report_round_trip() {
        let report = StatusReport::new(Pid::from_raw(4321), ChildStatus::Processing);
        let parsed = StatusReport::parse(&report.to_frames()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_status_report_rejects_junk() {
        assert!(StatusReport::parse(&[]).is_none());
        assert!(StatusReport::parse(&[Bytes::from_static(b"12")]).is_none());
        assert!(StatusReport::parse(&[
            Bytes::from_static(b"not-a-pid"),
            Bytes::from_static(b"W"),
        ])
        .is_none());
        assert!(StatusReport::parse(&[
            Bytes::from_static(b"12"),
            Bytes::from_static(b"??"),
        ])
        .is_none());
    }

    #[test]
    fn test_tally_follows_transitions() {
        let mut table = ChildTable::new();
        let pid = Pid::from_raw(100);
        table.insert_starting(pid);
        assert_eq!(table.tally().starting, 1);
        assert_eq!(table.alive(), 1);

        assert!(table.observe(pid, ChildStatus::Waiting));
        assert_eq!(table.tally().starting, 0);
        assert_eq!(table.tally().waiting, 1);

        assert!(table.observe(pid, ChildStatus::Processing));
        assert_eq!(table.tally().waiting, 0);
        assert_eq!(table.processing(), 1);

        // Repeated identical report leaves the tally untouched.
        assert!(table.observe(pid, ChildStatus::Processing));
        assert_eq!(table.processing(), 1);

        assert!(table.observe(pid, ChildStatus::Waiting));
        let record = table.remove(pid).unwrap();
        assert_eq!(record.identity.as_ref(), b"child_100");
        assert_eq!(table.alive(), 0);
        assert_eq!(table.tally(), Tally::default());
    }

    #[test]
    fn test_observe_unknown_pid() {
        let mut table = ChildTable::new();
        assert!(!table.observe(Pid::from_raw(999), ChildStatus::Waiting));
    }

    #[test]
    fn test_spare_counts_starting_workers() {
        let mut table = ChildTable::new();
        table.insert_starting(Pid::from_raw(1));
        table.insert_starting(Pid::from_raw(2));
        assert_eq!(table.spare(), 2);
        table.observe(Pid::from_raw(1), ChildStatus::Waiting);
        assert_eq!(table.spare(), 2);
        table.observe(Pid::from_raw(1), ChildStatus::Processing);
        assert_eq!(table.spare(), 1);
    }

    #[test]
    fn test_pick_spare_prefers_waiting() {
        let mut table = ChildTable::new();
        let a = Pid::from_raw(1);
        let b = Pid::from_raw(2);
        table.insert_starting(a);
        table.insert_starting(b);
        assert_eq!(table.pick_spare(), None);
        table.observe(b, ChildStatus::Waiting);
        assert_eq!(table.pick_spare(), Some(b));
    }
}
