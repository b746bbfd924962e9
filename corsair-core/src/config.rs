//! Server configuration.
//!
//! `PoolConfig` carries everything the broker, supervisor, and workers need:
//! the two TCP ports, the worker-pool sizing knobs, and the housekeeping
//! intervals. It is built once in the supervisor process and inherited by
//! forked workers.

use std::time::Duration;

use crate::error::{CorsairError, Result};

/// Default minimum number of worker processes.
pub const DEFAULT_MIN_SERVERS: usize = 5;

/// Default maximum number of worker processes.
pub const DEFAULT_MAX_SERVERS: usize = 20;

/// Default minimum number of spare (waiting) workers.
pub const DEFAULT_MIN_SPARE_SERVERS: usize = 2;

/// Default maximum number of spare (waiting) workers.
pub const DEFAULT_MAX_SPARE_SERVERS: usize = 10;

/// Default housekeeping poll interval.
pub const DEFAULT_CHECK_FOR_WAITING: Duration = Duration::from_millis(500);

/// Default grace period for draining in-flight requests on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pool and endpoint configuration.
///
/// # Examples
///
/// ```
/// use corsair_core::config::PoolConfig;
///
/// let cfg = PoolConfig::new(6660, 6661)
///     .with_min_servers(2)
///     .with_max_servers(8);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// TCP port the frontend ROUTER binds (clients connect here)
    pub frontend_port: u16,
    /// TCP port the backend ROUTER binds (workers connect here)
    pub backend_port: u16,
    /// Lower bound on the number of live workers
    pub min_servers: usize,
    /// Upper bound on the number of live workers
    pub max_servers: usize,
    /// Fork replacements when fewer than this many workers are waiting
    pub min_spare_servers: usize,
    /// Retire a worker when more than this many are waiting
    pub max_spare_servers: usize,
    /// Requests a worker serves before it exits and is replaced (0 = unlimited)
    pub max_requests: usize,
    /// Upper bound on how long the broker blocks waiting for traffic
    /// before running housekeeping
    pub check_for_waiting: Duration,
    /// How long a graceful shutdown waits for in-flight requests
    pub shutdown_grace: Duration,
    /// Run as this user after binding (name, not uid)
    pub user: Option<String>,
    /// Run as this group after binding
    pub group: Option<String>,
    /// Endpoint of the worker status channel
    pub status_endpoint: String,
}

impl PoolConfig {
    /// Create a configuration for the given frontend/backend ports with
    /// default pool sizing.
    pub fn new(frontend_port: u16, backend_port: u16) -> Self {
        let status_endpoint = format!(
            "ipc://{}/corsair-status-{}.ipc",
            std::env::temp_dir().display(),
            std::process::id()
        );
        Self {
            frontend_port,
            backend_port,
            min_servers: DEFAULT_MIN_SERVERS,
            max_servers: DEFAULT_MAX_SERVERS,
            min_spare_servers: DEFAULT_MIN_SPARE_SERVERS,
            max_spare_servers: DEFAULT_MAX_SPARE_SERVERS,
            max_requests: 0,
            check_for_waiting: DEFAULT_CHECK_FOR_WAITING,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            user: None,
            group: None,
            status_endpoint,
        }
    }

    /// Set the minimum worker count.
    pub fn with_min_servers(mut self, n: usize) -> Self {
        self.min_servers = n;
        self
    }

    /// Set the maximum worker count.
    pub fn with_max_servers(mut self, n: usize) -> Self {
        self.max_servers = n;
        self
    }

    /// Set the minimum spare (waiting) worker count.
    pub fn with_min_spare_servers(mut self, n: usize) -> Self {
        self.min_spare_servers = n;
        self
    }

    /// Set the maximum spare (waiting) worker count.
    pub fn with_max_spare_servers(mut self, n: usize) -> Self {
        self.max_spare_servers = n;
        self
    }

    /// Set the per-worker request budget (0 = unlimited).
    pub fn with_max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the housekeeping poll interval.
    pub fn with_check_for_waiting(mut self, interval: Duration) -> Self {
        self.check_for_waiting = interval;
        self
    }

    /// Set the shutdown drain grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Run workers and broker as this user after binding.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Run workers and broker as this group after binding.
    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    /// Override the status channel endpoint.
    pub fn with_status_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.status_endpoint = endpoint.into();
        self
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns `CorsairError::Config` when ports are missing or equal, or
    /// when the pool bounds are inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.frontend_port == 0 || self.backend_port == 0 {
            return Err(CorsairError::config("ports must be positive"));
        }
        if self.frontend_port == self.backend_port {
            return Err(CorsairError::config(
                "frontend and backend ports must be distinct",
            ));
        }
        if self.min_servers == 0 {
            return Err(CorsairError::config("at least one server is required"));
        }
        if self.max_servers < self.min_servers {
            return Err(CorsairError::config(format!(
                "max_servers ({}) must be >= min_servers ({})",
                self.max_servers, self.min_servers
            )));
        }
        if self.max_spare_servers < self.min_spare_servers {
            return Err(CorsairError::config(format!(
                "max_spare_servers ({}) must be >= min_spare_servers ({})",
                self.max_spare_servers, self.min_spare_servers
            )));
        }
        if self.check_for_waiting.is_zero() {
            return Err(CorsairError::config(
                "check_for_waiting must be non-zero",
            ));
        }
        Ok(())
    }

    /// Bind endpoint for the client-facing ROUTER.
    #[must_use]
    pub fn frontend_endpoint(&self) -> String {
        format!("tcp://*:{}", self.frontend_port)
    }

    /// Bind endpoint for the worker-facing ROUTER.
    #[must_use]
    pub fn backend_endpoint(&self) -> String {
        format!("tcp://*:{}", self.backend_port)
    }

    /// Endpoint workers connect their REQ socket to.
    #[must_use]
    pub fn worker_connect_endpoint(&self) -> String {
        format!("tcp://localhost:{}", self.backend_port)
    }
}
