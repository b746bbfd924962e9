//! Server assembly.
//!
//! Wires the pieces together in startup order: validate, bind, drop
//! privileges, set the process title, install signal handlers, prefork,
//! then hand control to the broker loop until a shutdown signal lands.

use tracing::{debug, info};

use crate::broker::Broker;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::port::Transport;
use crate::process;
use crate::queue::IdleQueue;
use crate::signals;
use crate::supervisor::Supervisor;
use crate::worker::{App, FailurePolicy};

/// A configured-but-not-yet-running job server.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use corsair_core::{PoolConfig, Server};
///
/// let config = PoolConfig::new(6660, 6661).with_min_servers(2);
/// let server = Server::new(config)
///     .with_app(Arc::new(|payload| Ok(payload.to_ascii_uppercase())));
/// server.run()?;
/// # Ok::<(), corsair_core::CorsairError>(())
/// ```
pub struct Server {
    config: PoolConfig,
    app: App,
    policy: FailurePolicy,
}

impl Server {
    /// Create a server with the default echo application.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            app: crate::worker::echo(),
            policy: FailurePolicy::default(),
        }
    }

    /// Install the application callback. Must happen before `run`: workers
    /// inherit the callback across fork.
    #[must_use]
    pub fn with_app(mut self, app: App) -> Self {
        self.app = app;
        self
    }

    /// Choose what workers reply when the application fails.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run to completion. Returns once a shutdown signal has been handled
    /// and the pool is stopped.
    pub fn run(self) -> Result<()> {
        self.config.validate()?;

        let transport = Transport::new();
        let frontend = transport.router(&self.config.frontend_endpoint(), false)?;
        let backend = transport.router(&self.config.backend_endpoint(), true)?;
        let status = transport.status_pull(&self.config.status_endpoint)?;
        info!(
            frontend = %self.config.frontend_endpoint(),
            backend = %self.config.backend_endpoint(),
            "broker listening"
        );

        process::drop_privileges(self.config.user.as_deref(), self.config.group.as_deref())?;
        process::set_title(&format!(
            "zmq broker {}-{}",
            self.config.frontend_port, self.config.backend_port
        ));
        signals::install_supervisor_handlers()?;

        let status_endpoint = self.config.status_endpoint.clone();
        let mut supervisor = Supervisor::new(self.config, self.app, self.policy);
        supervisor.prefork()?;

        let mut broker = Broker::new(frontend, backend, status);
        let outcome = broker.run(&mut supervisor);

        // The loop is done; stop whatever workers remain, then tidy up the
        // status channel's filesystem endpoint.
        let mut leftovers = IdleQueue::new();
        supervisor.shutdown(&mut leftovers);
        if let Some(path) = status_endpoint.strip_prefix("ipc://") {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path, error = %e, "could not remove status endpoint");
            }
        }
        info!("shutdown complete");
        outcome
    }
}
