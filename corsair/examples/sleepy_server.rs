//! Server with a deliberately slow application callback.
//!
//! Demonstrates the embedder API: each request is uppercased after a
//! configurable delay, so there is always a window where a worker is
//! provably mid-request. The payload `crash` aborts the worker process
//! outright, which shows the supervisor replacing a dead worker.
//!
//! ```text
//! cargo run --example sleepy_server -- 6660 6661 1000
//! ```

use std::sync::Arc;
use std::time::Duration;

use corsair_core::{PoolConfig, Server};
use tracing_subscriber::EnvFilter;

fn main() {
    let mut args = std::env::args().skip(1);
    let frontend: u16 = args.next().and_then(|a| a.parse().ok()).unwrap_or(6660);
    let backend: u16 = args.next().and_then(|a| a.parse().ok()).unwrap_or(6661);
    let delay = Duration::from_millis(args.next().and_then(|a| a.parse().ok()).unwrap_or(500));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PoolConfig::new(frontend, backend)
        .with_min_servers(1)
        .with_max_servers(2)
        .with_min_spare_servers(1)
        .with_max_spare_servers(2)
        .with_check_for_waiting(Duration::from_millis(100));

    let server = Server::new(config).with_app(Arc::new(move |payload| {
        if payload == &b"crash"[..] {
            std::process::abort();
        }
        std::thread::sleep(delay);
        Ok(payload.to_ascii_uppercase())
    }));

    if let Err(e) = server.run() {
        eprintln!("server error: {e}");
        std::process::exit(e.exit_code());
    }
}
