//! corsair core
//!
//! A preforking job server on a ZeroMQ substrate. One supervisor process
//! runs a single-threaded broker loop that owns two ROUTER sockets: clients
//! connect to the frontend port, worker processes to the backend port. The
//! broker keeps a FIFO of idle workers and pairs each request with the
//! worker idle the longest (the "simple pirate" pattern); the supervisor
//! forks workers to keep the pool inside its configured bounds and reacts
//! to the usual pool signals (TERM/QUIT to stop, HUP to restart children,
//! TTIN/TTOU to resize).
//!
//! Building blocks:
//! - Messaging port over libzmq (`port`)
//! - Multipart frame envelopes (`envelope`)
//! - Idle-worker FIFO (`queue`)
//! - Child table + tally (`children`)
//! - Signal dispatch (`signals`)
//! - Preforking supervisor (`supervisor`)
//! - Broker dispatch loop (`broker`)
//! - Worker runtime + application callback (`worker`)
//! - Assembly (`server`)

pub mod broker;
pub mod children;
pub mod config;
pub mod envelope;
pub mod error;
pub mod port;
pub mod process;
pub mod queue;
pub mod signals;
pub mod supervisor;
pub mod worker;

mod server;

pub use config::PoolConfig;
pub use error::{CorsairError, Result};
pub use port::READY_SENTINEL;
pub use server::Server;
pub use worker::{echo, App, AppError, AppResult, FailurePolicy};
