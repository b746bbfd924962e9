//! Error types for corsair.

use std::io;
use thiserror::Error;

/// Main error type for corsair operations.
#[derive(Error, Debug)]
pub enum CorsairError {
    /// IO error during socket or pipe operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error reported by the messaging layer
    #[error("messaging error: {0}")]
    Messaging(#[from] zmq::Error),

    /// System call failure (fork, wait, kill, ...)
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// Invalid configuration, rejected before the server starts
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An endpoint could not be bound
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: zmq::Error,
    },

    /// Fork kept failing after bounded retries
    #[error("fork failed after {attempts} attempts: {source}")]
    Fork {
        attempts: u32,
        source: nix::errno::Errno,
    },

    /// User/group lookup or privilege drop failed
    #[error("privilege drop failed: {0}")]
    Privilege(String),
}

/// Result type alias for corsair operations.
pub type Result<T> = std::result::Result<T, CorsairError>;

impl CorsairError {
    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a privilege error with a message.
    pub fn privilege(msg: impl Into<String>) -> Self {
        Self::Privilege(msg.into())
    }

    /// Process exit code for this error.
    ///
    /// Configuration problems exit with 1, runtime fatals (bind, fork,
    /// transport setup) with 2. A clean shutdown never reaches this path.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Privilege(_) => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CorsairError::config("bad ports").exit_code(), 1);
        assert_eq!(CorsairError::privilege("no such user").exit_code(), 1);
        assert_eq!(
            CorsairError::Bind {
                endpoint: "tcp://*:1".into(),
                source: zmq::Error::EACCES,
            }
            .exit_code(),
            2
        );
        assert_eq!(
            CorsairError::Fork {
                attempts: 3,
                source: nix::errno::Errno::EAGAIN,
            }
            .exit_code(),
            2
        );
    }
}
