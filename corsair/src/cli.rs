//! Command-line interface definitions using clap.

use std::time::Duration;

use clap::Parser;
use corsair_core::{CorsairError, PoolConfig};

/// corsair - preforking ZeroMQ job server
#[derive(Parser, Debug)]
#[command(name = "corsair")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Frontend and backend TCP ports.
    #[arg(long = "port", num_args = 2, value_names = ["FRONTEND", "BACKEND"], required = true)]
    pub port: Vec<u16>,

    /// Minimum number of worker processes.
    #[arg(long = "min_servers", default_value_t = 5)]
    pub min_servers: usize,

    /// Maximum number of worker processes.
    #[arg(long = "max_servers", default_value_t = 20)]
    pub max_servers: usize,

    /// Fork replacements when fewer than this many workers are idle.
    #[arg(long = "min_spare_servers", default_value_t = 2)]
    pub min_spare_servers: usize,

    /// Retire a worker when more than this many are idle.
    #[arg(long = "max_spare_servers", default_value_t = 10)]
    pub max_spare_servers: usize,

    /// Requests a worker serves before it is recycled (0 = unlimited).
    #[arg(long = "max_requests", default_value_t = 0)]
    pub max_requests: usize,

    /// Housekeeping poll interval in milliseconds.
    #[arg(long = "check_interval", default_value_t = 500)]
    pub check_interval: u64,

    /// Run as this user after binding.
    #[arg(long)]
    pub user: Option<String>,

    /// Run as this group after binding.
    #[arg(long)]
    pub group: Option<String>,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long = "log_level", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Turn the parsed arguments into a validated pool configuration.
    pub fn into_config(self) -> Result<PoolConfig, CorsairError> {
        let [frontend, backend] = self.port[..] else {
            return Err(CorsairError::config(
                "--port takes exactly two values: frontend and backend",
            ));
        };
        let config = PoolConfig::new(frontend, backend)
            .with_min_servers(self.min_servers)
            .with_max_servers(self.max_servers)
            .with_min_spare_servers(self.min_spare_servers)
            .with_max_spare_servers(self.max_spare_servers)
            .with_max_requests(self.max_requests)
            .with_check_for_waiting(Duration::from_millis(self.check_interval))
            .with_user(self.user)
            .with_group(self.group);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::parse_from(["corsair", "--port", "6660", "6661"]);
        assert_eq!(cli.port, vec![6660, 6661]);
        assert_eq!(cli.min_servers, 5);
        let config = cli.into_config().unwrap();
        assert_eq!(config.frontend_port, 6660);
        assert_eq!(config.backend_port, 6661);
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::parse_from([
            "corsair",
            "--port",
            "7000",
            "7001",
            "--min_servers",
            "2",
            "--max_servers",
            "4",
            "--min_spare_servers",
            "1",
            "--max_spare_servers",
            "3",
            "--max_requests",
            "50",
            "--check_interval",
            "100",
            "--log_level",
            "debug",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.min_servers, 2);
        assert_eq!(config.max_servers, 4);
        assert_eq!(config.max_requests, 50);
        assert_eq!(config.check_for_waiting, Duration::from_millis(100));
    }

    #[test]
    fn test_missing_port_is_an_error() {
        assert!(Cli::try_parse_from(["corsair"]).is_err());
    }

    #[test]
    fn test_equal_ports_rejected() {
        let cli = Cli::parse_from(["corsair", "--port", "6660", "6660"]);
        assert!(cli.into_config().is_err());
    }
}
