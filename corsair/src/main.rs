//! corsair - preforking ZeroMQ job server

mod cli;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use corsair_core::Server;

/// Initialize the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise the `--log_level` flag decides.
fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1, // bad arguments are a configuration error
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(&cli.log_level);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "refusing to start");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = Server::new(config).run() {
        error!(error = %e, "fatal");
        std::process::exit(e.exit_code());
    }
}
