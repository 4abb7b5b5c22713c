//! cradle binary.
//!
//! Parses the configuration, sets up logging and hands over to the
//! supervisor. The process exit code comes from the supervisor outcome.

use anyhow::Context;
use clap::Parser;
use cradle::{parse_log_level, Cli, Supervisor, SupervisorConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::default().add_directive(parse_log_level(&cli.log_level).into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli.into_config()) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Supervisor failed");
            1
        }
    };

    std::process::exit(code);
}

/// Run the supervisor on a fresh runtime and return the exit code.
fn run(config: SupervisorConfig) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let outcome = runtime
        .block_on(Supervisor::new(config).run())
        .context("Main command could not be supervised")?;

    Ok(outcome.exit_code())
}
