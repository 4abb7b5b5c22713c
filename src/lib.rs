//! cradle - a minimal PID 1 supervisor for containers.
//!
//! cradle runs as the first process of a PID namespace and supervises a
//! single main command:
//!
//! - Runs pre-init hooks, starts the main command, runs post-init hooks
//! - Forwards SIGINT, SIGTERM, SIGQUIT and SIGHUP to the main command
//! - Reaps every orphaned child on SIGCHLD
//! - Exits once the main command has exited
//!
//! The main command is never restarted.
//!
//! # Example
//!
//! ```no_run
//! use cradle::{Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SupervisorConfig {
//!         command: vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()],
//!         ..Default::default()
//!     };
//!     let outcome = Supervisor::new(config).run().await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod hooks;
pub mod process;
pub mod signals;
pub mod supervisor;

pub use config::{parse_log_level, Cli, SupervisorConfig};
pub use env::{load_environment, EnvironmentSet};
pub use error::{Error, Result};
pub use hooks::{HookLauncher, HookOutcome, HookReport, HookRunner};
pub use process::{ChildRegistry, ExitStatus, ReapOutcome, Reaper};
pub use signals::{Dispatch, ForwardedSignal, ProcessDispatch, RouterHandle, SignalRouter};
pub use supervisor::{LifecycleState, MainProcess, Outcome, Supervisor};
