//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or through a `CRADLE_*` environment
//! variable; flags win. The parsed [`Cli`] is turned into an immutable
//! [`SupervisorConfig`] once at start-up.

use crate::hooks::HookLauncher;
use clap::builder::FalseyValueParser;
use clap::Parser;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Default directory of pre-init hooks.
pub const DEFAULT_PREINIT_DIR: &str = "/etc/preinit.d";
/// Default directory of post-init hooks.
pub const DEFAULT_POSTINIT_DIR: &str = "/etc/postinit.d";
/// Default env file.
pub const DEFAULT_ENV_FILE: &str = "/etc/env";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cradle",
    about = "Minimal PID 1 supervisor - runs one command, forwards signals, reaps zombies",
    version
)]
pub struct Cli {
    /// Do not execute preinit scripts
    #[arg(long, env = "CRADLE_SKIP_PREINIT", value_parser = FalseyValueParser::new())]
    pub skip_preinit: bool,

    /// Path to preinit scripts
    #[arg(long, visible_alias = "preinit", env = "CRADLE_PREINIT_DIR", default_value = DEFAULT_PREINIT_DIR)]
    pub preinit_dir: PathBuf,

    /// Do not execute postinit scripts
    #[arg(long, env = "CRADLE_SKIP_POSTINIT", value_parser = FalseyValueParser::new())]
    pub skip_postinit: bool,

    /// Path to postinit scripts
    #[arg(long, visible_alias = "postinit", env = "CRADLE_POSTINIT_DIR", default_value = DEFAULT_POSTINIT_DIR)]
    pub postinit_dir: PathBuf,

    /// Do not load additional env from a file
    #[arg(long, env = "CRADLE_SKIP_ENV", value_parser = FalseyValueParser::new())]
    pub skip_env: bool,

    /// Path to the additional env file
    #[arg(long, visible_alias = "env", env = "CRADLE_ENV_FILE", default_value = DEFAULT_ENV_FILE)]
    pub env_file: PathBuf,

    /// Verbosity level (trace, debug, info, warning, error)
    #[arg(short, long, visible_alias = "verbose", env = "CRADLE_LOG_LEVEL", default_value = "warning")]
    pub log_level: String,

    /// Run hooks through this shell (`<shell> -c <hook>`) instead of executing them directly
    #[arg(long, env = "CRADLE_HOOK_SHELL")]
    pub hook_shell: Option<PathBuf>,

    /// Main command and its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Freeze the parsed options into a supervisor configuration.
    pub fn into_config(self) -> SupervisorConfig {
        let hook_launcher = match self.hook_shell {
            Some(shell) => HookLauncher::Shell { shell },
            None => HookLauncher::Direct,
        };

        SupervisorConfig {
            skip_preinit: self.skip_preinit,
            preinit_dir: self.preinit_dir,
            skip_postinit: self.skip_postinit,
            postinit_dir: self.postinit_dir,
            skip_env: self.skip_env,
            env_file: self.env_file,
            hook_launcher,
            command: self.command,
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Skip the pre-init hook directory
    pub skip_preinit: bool,
    /// Pre-init hook directory
    pub preinit_dir: PathBuf,
    /// Skip the post-init hook directory
    pub skip_postinit: bool,
    /// Post-init hook directory
    pub postinit_dir: PathBuf,
    /// Only pass the inherited environment on
    pub skip_env: bool,
    /// Env file appended to the inherited environment
    pub env_file: PathBuf,
    /// How hooks are executed
    pub hook_launcher: HookLauncher,
    /// Main command followed by its arguments
    pub command: Vec<String>,
}

impl SupervisorConfig {
    /// Env file to use, or `None` when env loading is skipped.
    pub fn effective_env_file(&self) -> Option<PathBuf> {
        if self.skip_env {
            None
        } else {
            Some(self.env_file.clone())
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            skip_preinit: false,
            preinit_dir: PathBuf::from(DEFAULT_PREINIT_DIR),
            skip_postinit: false,
            postinit_dir: PathBuf::from(DEFAULT_POSTINIT_DIR),
            skip_env: false,
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            hook_launcher: HookLauncher::Direct,
            command: Vec::new(),
        }
    }
}

/// Parse a log level name. Unknown names fall back to `warn`.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "fatal" | "panic" => LevelFilter::ERROR,
        _ => LevelFilter::WARN,
    }
}
