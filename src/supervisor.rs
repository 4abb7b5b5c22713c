//! Main process lifecycle.
//!
//! `Init -> PreInitRunning -> MainStarting -> PostInitRunning -> Waiting -> Exited`
//!
//! Failing to spawn the main process is the only fatal error; everything
//! else (hook directories, env files, individual hooks) is logged and the
//! lifecycle moves on.

use crate::config::SupervisorConfig;
use crate::env::{load_environment_or_inherited, EnvironmentSet};
use crate::error::{Error, Result};
use crate::hooks::HookRunner;
use crate::process::{ChildRegistry, ExitStatus, Reaper};
use crate::signals::{ProcessDispatch, SignalRouter};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lifecycle states of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    PreInitRunning,
    MainStarting,
    PostInitRunning,
    Waiting,
    Exited,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::PreInitRunning => "preinit",
            LifecycleState::MainStarting => "starting",
            LifecycleState::PostInitRunning => "postinit",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Exited => "exited",
        };
        write!(f, "{}", name)
    }
}

/// How a supervisor run ended.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Exit status of the main process, if the wait succeeded
    pub status: Option<ExitStatus>,
    /// Error returned by the wait, if it failed
    pub wait_error: Option<String>,
    /// Number of hooks executed across both hook phases
    pub hooks_run: usize,
    /// States visited, in order
    pub states: Vec<LifecycleState>,
    /// Children collected by the final reap sweep
    pub reaped: Vec<ExitStatus>,
}

impl Outcome {
    /// Exit code for the supervisor process itself.
    pub fn exit_code(&self) -> i32 {
        if self.wait_error.is_some() {
            1
        } else {
            0
        }
    }
}

/// The supervised main process.
#[derive(Debug)]
pub struct MainProcess {
    pid: u32,
    child: Child,
}

impl MainProcess {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block (on a blocking thread) until the main process exits.
    pub async fn wait(self) -> std::result::Result<ExitStatus, String> {
        let Self { pid, mut child } = self;
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => Ok(ExitStatus::from_std(pid, status)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Runs the main process from start to exit.
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Arc<ChildRegistry>,
    reaper: Reaper,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let registry = Arc::new(ChildRegistry::new());
        let reaper = Reaper::new(Arc::clone(&registry));

        Self {
            config,
            registry,
            reaper,
        }
    }

    /// Run the whole lifecycle. Must be called within a tokio runtime.
    ///
    /// Returns an error only for the fatal cases: no command, or the main
    /// process failed to spawn.
    pub async fn run(&self) -> Result<Outcome> {
        let mut states = vec![LifecycleState::Init];

        let (program, args) = match self.config.command.split_first() {
            Some(parts) => parts,
            None => {
                error!("No command passed to run");
                return Err(Error::NoCommand);
            }
        };

        let hooks = HookRunner::new(
            self.config.hook_launcher.clone(),
            self.config.effective_env_file(),
            self.reaper.clone(),
        );
        let mut hooks_run = 0;

        if !self.config.skip_preinit {
            states.push(LifecycleState::PreInitRunning);
            info!("Running PreInit");
            hooks_run += run_hooks(&hooks, "RunPreInit", &self.config.preinit_dir).await;
        }

        states.push(LifecycleState::MainStarting);
        let env = match self.config.effective_env_file() {
            Some(path) => load_environment_or_inherited(Some(path.as_path())),
            None => EnvironmentSet::inherited(),
        };

        let router = match SignalRouter::register() {
            Ok(router) => Some(router),
            Err(e) => {
                warn!(error = %e, "Signals will not be forwarded");
                None
            }
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        env.apply(&mut cmd);

        let child = self.registry.spawn(&mut cmd).map_err(|source| {
            error!(cmd = %program, error = %source, "Failed to start main command");
            Error::SpawnFailed {
                command: program.clone(),
                source,
            }
        })?;
        let main = MainProcess::new(child);
        let pid = main.pid();
        info!(cmd = %program, args = ?args, env_vars = env.len(), pid = pid, "Started main command");

        let router = router.map(|r| r.spawn(ProcessDispatch::new(pid, self.reaper.clone())));
        // Collect anything that exited before the router was listening.
        self.reaper.reap_all();

        if !self.config.skip_postinit {
            states.push(LifecycleState::PostInitRunning);
            info!("Running PostInit");
            hooks_run += run_hooks(&hooks, "RunPostInit", &self.config.postinit_dir).await;
        }

        states.push(LifecycleState::Waiting);
        let waited = main.wait().await;

        states.push(LifecycleState::Exited);
        let reaped = self.reaper.release(pid);
        if let Some(router) = router {
            router.stop();
        }

        let (status, wait_error) = match waited {
            Ok(status) => {
                if status.success() {
                    info!(pid = pid, status = %status, "Main command exited");
                } else {
                    warn!(pid = pid, status = %status, "Main command exited");
                }
                (Some(status), None)
            }
            Err(e) => {
                error!(pid = pid, error = %e, "Failed to wait for main command");
                (None, Some(e))
            }
        };

        Ok(Outcome {
            status,
            wait_error,
            hooks_run,
            states,
            reaped,
        })
    }
}

/// Run a hook directory on a blocking thread. Returns the number of hooks
/// executed; directory errors are logged and count as zero.
async fn run_hooks(hooks: &HookRunner, task: &'static str, dir: &Path) -> usize {
    let runner = hooks.clone();
    let dir: PathBuf = dir.to_path_buf();
    let listed = dir.clone();

    match tokio::task::spawn_blocking(move || runner.run_directory(&listed)).await {
        Ok(Ok(reports)) => reports.len(),
        Ok(Err(e)) => {
            warn!(task = task, dir = %dir.display(), error = %e, "Hook directory skipped");
            0
        }
        Err(e) => {
            error!(task = task, dir = %dir.display(), error = %e, "Hook task panicked");
            0
        }
    }
}
