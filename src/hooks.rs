//! Pre-init and post-init hook execution.
//!
//! A hook directory is a flat list of executables. Every entry that is not a
//! directory is run to completion, one at a time, in name order. A hook may
//! rely on side effects of the hooks before it, so they never overlap. Hooks
//! have no deadline: a hook that never exits stalls the lifecycle.

use crate::env::load_environment_or_inherited;
use crate::error::{Error, Result};
use crate::process::{ExitStatus, Reaper};
use std::fs::File;
use std::io::Read;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// How a hook file is turned into a process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HookLauncher {
    /// Execute the hook itself; it needs the executable bit and a shebang
    #[default]
    Direct,
    /// Run the hook as `<shell> -c <path>`
    Shell { shell: PathBuf },
}

impl HookLauncher {
    /// Build the command that runs `hook`.
    pub fn command(&self, hook: &Path) -> Command {
        match self {
            HookLauncher::Direct => Command::new(hook),
            HookLauncher::Shell { shell } => {
                let mut cmd = Command::new(shell);
                cmd.arg("-c").arg(hook);
                cmd
            }
        }
    }
}

/// What happened when a hook ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Exited with status 0
    Succeeded { output: String },
    /// Exited with a non-zero status or was killed
    Failed { status: ExitStatus, output: String },
    /// Could not be started or waited on
    Errored { error: String },
}

impl HookOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HookOutcome::Succeeded { .. })
    }
}

/// Result of one hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    /// Path of the hook
    pub path: PathBuf,
    /// How it ended
    pub outcome: HookOutcome,
}

/// Runs every hook in a directory.
#[derive(Debug, Clone)]
pub struct HookRunner {
    launcher: HookLauncher,
    env_file: Option<PathBuf>,
    reaper: Reaper,
}

impl HookRunner {
    pub fn new(
        launcher: HookLauncher,
        env_file: Option<PathBuf>,
        reaper: Reaper,
    ) -> Self {
        Self {
            launcher,
            env_file,
            reaper,
        }
    }

    /// Run all hooks in `dir`, sequentially.
    ///
    /// Only a failure to list the directory is returned as an error. Each
    /// hook's own failure is logged and recorded in its report; later hooks
    /// still run.
    pub fn run_directory(&self, dir: &Path) -> Result<Vec<HookReport>> {
        let hooks = list_hooks(dir)?;
        let mut reports = Vec::with_capacity(hooks.len());

        for path in hooks {
            let outcome = self.run_hook(&path);

            match &outcome {
                HookOutcome::Succeeded { output } => {
                    info!(cmd = %path.display(), env = ?self.env_file, output = %output, "Hook finished");
                }
                HookOutcome::Failed { status, output } => {
                    warn!(cmd = %path.display(), env = ?self.env_file, status = %status, output = %output, "Hook failed");
                }
                HookOutcome::Errored { error } => {
                    warn!(cmd = %path.display(), env = ?self.env_file, error = %error, "Hook could not run");
                }
            }

            reports.push(HookReport { path, outcome });
        }

        Ok(reports)
    }

    /// Run one hook and capture its combined stdout and stderr.
    fn run_hook(&self, path: &Path) -> HookOutcome {
        let env = load_environment_or_inherited(self.env_file.as_deref());

        let mut cmd = self.launcher.command(path);
        env.apply(&mut cmd);
        cmd.stdin(Stdio::null());

        let (mut reader, writer) = match create_pipe() {
            Ok(pipe) => pipe,
            Err(e) => return HookOutcome::Errored { error: e.to_string() },
        };
        let writer_err = match writer.try_clone() {
            Ok(w) => w,
            Err(e) => return HookOutcome::Errored { error: e.to_string() },
        };
        cmd.stdout(Stdio::from(writer));
        cmd.stderr(Stdio::from(writer_err));

        let spawned = self.reaper.registry().spawn(&mut cmd);
        // The command holds our copies of the write end; drop them so the
        // read below sees EOF once the hook exits.
        drop(cmd);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return HookOutcome::Errored { error: e.to_string() },
        };
        let pid = child.id();
        debug!(cmd = %path.display(), pid = pid, "Spawned hook");

        let mut raw = Vec::new();
        if let Err(e) = reader.read_to_end(&mut raw) {
            warn!(cmd = %path.display(), error = %e, "Failed to read hook output");
        }
        let waited = child.wait();
        self.reaper.release(pid);

        let output = String::from_utf8_lossy(&raw).into_owned();
        match waited {
            Ok(status) if status.success() => HookOutcome::Succeeded { output },
            Ok(status) => HookOutcome::Failed {
                status: ExitStatus::from_std(pid, status),
                output,
            },
            Err(e) => HookOutcome::Errored { error: e.to_string() },
        }
    }
}

/// List the hooks of a directory in name order, skipping subdirectories.
pub fn list_hooks(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::HookDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut hooks = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            hooks.push(entry.path());
        }
    }

    hooks.sort();
    Ok(hooks)
}

/// Create a close-on-exec pipe pair.
fn create_pipe() -> Result<(File, File)> {
    let mut fds = [0i32; 2];
    // SAFETY: fds has room for the two descriptors pipe2 writes.
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    if result == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    // SAFETY: both descriptors were just created and are owned by nothing else.
    let read_end = unsafe { File::from_raw_fd(fds[0]) };
    let write_end = unsafe { File::from_raw_fd(fds[1]) };

    Ok((read_end, write_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_direct_launcher() {
        let cmd = HookLauncher::Direct.command(Path::new("/etc/preinit.d/10-setup"));
        assert_eq!(cmd.get_program(), OsStr::new("/etc/preinit.d/10-setup"));
        assert_eq!(cmd.get_args().count(), 0);
    }

    #[test]
    fn test_shell_launcher() {
        let launcher = HookLauncher::Shell {
            shell: PathBuf::from("/bin/sh"),
        };
        let cmd = launcher.command(Path::new("/etc/postinit.d/hook"));
        assert_eq!(cmd.get_program(), OsStr::new("/bin/sh"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args, vec![OsStr::new("-c"), OsStr::new("/etc/postinit.d/hook")]);
    }

    #[test]
    fn test_list_hooks_sorted_without_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-b"), "").unwrap();
        std::fs::write(dir.path().join("10-a"), "").unwrap();
        std::fs::create_dir(dir.path().join("15-subdir")).unwrap();

        let hooks = list_hooks(dir.path()).unwrap();
        assert_eq!(
            hooks,
            vec![dir.path().join("10-a"), dir.path().join("20-b")]
        );
    }

    #[test]
    fn test_list_missing_dir() {
        let result = list_hooks(Path::new("/nonexistent/cradle/hooks"));
        assert!(matches!(result, Err(Error::HookDir { .. })));
    }
}
