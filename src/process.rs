//! Child process bookkeeping and zombie reaping.
//!
//! As PID 1 the supervisor inherits every orphan in the namespace and is
//! the only process able to collect their exit status. Some children have
//! an owner that waits on them directly (the main process and the hook
//! currently running); those are tracked in a [`ChildRegistry`] and a
//! reap sweep leaves them alone so the owner still observes their status.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::fmt;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Exit status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process ID
    pub pid: u32,
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Build from a std exit status of a known child.
    pub fn from_std(pid: u32, status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            pid,
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "signal {}", sig),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Pids whose exit status belongs to a specific waiter.
///
/// Spawning and registering happen under the same lock a reap sweep takes,
/// so a child can never be reaped between its spawn and its registration.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    owned: Mutex<HashSet<u32>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.owned.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn a command and register the resulting pid.
    pub fn spawn(&self, cmd: &mut Command) -> std::io::Result<Child> {
        let mut owned = self.lock();
        let child = cmd.spawn()?;
        owned.insert(child.id());
        Ok(child)
    }

    /// Hand a pid back to the reaper once its owner has waited on it.
    pub fn release(&self, pid: u32) {
        self.lock().remove(&pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains(&pid)
    }
}

/// Result of a single non-blocking reap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// A terminated child was collected
    Reaped(ExitStatus),
    /// Children exist but none can be collected right now
    NoneAvailable,
    /// The supervisor has no children at all
    NoChildren,
}

/// Collects terminated children that nobody else is waiting on.
#[derive(Debug, Clone)]
pub struct Reaper {
    registry: Arc<ChildRegistry>,
}

impl Reaper {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChildRegistry> {
        &self.registry
    }

    /// Release an owned pid and sweep again.
    ///
    /// A sweep stops at the first exited child that has an owner, so zombies
    /// queued behind it are only reachable once the owner has waited.
    pub fn release(&self, pid: u32) -> Vec<ExitStatus> {
        self.registry.release(pid);
        self.reap_all()
    }

    /// Reap every child that has already terminated. Never blocks.
    pub fn reap_all(&self) -> Vec<ExitStatus> {
        let mut reaped = Vec::new();

        loop {
            match self.reap_one() {
                ReapOutcome::Reaped(status) => {
                    info!(pid = status.pid, status = %status, "Child reaped");
                    reaped.push(status);
                }
                ReapOutcome::NoneAvailable => break,
                ReapOutcome::NoChildren => {
                    debug!("No children left to reap");
                    break;
                }
            }
        }

        reaped
    }

    /// Attempt to collect one terminated child.
    ///
    /// The next exited child is peeked with `WNOWAIT` first; registered pids
    /// are left in place for their owner.
    pub fn reap_one(&self) -> ReapOutcome {
        let owned = self.registry.lock();

        let pid = match peek_exited() {
            Ok(Some(pid)) => pid,
            Ok(None) => return ReapOutcome::NoneAvailable,
            Err(Errno::ECHILD) => return ReapOutcome::NoChildren,
            Err(e) => {
                error!(error = %e, "Error peeking at exited children");
                return ReapOutcome::NoneAvailable;
            }
        };

        if owned.contains(&(pid.as_raw() as u32)) {
            debug!(pid = pid.as_raw(), "Exited child has an owner, leaving it");
            return ReapOutcome::NoneAvailable;
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => ReapOutcome::Reaped(ExitStatus {
                pid: pid.as_raw() as u32,
                code: Some(code),
                signal: None,
            }),
            Ok(WaitStatus::Signaled(pid, sig, _)) => ReapOutcome::Reaped(ExitStatus {
                pid: pid.as_raw() as u32,
                code: None,
                signal: Some(sig as i32),
            }),
            Ok(_) => ReapOutcome::NoneAvailable,
            Err(Errno::ECHILD) => ReapOutcome::NoChildren,
            Err(e) => {
                error!(pid = pid.as_raw(), error = %e, "Error reaping child");
                ReapOutcome::NoneAvailable
            }
        }
    }
}

/// Find an exited child without consuming its status.
fn peek_exited() -> std::result::Result<Option<Pid>, Errno> {
    loop {
        // SAFETY: a zeroed siginfo_t is valid and waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_ALL,
                0,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };

        if rc == -1 {
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e),
            }
        }

        // SAFETY: waitid succeeded, so si_pid is either 0 or a child pid.
        let pid = unsafe { info.si_pid() };
        return Ok(if pid == 0 {
            None
        } else {
            Some(Pid::from_raw(pid))
        });
    }
}
