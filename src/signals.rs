//! Signal routing for PID 1.
//!
//! Inside a PID namespace the kernel gives init no default signal
//! disposition, so termination requests must be passed on to the main
//! process explicitly or it can never be stopped. SIGCHLD is turned into a
//! reap sweep instead.

use crate::error::{Error, Result};
use crate::process::Reaper;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as listen, Signal as SignalStream, SignalKind};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the queue between signal delivery and dispatch.
pub const SIGNAL_QUEUE_CAPACITY: usize = 1024;

/// Signals the supervisor listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedSignal {
    /// SIGCHLD
    Child,
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
    /// SIGQUIT
    Quit,
}

impl ForwardedSignal {
    pub fn as_signal(self) -> Signal {
        match self {
            ForwardedSignal::Child => Signal::SIGCHLD,
            ForwardedSignal::Interrupt => Signal::SIGINT,
            ForwardedSignal::Terminate => Signal::SIGTERM,
            ForwardedSignal::Hangup => Signal::SIGHUP,
            ForwardedSignal::Quit => Signal::SIGQUIT,
        }
    }
}

/// Where routed signals end up.
pub trait Dispatch: Send + 'static {
    /// Deliver `signal` to the main process.
    fn forward(&self, signal: Signal);

    /// Collect terminated children.
    fn reap(&self);
}

/// Dispatch to a real main process and the zombie reaper.
#[derive(Debug, Clone)]
pub struct ProcessDispatch {
    pid: Pid,
    reaper: Reaper,
}

impl ProcessDispatch {
    pub fn new(pid: u32, reaper: Reaper) -> Self {
        Self {
            pid: Pid::from_raw(pid as i32),
            reaper,
        }
    }
}

impl Dispatch for ProcessDispatch {
    fn forward(&self, sig: Signal) {
        match signal::kill(self.pid, sig) {
            Ok(()) => debug!(pid = self.pid.as_raw(), signal = ?sig, "Forwarded signal"),
            Err(e) => {
                warn!(pid = self.pid.as_raw(), signal = ?sig, error = %e, "Failed to forward signal")
            }
        }
    }

    fn reap(&self) {
        self.reaper.reap_all();
    }
}

/// Route one signal according to the supervisor's policy.
pub fn route<D: Dispatch + ?Sized>(dispatch: &D, sig: ForwardedSignal) {
    match sig {
        ForwardedSignal::Child => dispatch.reap(),
        ForwardedSignal::Hangup => dispatch.forward(Signal::SIGHUP),
        ForwardedSignal::Interrupt | ForwardedSignal::Terminate | ForwardedSignal::Quit => {
            dispatch.forward(sig.as_signal())
        }
    }
}

/// Registered signal listeners, not yet dispatching.
///
/// Create it before spawning the main process: signals that arrive between
/// registration and [`SignalRouter::spawn`] are held and delivered once the
/// router runs.
pub struct SignalRouter {
    sigchld: SignalStream,
    sigint: SignalStream,
    sigterm: SignalStream,
    sighup: SignalStream,
    sigquit: SignalStream,
}

impl SignalRouter {
    /// Install listeners. Must be called from within a tokio runtime.
    pub fn register() -> Result<Self> {
        let install = |kind: SignalKind, name: &str| {
            listen(kind).map_err(|e| Error::Signal(format!("{}: {}", name, e)))
        };

        Ok(Self {
            sigchld: install(SignalKind::child(), "SIGCHLD")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigquit: install(SignalKind::quit(), "SIGQUIT")?,
        })
    }

    /// Wait for the next signal. Returns `None` once the runtime's signal
    /// driver has gone away.
    async fn recv(&mut self) -> Option<ForwardedSignal> {
        tokio::select! {
            Some(()) = self.sigchld.recv() => Some(ForwardedSignal::Child),
            Some(()) = self.sigint.recv() => Some(ForwardedSignal::Interrupt),
            Some(()) = self.sigterm.recv() => Some(ForwardedSignal::Terminate),
            Some(()) = self.sighup.recv() => Some(ForwardedSignal::Hangup),
            Some(()) = self.sigquit.recv() => Some(ForwardedSignal::Quit),
            else => None,
        }
    }

    /// Start routing signals to `dispatch` in the background.
    pub fn spawn<D: Dispatch>(mut self, dispatch: D) -> RouterHandle {
        let (tx, mut rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);

        let listener = tokio::spawn(async move {
            while let Some(sig) = self.recv().await {
                match tx.try_send(sig) {
                    Ok(()) => {}
                    Err(TrySendError::Full(sig)) => {
                        warn!(signal = ?sig, "Signal queue full, dropping signal");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });

        let consumer = tokio::spawn(async move {
            while let Some(sig) = rx.recv().await {
                debug!(signal = ?sig, "Routing signal");
                route(&dispatch, sig);
            }
        });

        RouterHandle { listener, consumer }
    }
}

/// Background tasks of a running router.
pub struct RouterHandle {
    listener: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl RouterHandle {
    /// Stop routing. Signals still queued are discarded.
    pub fn stop(self) {
        self.listener.abort();
        self.consumer.abort();
    }
}
