use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::SigId;
use signal_hook::consts::{SIGHUP, SIGTERM, SIGUSR1};
use tracing::{debug, trace, warn};

use crate::ServerError;
use crate::config::Hook;

pub type Pid = libc::pid_t;

/// Slice length for polling signal flags and reaping children.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Operator requests delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// SIGTERM: drain and stop.
    Terminate,
    /// SIGHUP: same as terminate; an external restarter brings the server back.
    Reload,
    /// SIGUSR1: replace the workers one at a time.
    RollingRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signaled(i32),
}

impl ExitStatus {
    #[inline]
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    fn from_wait(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Code(libc::WEXITSTATUS(status))
        } else {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Signal(Control),
    Exited { pid: Pid, status: ExitStatus },
}

/// The supervisor's window onto processes, signals and time.
pub trait ProcessControl {
    /// Creates one worker and returns its pid.
    fn spawn(&mut self) -> Result<Pid, ServerError>;

    /// Asks a worker to stop gracefully.
    fn terminate(&mut self, pid: Pid) -> io::Result<()>;

    /// Waits up to `timeout` (forever when `None`) for the next event.
    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>, ServerError>;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Registration {
    flag: Arc<AtomicBool>,
    id: SigId,
    control: Control,
}

/// Workers as forked child processes.
///
/// Signals are latched into flags by `signal-hook` and polled together with
/// `waitpid(WNOHANG)`. SIGINT is left at its default disposition. Children
/// drop these registrations before running `worker`, so the parent's handlers
/// never fire inside a worker.
///
/// SIGTERM and SIGHUP are blocked across `fork`, and `worker` starts with them
/// still blocked. It must call [`unblock_termination`] once its own handlers
/// are installed; a signal sent in between stays pending until then.
pub struct ForkControl<F> {
    registrations: Vec<Registration>,
    before_fork: Option<Hook>,
    worker: F,
}

impl<F> fmt::Debug for ForkControl<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkControl")
            .field("signals", &self.registrations.iter().map(|r| r.control).collect::<Vec<_>>())
            .field("before_fork", &self.before_fork.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> ForkControl<F>
where
    F: FnMut() -> i32,
{
    /// `worker` runs in each child and returns its exit code.
    pub fn new(before_fork: Option<Hook>, worker: F) -> Result<Self, ServerError> {
        let mut registrations = Vec::with_capacity(3);
        // polled in this order, so a pending terminate wins over a restart
        for (signal, control) in [(SIGTERM, Control::Terminate), (SIGHUP, Control::Reload), (SIGUSR1, Control::RollingRestart)] {
            let flag = Arc::new(AtomicBool::new(false));
            let id = signal_hook::flag::register(signal, Arc::clone(&flag)).map_err(ServerError::Signal)?;
            registrations.push(Registration { flag, id, control });
        }
        Ok(Self { registrations, before_fork, worker })
    }

    fn unregister(&mut self) {
        for registration in self.registrations.drain(..) {
            signal_hook::low_level::unregister(registration.id);
        }
    }

    fn pending_signal(&self) -> Option<Control> {
        self.registrations.iter().find(|r| r.flag.swap(false, Ordering::SeqCst)).map(|r| r.control)
    }

    fn reap(&self) -> Option<Event> {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer; WNOHANG makes this non-blocking.
        let pid = unsafe { libc::waitpid(-1, &raw mut status, libc::WNOHANG) };
        if pid > 0 {
            return Some(Event::Exited { pid, status: ExitStatus::from_wait(status) });
        }
        if pid < 0 {
            trace!(cause = %io::Error::last_os_error(), "waitpid");
        }
        None
    }
}

impl<F> ProcessControl for ForkControl<F>
where
    F: FnMut() -> i32,
{
    fn spawn(&mut self) -> Result<Pid, ServerError> {
        if let Some(hook) = &self.before_fork {
            hook();
        }

        mask_termination(libc::SIG_BLOCK).map_err(ServerError::Signal)?;
        // SAFETY: the supervisor is single-threaded, so the child starts from a consistent copy.
        let pid = unsafe { libc::fork() };
        if pid == 0 {
            self.unregister();
            let code = (self.worker)();
            std::process::exit(code)
        }

        let fork_error = (pid < 0).then(io::Error::last_os_error);
        if let Err(e) = unblock_termination() {
            warn!(cause = %e, "failed to unblock termination signals");
        }
        match fork_error {
            Some(e) => Err(ServerError::Fork(e)),
            None => {
                debug!(pid, "worker spawned");
                Ok(pid)
            }
        }
    }

    fn terminate(&mut self, pid: Pid) -> io::Result<()> {
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>, ServerError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(control) = self.pending_signal() {
                return Ok(Some(Event::Signal(control)));
            }
            if let Some(event) = self.reap() {
                return Ok(Some(event));
            }

            let nap = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    left.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(nap);
        }
    }
}

/// Lets SIGTERM and SIGHUP through to the calling thread again.
///
/// A forked worker calls this after registering its own handlers; any
/// termination that arrived during startup is delivered right away.
pub fn unblock_termination() -> io::Result<()> {
    mask_termination(libc::SIG_UNBLOCK)
}

fn mask_termination(how: libc::c_int) -> io::Result<()> {
    // SAFETY: `set` is initialised by sigemptyset before use and outlives the call.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&raw mut set);
        libc::sigaddset(&raw mut set, libc::SIGTERM);
        libc::sigaddset(&raw mut set, libc::SIGHUP);
        libc::pthread_sigmask(how, &raw const set, std::ptr::null_mut())
    };
    if rc == 0 { Ok(()) } else { Err(io::Error::from_raw_os_error(rc)) }
}
