use std::io;
use std::sync::Arc;

use prefork_http::handler::Application;
use tracing::{error, info};

use crate::ServerError;
use crate::config::ServerConfig;
use crate::listener::ListenerHandle;
use crate::supervisor::{ForkControl, Supervisor, unblock_termination};
use crate::worker::{Termination, WorkerExit, WorkerLoop};

/// A prefork server: one listener, `max_workers` forked workers, one supervisor.
#[derive(Debug)]
pub struct Server<A> {
    config: ServerConfig,
    app: Arc<A>,
}

impl<A> Server<A>
where
    A: Application,
{
    pub fn new(config: ServerConfig, app: A) -> Self {
        Self { config, app: Arc::new(app) }
    }

    /// Sets up the listener, then supervises workers until terminated.
    ///
    /// Returns only after every worker has been reaped. Fails before any
    /// worker is spawned when the configuration or the listener is unusable.
    pub fn run(self) -> Result<(), ServerError> {
        self.config.validate()?;
        let listener = ListenerHandle::setup(&self.config)?;

        let result = self.supervise(&listener);
        listener.cleanup();
        result
    }

    fn supervise(&self, listener: &ListenerHandle) -> Result<(), ServerError> {
        let control = ForkControl::new(self.config.before_fork.clone(), || run_worker(listener, &self.app, &self.config))?;
        Supervisor::new(control, &self.config).run()
    }
}

/// Body of a forked worker process; returns the process exit code.
///
/// Expects SIGTERM and SIGHUP blocked on entry, as [`ForkControl`] leaves them,
/// and unblocks them once the worker's own handlers exist.
pub fn run_worker<A>(listener: &ListenerHandle, app: &Arc<A>, config: &ServerConfig) -> i32
where
    A: Application,
{
    if let Some(hook) = &config.after_fork {
        hook();
    }
    ignore_sigpipe();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(cause = %ServerError::Runtime(e), "worker failed to start");
            return 1;
        }
    };

    let result: io::Result<WorkerExit> = runtime.block_on(async {
        let accept = listener.to_listener()?;
        let termination = Termination::from_signals()?;
        unblock_termination()?;
        let worker = WorkerLoop::new(accept, Arc::clone(app), config, listener.connection_info());
        Ok(worker.run(termination).await)
    });

    match result {
        Ok(exit) => {
            info!(pid = std::process::id(), reason = ?exit, "worker done");
            0
        }
        Err(e) => {
            error!(cause = %ServerError::Runtime(e), "worker failed to start");
            1
        }
    }
}

fn ignore_sigpipe() {
    // SAFETY: the worker is still single-threaded; a write to a vanished peer then fails with EPIPE instead.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
