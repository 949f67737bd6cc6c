use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use prefork_http::handler::Application;
use prefork_http::protocol::ConnectionInfo;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::listener::Listener;

use super::budget::RequestBudget;
use super::graceful::{GracefulExitState, TermAction};
use super::oob::OobCollector;

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Terminated while idle, or right after the in-flight request completed.
    Signaled,
    /// Served its request budget.
    BudgetExhausted,
    /// A second termination arrived while a request was in flight.
    Forced,
}

/// Where termination requests come from.
#[derive(Debug)]
pub enum Termination {
    /// SIGTERM and SIGHUP, both meaning "drain and stop".
    Signals { term: Signal, hup: Signal },
    Channel(mpsc::UnboundedReceiver<()>),
}

/// Sends termination requests to a [`Termination::Channel`].
#[derive(Debug, Clone)]
pub struct TerminationHandle(mpsc::UnboundedSender<()>);

impl TerminationHandle {
    /// Returns false once the worker loop has gone away.
    pub fn terminate(&self) -> bool {
        self.0.send(()).is_ok()
    }
}

impl Termination {
    /// Must be called from inside a tokio runtime.
    pub fn from_signals() -> io::Result<Self> {
        Ok(Termination::Signals { term: signal(SignalKind::terminate())?, hup: signal(SignalKind::hangup())? })
    }

    pub fn channel() -> (TerminationHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TerminationHandle(tx), Termination::Channel(rx))
    }

    /// Resolves on the next termination request; never resolves once the source is gone.
    async fn recv(&mut self) {
        match self {
            Termination::Signals { term, hup } => {
                tokio::select! {
                    Some(()) = term.recv() => {}
                    Some(()) = hup.recv() => {}
                    else => futures::future::pending().await,
                }
            }
            Termination::Channel(rx) => {
                if rx.recv().await.is_none() {
                    futures::future::pending::<()>().await;
                }
            }
        }
    }
}

/// Accepts and serves connections one at a time until the worker should exit.
pub struct WorkerLoop<A> {
    listener: Listener,
    app: Arc<A>,
    info: ConnectionInfo,
    timeout: Duration,
    budget: RequestBudget,
    graceful: GracefulExitState,
    oob: Option<OobCollector>,
    rng: StdRng,
}

impl<A> fmt::Debug for WorkerLoop<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("listener", &self.listener)
            .field("info", &self.info)
            .field("timeout", &self.timeout)
            .field("budget", &self.budget)
            .field("graceful", &self.graceful)
            .field("oob", &self.oob)
            .finish_non_exhaustive()
    }
}

impl<A> WorkerLoop<A>
where
    A: Application,
{
    pub fn new(listener: Listener, app: Arc<A>, config: &ServerConfig, info: ConnectionInfo) -> Self {
        Self::with_rng(listener, app, config, info, StdRng::from_entropy())
    }

    /// Like [`WorkerLoop::new`], drawing the request budget and collection intervals from `rng`.
    pub fn with_rng(
        listener: Listener,
        app: Arc<A>,
        config: &ServerConfig,
        info: ConnectionInfo,
        mut rng: StdRng,
    ) -> Self {
        let budget = RequestBudget::draw(config.min_request_per_child, config.max_request_per_child, &mut rng);
        let oob = config.oobgc.then(|| {
            let action = config.oob_hook.as_ref().map_or_else(OobCollector::default_action, Arc::clone);
            OobCollector::new(config.min_gc_per_request, config.max_gc_per_request, action, &mut rng)
        });

        Self {
            listener,
            app,
            info,
            timeout: config.timeout(),
            budget,
            graceful: GracefulExitState::new(),
            oob,
            rng,
        }
    }

    pub fn budget(&self) -> RequestBudget {
        self.budget
    }

    pub async fn run(mut self, mut termination: Termination) -> WorkerExit {
        let pid = std::process::id();
        info!(pid, budget = self.budget.limit(), "worker started");

        let exit = self.serve_until_exit(&mut termination).await;

        info!(pid, served = self.budget.served(), reason = ?exit, "worker exiting");
        exit
    }

    async fn serve_until_exit(&mut self, termination: &mut Termination) -> WorkerExit {
        loop {
            if self.budget.is_exhausted() {
                return WorkerExit::BudgetExhausted;
            }
            self.graceful.enter_idle();

            let accepted = tokio::select! {
                biased;
                () = termination.recv() => match self.graceful.on_terminate() {
                    TermAction::ExitNow => return WorkerExit::Signaled,
                    TermAction::Defer => continue,
                },
                accepted = timeout(self.timeout, self.listener.accept()) => accepted,
            };

            let (stream, remote) = match accepted {
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    warn!(cause = %e, "accept failed");
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };
            self.graceful.enter_request();
            self.budget.record();

            let info = self.info.clone().with_remote(remote);
            let serve = stream.serve(self.app.as_ref(), info, self.timeout);
            tokio::pin!(serve);

            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut serve => break result,
                    () = termination.recv() => {
                        if self.graceful.on_terminate() == TermAction::ExitNow {
                            warn!("terminated twice, abandoning the in-flight request");
                            return WorkerExit::Forced;
                        }
                        debug!("termination deferred until the response is written");
                    }
                }
            };

            match result {
                Ok(()) => trace!(served = self.budget.served(), "connection done"),
                Err(e) if e.is_timeout() => debug!(cause = %e, "connection timed out"),
                Err(e) => debug!(cause = %e, "connection aborted"),
            }

            if let Some(oob) = &mut self.oob {
                oob.after_request(&mut self.rng);
            }

            if self.graceful.exit_requested() {
                return WorkerExit::Signaled;
            }
        }
    }
}
