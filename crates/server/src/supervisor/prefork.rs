use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::ServerError;
use crate::config::ServerConfig;

use super::process::{Control, Event, ExitStatus, Pid, ProcessControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Fewer than the target number of workers are running.
    Spawning,
    Steady,
    /// Workers are being replaced one at a time.
    Reloading,
    /// Every worker was told to stop; waiting until all are reaped.
    Draining,
    Stopped,
}

/// Supervisor-side bookkeeping for one live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: Pid,
    pub spawned_at: Instant,
}

/// Keeps `max_workers` workers alive until told to stop.
///
/// Workers that exit on their own are replaced right away. Back-to-back
/// crashes delay the replacement by `err_respawn_interval`. A rolling
/// restart stops one worker at a time and spawns its replacement after
/// `spawn_interval`.
#[derive(Debug)]
pub struct Supervisor<P> {
    control: P,
    target: usize,
    spawn_interval: Duration,
    err_respawn_interval: Duration,
    state: State,
    workers: BTreeMap<Pid, WorkerRecord>,
    /// Workers that were asked to stop and have not been reaped yet.
    stopping: BTreeSet<Pid>,
    last_crash: Option<Instant>,
    /// No spawn happens before this instant.
    respawn_at: Option<Instant>,
    /// Workers still to be replaced by the rolling restart in progress.
    reload_queue: VecDeque<Pid>,
    reload_next_at: Option<Instant>,
}

impl<P> Supervisor<P>
where
    P: ProcessControl,
{
    pub fn new(control: P, config: &ServerConfig) -> Self {
        Self {
            control,
            target: config.max_workers,
            spawn_interval: config.spawn_interval(),
            err_respawn_interval: config.err_respawn_interval(),
            state: State::Spawning,
            workers: BTreeMap::new(),
            stopping: BTreeSet::new(),
            last_crash: None,
            respawn_at: None,
            reload_queue: VecDeque::new(),
            reload_next_at: None,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.workers.values()
    }

    pub fn control(&self) -> &P {
        &self.control
    }

    /// Workers that are not on their way out.
    fn active(&self) -> usize {
        self.workers.len() - self.stopping.len()
    }

    /// Supervises until every worker has been reaped after a terminate.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(workers = self.target, "supervisor started");
        while self.state != State::Stopped {
            self.step()?;
        }
        info!("all workers reaped, supervisor stopped");
        Ok(())
    }

    /// Performs due work, then waits for and handles at most one event.
    pub fn step(&mut self) -> Result<(), ServerError> {
        self.advance();
        if self.state == State::Stopped {
            return Ok(());
        }

        let timeout = self.next_wakeup().map(|at| at.saturating_duration_since(self.control.now()));
        if let Some(event) = self.control.next_event(timeout)? {
            self.handle(event);
        }
        Ok(())
    }

    fn advance(&mut self) {
        let now = self.control.now();
        match self.state {
            State::Stopped => {}
            State::Draining => {
                if self.workers.is_empty() {
                    self.state = State::Stopped;
                }
            }
            State::Reloading => {
                if self.reload_next_at.is_some_and(|at| now < at) {
                    return;
                }
                self.fill(now);
                if self.active() >= self.target {
                    self.replace_next(now);
                }
            }
            State::Spawning | State::Steady => {
                self.fill(now);
                self.state = if self.active() < self.target { State::Spawning } else { State::Steady };
            }
        }
    }

    /// Spawns workers up to the target, unless a respawn pause is in effect.
    fn fill(&mut self, now: Instant) {
        if self.respawn_at.is_some_and(|at| now < at) {
            return;
        }
        self.respawn_at = None;

        while self.active() < self.target {
            match self.control.spawn() {
                Ok(pid) => {
                    self.workers.insert(pid, WorkerRecord { pid, spawned_at: now });
                }
                Err(e) => {
                    error!(cause = %e, "spawn failed, retrying later");
                    self.respawn_at = Some(now + self.err_respawn_interval);
                    return;
                }
            }
        }
    }

    /// Stops the next worker of a rolling restart, or finishes the restart.
    fn replace_next(&mut self, now: Instant) {
        while let Some(pid) = self.reload_queue.pop_front() {
            if !self.workers.contains_key(&pid) || self.stopping.contains(&pid) {
                continue;
            }
            info!(pid, left = self.reload_queue.len(), "rolling restart: stopping worker");
            self.stop(pid);
            self.reload_next_at = Some(now + self.spawn_interval);
            return;
        }

        info!("rolling restart finished");
        self.reload_next_at = None;
        self.state = State::Steady;
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let (reload, respawn) = match self.state {
            State::Reloading => (self.reload_next_at, self.respawn_at),
            State::Spawning => (None, self.respawn_at),
            _ => return None,
        };
        let now = self.control.now();
        [reload, respawn].into_iter().flatten().filter(|at| *at > now).min()
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Signal(control) => self.on_control(control),
            Event::Exited { pid, status } => self.on_exit(pid, status),
        }
    }

    fn on_control(&mut self, control: Control) {
        match (control, self.state) {
            (_, State::Draining | State::Stopped) => debug!(?control, "already draining, ignored"),
            (Control::Terminate | Control::Reload, _) => {
                info!(?control, workers = self.workers.len(), "draining workers");
                self.reload_queue.clear();
                self.reload_next_at = None;
                let pids: Vec<Pid> = self.workers.keys().copied().collect();
                for pid in pids {
                    self.stop(pid);
                }
                self.state = State::Draining;
            }
            (Control::RollingRestart, State::Reloading) => debug!("rolling restart already in progress"),
            (Control::RollingRestart, _) => {
                info!(workers = self.workers.len(), interval = ?self.spawn_interval, "rolling restart");
                self.reload_queue = self.workers.keys().copied().filter(|pid| !self.stopping.contains(pid)).collect();
                self.reload_next_at = None;
                self.state = State::Reloading;
            }
        }
    }

    fn on_exit(&mut self, pid: Pid, status: ExitStatus) {
        let Some(record) = self.workers.remove(&pid) else {
            debug!(pid, %status, "reaped unknown child");
            return;
        };
        let requested = self.stopping.remove(&pid);
        let now = self.control.now();

        if requested || self.state == State::Draining {
            info!(pid, %status, "worker stopped");
        } else if status.success() {
            info!(pid, lived = ?now.saturating_duration_since(record.spawned_at), "worker retired");
        } else {
            warn!(pid, %status, "worker died unexpectedly");
            if self.last_crash.is_some_and(|at| now.saturating_duration_since(at) < self.err_respawn_interval) {
                warn!(pause = ?self.err_respawn_interval, "workers crashing rapidly, pausing respawn");
                self.respawn_at = Some(now + self.err_respawn_interval);
            }
            self.last_crash = Some(now);
        }

        if self.state == State::Steady {
            self.state = State::Spawning;
        }
    }

    fn stop(&mut self, pid: Pid) {
        if !self.stopping.insert(pid) {
            return;
        }
        if let Err(e) = self.control.terminate(pid) {
            warn!(pid, cause = %e, "failed to signal worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Scripted process control with a virtual clock.
    ///
    /// Each `next_event` call returns the next scripted event. Once the script
    /// runs dry it advances the clock by the requested timeout and returns
    /// nothing.
    #[derive(Debug)]
    struct FakeControl {
        base: Instant,
        elapsed: Duration,
        next_pid: Pid,
        script: VecDeque<Scripted>,
        spawned: Vec<(Pid, Duration)>,
        terminated: Vec<Pid>,
        fail_spawns: usize,
    }

    #[derive(Debug)]
    enum Scripted {
        Event(Event),
        /// Let this much virtual time pass with no event.
        Idle(Duration),
    }

    impl FakeControl {
        fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                base: Instant::now(),
                elapsed: Duration::ZERO,
                next_pid: 100,
                script: script.into_iter().collect(),
                spawned: Vec::new(),
                terminated: Vec::new(),
                fail_spawns: 0,
            }
        }

        fn spawned_pids(&self) -> Vec<Pid> {
            self.spawned.iter().map(|(pid, _)| *pid).collect()
        }
    }

    impl ProcessControl for FakeControl {
        fn spawn(&mut self) -> Result<Pid, ServerError> {
            if self.fail_spawns > 0 {
                self.fail_spawns -= 1;
                return Err(ServerError::Fork(io::Error::from_raw_os_error(libc::EAGAIN)));
            }
            let pid = self.next_pid;
            self.next_pid += 1;
            self.spawned.push((pid, self.elapsed));
            Ok(pid)
        }

        fn terminate(&mut self, pid: Pid) -> io::Result<()> {
            self.terminated.push(pid);
            Ok(())
        }

        fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>, ServerError> {
            match self.script.pop_front() {
                Some(Scripted::Event(event)) => Ok(Some(event)),
                Some(Scripted::Idle(span)) => {
                    self.elapsed += match timeout {
                        Some(timeout) => span.min(timeout),
                        None => span,
                    };
                    Ok(None)
                }
                None => {
                    self.elapsed += timeout.unwrap_or_default();
                    Ok(None)
                }
            }
        }

        fn now(&self) -> Instant {
            self.base + self.elapsed
        }
    }

    fn config(workers: usize) -> ServerConfig {
        ServerConfig { max_workers: workers, spawn_interval: Some(2.0), err_respawn_interval: Some(1.0), ..ServerConfig::default() }
    }

    fn exited(pid: Pid, code: i32) -> Scripted {
        Scripted::Event(Event::Exited { pid, status: ExitStatus::Code(code) })
    }

    fn signal(control: Control) -> Scripted {
        Scripted::Event(Event::Signal(control))
    }

    #[test]
    fn spawns_target_then_drains_on_terminate() {
        let script = [signal(Control::Terminate), exited(100, 0), exited(101, 0), exited(102, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(3));

        supervisor.step().unwrap();
        assert_eq!(supervisor.state(), State::Draining);
        assert_eq!(supervisor.control().spawned_pids(), [100, 101, 102]);
        assert_eq!(supervisor.control().terminated, [100, 101, 102]);

        supervisor.run().unwrap();
        assert_eq!(supervisor.state(), State::Stopped);
        assert_eq!(supervisor.workers().count(), 0);
        assert_eq!(supervisor.control().spawned.len(), 3);
    }

    #[test]
    fn hangup_is_treated_as_terminate() {
        let script = [signal(Control::Reload), exited(100, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(1));

        supervisor.run().unwrap();
        assert_eq!(supervisor.control().terminated, [100]);
        assert_eq!(supervisor.control().spawned.len(), 1);
    }

    #[test]
    fn retired_worker_is_replaced_immediately() {
        let script = [exited(100, 0), exited(101, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(2));

        supervisor.step().unwrap();
        assert_eq!(supervisor.state(), State::Spawning);
        supervisor.step().unwrap();
        supervisor.step().unwrap();

        assert_eq!(supervisor.state(), State::Steady);
        let spawned = &supervisor.control().spawned;
        assert_eq!(spawned.iter().map(|(pid, _)| *pid).collect::<Vec<_>>(), [100, 101, 102, 103]);
        assert!(spawned.iter().all(|(_, at)| at.is_zero()));
    }

    #[test]
    fn rapid_crashes_pause_respawn() {
        let script = [exited(100, 1), exited(101, 1)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(1));

        // first crash: replaced at once
        supervisor.step().unwrap();
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned[1], (101, Duration::ZERO));

        // second crash within err_respawn_interval: replacement waits a full interval
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned.len(), 2);
        supervisor.step().unwrap();
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned[2], (102, Duration::from_secs(1)));
        assert_eq!(supervisor.state(), State::Steady);
    }

    #[test]
    fn crashes_far_apart_are_not_throttled() {
        let script = [exited(100, 1), Scripted::Idle(Duration::from_secs(5)), exited(101, 1)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(1));

        for _ in 0..4 {
            supervisor.step().unwrap();
        }
        let spawned = &supervisor.control().spawned;
        assert_eq!(spawned.len(), 3);
        assert_eq!(spawned[2], (102, Duration::from_secs(5)));
    }

    #[test]
    fn failed_spawn_is_retried_after_interval() {
        let mut control = FakeControl::new([]);
        control.fail_spawns = 1;
        let mut supervisor = Supervisor::new(control, &config(1));

        supervisor.step().unwrap();
        assert!(supervisor.control().spawned.is_empty());
        assert_eq!(supervisor.state(), State::Spawning);

        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned, [(100, Duration::from_secs(1))]);
    }

    #[test]
    fn rolling_restart_replaces_one_worker_per_interval() {
        let script =
            [signal(Control::RollingRestart), exited(100, 0), Scripted::Idle(Duration::from_secs(2)), exited(101, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(2));

        supervisor.step().unwrap();
        assert_eq!(supervisor.state(), State::Reloading);

        // stops 100, which exits right away
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().terminated, [100]);
        assert_eq!(supervisor.control().spawned.len(), 2);

        // no replacement before spawn_interval has elapsed
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned.len(), 2);
        assert_eq!(supervisor.state(), State::Reloading);

        // at +2s: replacement for 100, then 101 is stopped
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned[2], (102, Duration::from_secs(2)));
        assert_eq!(supervisor.control().terminated, [100, 101]);

        // 101 exits, at +4s its replacement arrives and the restart completes
        supervisor.step().unwrap();
        supervisor.step().unwrap();
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned[3], (103, Duration::from_secs(4)));
        assert_eq!(supervisor.state(), State::Steady);
        assert_eq!(supervisor.workers().map(|w| w.pid).collect::<Vec<_>>(), [102, 103]);
    }

    #[test]
    fn terminate_during_rolling_restart_drains_everything() {
        let script = [signal(Control::RollingRestart), signal(Control::Terminate), exited(100, 0), exited(101, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(2));

        supervisor.run().unwrap();
        assert_eq!(supervisor.control().terminated, [100, 101]);
        assert_eq!(supervisor.control().spawned.len(), 2);
    }

    #[test]
    fn repeated_terminate_while_draining_is_ignored() {
        let script = [signal(Control::Terminate), signal(Control::Terminate), exited(100, 0)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(1));

        supervisor.run().unwrap();
        assert_eq!(supervisor.control().terminated, [100]);
    }

    #[test]
    fn unknown_child_is_ignored() {
        let script = [exited(999, 1)];
        let mut supervisor = Supervisor::new(FakeControl::new(script), &config(1));

        supervisor.step().unwrap();
        supervisor.step().unwrap();
        assert_eq!(supervisor.control().spawned.len(), 1);
        assert_eq!(supervisor.state(), State::Steady);
    }
}
