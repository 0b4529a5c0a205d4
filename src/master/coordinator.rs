//! coordinator.rs
//! Owns the session lifecycle on the controller side.
//!
//! - `start()` spawns the slave process, then the master loop on a dedicated worker thread
//! - loops never touch `SessionState`; they marshal events over channels and `poll()` applies
//!   them on the coordinator's own thread, then notifies observers
//! - `stop()` is callable from any thread (via `StopHandle`) and idempotent
//! - the worker reaps the slave (grace period, then kill) before reporting `Finished`, so a
//!   finished session has counted every ack that reached the controller

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    config::SessionConfig,
    master::{
        master_loop::{MasterEvent, MasterLoop, MasterReport, MasterState, Termination},
        slave_process::{SlaveExit, SlaveLink, SlaveProcess},
    },
    shared::{
        affinity,
        channel::{self, MASTER_TO_SLAVE, MessageOutbox, SLAVE_TO_MASTER},
        error::{ChannelClosedError, ProcessSpawnError, SessionError, ValidationError},
        wire::{Ack, Message},
        workload::{Role, WorkloadStore},
    },
    utils::metrics::{SessionMetrics, Stats},
};

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Live counters of the current session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub active: bool,
    pub start_time: Instant,
    pub started_at: DateTime<Local>,
    pub messages_sent: u64,
    pub acks_received: u64,
    pub master_state: MasterState,
}

impl SessionState {
    fn begin() -> Self {
        Self {
            active: true,
            start_time: Instant::now(),
            started_at: Local::now(),
            messages_sent: 0,
            acks_received: 0,
            master_state: MasterState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Session duration elapsed.
    Completed,
    /// Ended early by `stop()`.
    Stopped,
    /// A channel closed before the sentinel, or the slave failed.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub messages_sent: u64,
    pub acks_received: u64,
    /// Data messages whose ack never reached the controller.
    pub unacknowledged: u64,
    /// Acks that matched no send (duplicates or unknown sequences).
    pub unmatched_acks: u64,
    pub elapsed: Duration,
    pub rtt_us: Option<Stats>,
    /// The slave overstayed the grace period and was killed.
    pub slave_forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Started,
    Sent(Message),
    Acked(Ack),
    State(MasterState),
}

/// One observable change, with the counters as they stand after it.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub kind: UpdateKind,
    pub timestamp: DateTime<Local>,
    pub messages_sent: u64,
    pub acks_received: u64,
}

impl SessionUpdate {
    /// `HH:MM:SS.mmm` prefixed line for a scrolling log.
    pub fn log_line(&self) -> String {
        let ts = self.timestamp.format("%H:%M:%S%.3f");
        match &self.kind {
            UpdateKind::Started => format!("{} Starting communication...", ts),
            UpdateKind::Sent(msg) => format!("{} Master -> Slave: {}", ts, msg),
            UpdateKind::Acked(ack) => format!("{} Slave -> Master: {}", ts, ack),
            UpdateKind::State(state) => format!("{} Master state: {:?}", ts, state),
        }
    }
}

/// Subscription interface for a presentation layer.
pub trait SessionObserver {
    fn on_update(&mut self, _update: &SessionUpdate) {}
    fn on_complete(&mut self, _summary: &SessionSummary) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session is already running or stopping; nothing changed.
    AlreadyRunning,
}

/// Thread-safe handle that ends the current session early.
#[derive(Clone, Default)]
pub struct StopHandle {
    outbox: Arc<Mutex<Option<Arc<MessageOutbox>>>>,
}

impl StopHandle {
    /// Send `Exit` now. Returns `true` only for the call that actually sent it.
    pub fn stop(&self) -> bool {
        let outbox = self.outbox.lock().clone();
        let Some(outbox) = outbox else {
            return false;
        };
        match outbox.close_with_exit() {
            Ok(true) => {
                info!("[Coordinator] stop requested, EXIT sent");
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("[Coordinator] stop could not deliver EXIT: {}", e);
                false
            }
        }
    }

    fn attach(&self, outbox: Arc<MessageOutbox>) {
        *self.outbox.lock() = Some(outbox);
    }

    fn detach(&self) {
        self.outbox.lock().take();
    }
}

struct ActiveSession {
    state: SessionState,
    events: Receiver<MasterEvent>,
    acks: Receiver<(Ack, Instant)>,
    worker: Option<JoinHandle<()>>,
    metrics: SessionMetrics,
}

pub struct SessionCoordinator {
    config: SessionConfig,
    workload: WorkloadStore,
    control: StopHandle,
    observers: Vec<Box<dyn SessionObserver>>,
    active: Option<ActiveSession>,
    last_summary: Option<SessionSummary>,
}

impl SessionCoordinator {
    /// Validate the host and configuration and create the shared workload mapping.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let cores = affinity::check_host()?;
        debug!("[Coordinator] host reports {} logical cores", cores);

        let workload = WorkloadStore::create_shared(workload_path())?;
        if config.pin_controller {
            affinity::bind_or_warn(Role::Master, config.master_core);
        }

        Ok(Self {
            config,
            workload,
            control: StopHandle::default(),
            observers: Vec::new(),
            active: None,
            last_summary: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn workload(&self) -> &WorkloadStore {
        &self.workload
    }

    pub fn set_workload(&self, role: Role, value: u32) -> Result<(), ValidationError> {
        self.workload.set(role, value)?;
        debug!("[Coordinator] {} workload set to {}", role, value);
        Ok(())
    }

    pub fn subscribe(&mut self, observer: impl SessionObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.control.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.active.as_ref().map(|s| &s.state)
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    /// Begin a session. A second call while one is running is a no-op.
    pub fn start(&mut self) -> Result<StartOutcome, SessionError> {
        if self.active.is_some() {
            debug!("[Coordinator] start ignored, session already active");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let command = self
            .config
            .slave_command()
            .map_err(ProcessSpawnError)?;
        let workload_path = self
            .workload
            .shared_path()
            .map(PathBuf::from)
            .ok_or_else(|| SessionError::InvalidConfig("workload store is not shared".into()))?;

        let (msg_tx, msg_rx) = unbounded();
        let (ack_tx, ack_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let link = SlaveProcess::spawn(
            &command,
            &workload_path,
            self.config.slave_core,
            msg_rx,
            ack_tx,
        )?;

        let outbox = Arc::new(MessageOutbox::new(msg_tx));
        let master = MasterLoop::new(
            self.workload.clone(),
            outbox.clone(),
            event_tx.clone(),
            self.config.pacing_interval,
            self.config.session_duration,
        );
        let worker = SessionWorker {
            master,
            link,
            outbox: outbox.clone(),
            events: event_tx,
            grace: self.config.shutdown_grace,
            core: self.config.master_core,
        };
        // On failure the closure (and with it the slave link) is dropped, which kills the child.
        let handle = worker.spawn()?;

        self.control.attach(outbox);
        let session = ActiveSession {
            state: SessionState::begin(),
            events: event_rx,
            acks: ack_rx,
            worker: Some(handle),
            metrics: SessionMetrics::default(),
        };
        info!(
            "[Coordinator] Starting communication for {:?} (master={}, slave={})",
            self.config.session_duration,
            self.workload.get(Role::Master),
            self.workload.get(Role::Slave),
        );
        self.notify(&session.state, UpdateKind::Started);
        self.active = Some(session);
        Ok(StartOutcome::Started)
    }

    /// End the running session early. Safe to call repeatedly or with no session.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Apply pending loop events and acks. Returns the summary when the session just finished.
    pub fn poll(&mut self) -> Option<SessionSummary> {
        let mut session = self.active.take()?;

        let events: Vec<MasterEvent> = session.events.try_iter().collect();
        let mut finished = None;
        for event in events {
            match event {
                MasterEvent::State(state) => {
                    session.state.master_state = state;
                    self.notify(&session.state, UpdateKind::State(state));
                }
                MasterEvent::Sent { sequence, at } => self.on_message_sent(&mut session, sequence, at),
                MasterEvent::Finished {
                    outcome,
                    slave_forced,
                } => finished = Some((outcome, slave_forced)),
            }
        }
        // After `Finished` the reader bridge has been joined, so this drain is complete.
        let acks: Vec<(Ack, Instant)> = session.acks.try_iter().collect();
        for (ack, at) in acks {
            self.on_ack_received(&mut session, ack, at);
        }

        match finished {
            Some((outcome, slave_forced)) => Some(self.finish(session, outcome, slave_forced)),
            None => {
                self.active = Some(session);
                None
            }
        }
    }

    /// Block (polling) until the running session finishes.
    pub fn wait(&mut self) -> Option<SessionSummary> {
        loop {
            if let Some(summary) = self.poll() {
                return Some(summary);
            }
            if self.active.is_none() {
                return None;
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Stop any running session and wait for it to wind down.
    pub fn shutdown(&mut self) -> Option<SessionSummary> {
        self.stop();
        self.wait()
    }

    /// Invoked for every `Data` the master loop reports as sent.
    fn on_message_sent(&mut self, session: &mut ActiveSession, sequence: u64, at: Instant) {
        session.state.messages_sent += 1;
        session.metrics.record_sent(sequence, at);
        self.notify(&session.state, UpdateKind::Sent(Message::Data { sequence }));
    }

    /// Invoked for every ack drained from the slave -> master channel.
    fn on_ack_received(&mut self, session: &mut ActiveSession, ack: Ack, at: Instant) {
        session.state.acks_received += 1;
        session.metrics.record_ack(ack.sequence, at);
        debug!("[Coordinator] Slave -> Master: {}", ack);
        self.notify(&session.state, UpdateKind::Acked(ack));
    }

    fn finish(
        &mut self,
        mut session: ActiveSession,
        outcome: SessionOutcome,
        slave_forced: bool,
    ) -> SessionSummary {
        if let Some(worker) = session.worker.take() {
            if worker.join().is_err() {
                error!("[Coordinator] master worker panicked");
            }
        }
        self.control.detach();
        session.state.active = false;

        let summary = SessionSummary {
            outcome,
            messages_sent: session.state.messages_sent,
            acks_received: session.state.acks_received,
            unacknowledged: session.metrics.unacknowledged(),
            unmatched_acks: session.metrics.unmatched(),
            elapsed: session.state.start_time.elapsed(),
            rtt_us: session.metrics.rtt_stats(),
            slave_forced,
        };

        match &summary.outcome {
            SessionOutcome::Failed(reason) => error!("[Coordinator] session failed: {}", reason),
            outcome => info!(
                "[Coordinator] session {:?} after {:.1}s: sent={} acked={} unacknowledged={}",
                outcome,
                summary.elapsed.as_secs_f64(),
                summary.messages_sent,
                summary.acks_received,
                summary.unacknowledged,
            ),
        }
        if summary.unmatched_acks > 0 {
            warn!("[Coordinator] {} ack(s) matched no sent message", summary.unmatched_acks);
        }

        for observer in self.observers.iter_mut() {
            observer.on_complete(&summary);
        }
        self.last_summary = Some(summary.clone());
        summary
    }

    fn notify(&mut self, state: &SessionState, kind: UpdateKind) {
        if self.observers.is_empty() {
            return;
        }
        let update = SessionUpdate {
            kind,
            timestamp: Local::now(),
            messages_sent: state.messages_sent,
            acks_received: state.acks_received,
        };
        for observer in self.observers.iter_mut() {
            observer.on_update(&update);
        }
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if self.active.is_some() {
            info!("[Coordinator] dropping with an active session, shutting it down");
            self.shutdown();
        }
    }
}

fn workload_path() -> PathBuf {
    let n = STORE_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "core_pinned_session-{}-{}.workload",
        std::process::id(),
        n
    ))
}

/// Everything the master worker thread owns for one session.
struct SessionWorker {
    master: MasterLoop,
    link: SlaveLink,
    outbox: Arc<MessageOutbox>,
    events: Sender<MasterEvent>,
    grace: Duration,
    core: usize,
}

impl SessionWorker {
    /// Run on a dedicated `master-loop` thread. Failing to start it counts as a spawn failure.
    fn spawn(self) -> Result<JoinHandle<()>, ProcessSpawnError> {
        thread::Builder::new()
            .name("master-loop".into())
            .spawn(move || self.run())
            .map_err(ProcessSpawnError)
    }

    fn run(self) {
        let SessionWorker {
            master,
            link,
            outbox,
            events,
            grace,
            core,
        } = self;
        let SlaveLink {
            mut process,
            writer,
            reader,
        } = link;

        affinity::bind_or_warn(Role::Master, core);
        let report = master.run();
        if report.is_err() {
            // Make sure the writer sees the end of the channel whatever state the outbox is in.
            let _ = outbox.close_with_exit();
        }
        drop(outbox);

        // Grace runs from the moment `Exit` is queued. A slave that stopped reading can leave
        // the writer blocked on a full pipe; the kill breaks that pipe, so join the writer after.
        let exit = process.shutdown(grace);
        if let Err(e) = channel::join_bridge(writer, MASTER_TO_SLAVE) {
            warn!("[Master] writer bridge ended with: {}", e);
        }
        if let Err(e) = channel::join_bridge(reader, SLAVE_TO_MASTER) {
            warn!("[Master] reader bridge ended with: {}", e);
        }

        let slave_forced = matches!(exit, Ok(SlaveExit { forced: true, .. }));
        let outcome = outcome_of(report, exit);
        let _ = events.send(MasterEvent::Finished {
            outcome,
            slave_forced,
        });
    }
}

fn outcome_of(
    report: Result<MasterReport, ChannelClosedError>,
    exit: std::io::Result<SlaveExit>,
) -> SessionOutcome {
    let report = match report {
        Ok(report) => report,
        Err(e) => return SessionOutcome::Failed(e.to_string()),
    };
    match exit {
        Err(e) => return SessionOutcome::Failed(format!("could not reap slave: {}", e)),
        Ok(exit) if !exit.forced && !exit.status.success() => {
            return SessionOutcome::Failed(format!("slave exited with {}", exit.status));
        }
        Ok(_) => {}
    }
    match report.termination {
        Termination::Expired => SessionOutcome::Completed,
        Termination::Stopped => SessionOutcome::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SlaveCommand, shared::workload::MIN_WORKLOAD};
    use std::{ffi::OsString, io, path::Path};

    fn shell(script: &str) -> SlaveCommand {
        SlaveCommand {
            program: "/bin/sh".into(),
            args: vec![OsString::from("-c"), OsString::from(script)],
        }
    }

    struct Harness {
        events: Receiver<MasterEvent>,
        acks: Receiver<(Ack, Instant)>,
        handle: JoinHandle<()>,
    }

    /// Run one worker against `slave`. `backlog` data lines are queued ahead of the loop's own.
    fn run_worker(slave: &SlaveCommand, backlog: u64, duration: Duration, grace: Duration) -> Harness {
        let store = WorkloadStore::new();
        store.set(Role::Master, MIN_WORKLOAD).unwrap();
        let (msg_tx, msg_rx) = unbounded();
        let (ack_tx, ack_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        for sequence in 0..backlog {
            msg_tx.send(Message::Data { sequence: 1_000_000 + sequence }).unwrap();
        }
        let link = SlaveProcess::spawn(slave, Path::new("/dev/null"), 1, msg_rx, ack_tx).unwrap();
        let outbox = Arc::new(MessageOutbox::new(msg_tx));
        let master = MasterLoop::new(
            store,
            outbox.clone(),
            event_tx.clone(),
            Duration::from_millis(5),
            duration,
        );
        let worker = SessionWorker {
            master,
            link,
            outbox,
            events: event_tx,
            grace,
            core: 0,
        };
        Harness {
            events: event_rx,
            acks: ack_rx,
            handle: worker.spawn().unwrap(),
        }
    }

    /// Returns the `Finished` payload and the number of `Sent` events seen before it.
    fn await_finished(events: &Receiver<MasterEvent>, limit: Duration) -> Option<(SessionOutcome, bool, u64)> {
        let deadline = Instant::now() + limit;
        let mut sent = 0;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match events.recv_timeout(left) {
                Ok(MasterEvent::Sent { .. }) => sent += 1,
                Ok(MasterEvent::Finished { outcome, slave_forced }) => {
                    return Some((outcome, slave_forced, sent));
                }
                Ok(MasterEvent::State(_)) => {}
                Err(_) => return None,
            }
        }
    }

    #[test]
    fn slave_with_a_full_stdin_pipe_is_still_killed_after_grace() {
        // ~250 KiB of lines, well past the pipe buffer, to a slave that never reads.
        let stubborn = shell("exec sleep 40");
        let started = Instant::now();
        let harness = run_worker(
            &stubborn,
            20_000,
            Duration::from_millis(50),
            Duration::from_millis(200),
        );

        let finished = await_finished(&harness.events, Duration::from_secs(10));
        let (outcome, slave_forced, _) = finished.expect("worker never reported Finished");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(slave_forced);
        assert_eq!(outcome, SessionOutcome::Completed);
        harness.handle.join().unwrap();
    }

    #[test]
    fn cooperative_slave_exits_within_grace_and_every_ack_is_in() {
        let echo = shell(
            "while read line; do case \"$line\" in EXIT) exit 0;; DATA_*) echo \"ACK_$line\";; esac; done",
        );
        let harness = run_worker(&echo, 0, Duration::from_millis(100), Duration::from_secs(5));

        let (outcome, slave_forced, sent) =
            await_finished(&harness.events, Duration::from_secs(10)).expect("no Finished");
        assert_eq!(outcome, SessionOutcome::Completed);
        assert!(!slave_forced);
        assert!(sent > 0);
        // Reader bridge was joined before Finished, so the ack channel is complete.
        let acked: Vec<u64> = harness.acks.try_iter().map(|(ack, _)| ack.sequence).collect();
        assert_eq!(acked, (0..sent).collect::<Vec<_>>());
        harness.handle.join().unwrap();
    }

    #[test]
    fn worker_thread_failure_surfaces_as_process_spawn() {
        let err: SessionError = ProcessSpawnError(io::Error::other("thread limit")).into();
        assert!(matches!(err, SessionError::ProcessSpawn(_)));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn outcome_reflects_termination_and_slave_exit() {
        use std::os::unix::process::ExitStatusExt;

        let report = |termination| MasterReport {
            messages_sent: 3,
            termination,
            elapsed: Duration::from_millis(10),
        };
        let exit = |code: i32, forced| SlaveExit {
            status: std::process::ExitStatus::from_raw(code << 8),
            forced,
        };

        assert_eq!(
            outcome_of(Ok(report(Termination::Expired)), Ok(exit(0, false))),
            SessionOutcome::Completed
        );
        assert_eq!(
            outcome_of(Ok(report(Termination::Stopped)), Ok(exit(0, false))),
            SessionOutcome::Stopped
        );
        // Killed after grace: flagged elsewhere, not a failure.
        assert_eq!(
            outcome_of(Ok(report(Termination::Expired)), Ok(exit(9, true))),
            SessionOutcome::Completed
        );
        assert!(matches!(
            outcome_of(Ok(report(Termination::Expired)), Ok(exit(3, false))),
            SessionOutcome::Failed(_)
        ));
        assert!(matches!(
            outcome_of(Err(ChannelClosedError(MASTER_TO_SLAVE)), Ok(exit(0, false))),
            SessionOutcome::Failed(_)
        ));
    }
}
