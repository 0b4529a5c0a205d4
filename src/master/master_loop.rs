//! master_loop.rs
//! Produces sequenced `Data` messages at a fixed pace for one bounded session.
//!
//! State machine: Idle -> Running -> Stopping -> Stopped
//! - Running: read master workload, burn CPU, send `DATA_<seq>`, pace, check elapsed time
//! - Stopping: entered on expiry or when `stop()` closed the outbox; exactly one `Exit` is sent
//! - Stopped: terminal; a new session builds a fresh loop
//!
//! The pacing wait doubles as the cancellation point: closing the outbox wakes it immediately.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam::channel::Sender;
use log::{debug, info};

use crate::{
    master::coordinator::SessionOutcome,
    shared::{
        busy_work,
        channel::{Delivery, MessageOutbox},
        error::ChannelClosedError,
        wire::Message,
        workload::{Role, WorkloadStore},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Session duration elapsed.
    Expired,
    /// Outbox closed by an explicit stop.
    Stopped,
}

/// Notifications marshalled from the worker thread to the coordinator.
#[derive(Debug, Clone)]
pub enum MasterEvent {
    State(MasterState),
    Sent { sequence: u64, at: Instant },
    /// Emitted by the session worker once the slave has been reaped; always last.
    Finished {
        outcome: SessionOutcome,
        slave_forced: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterReport {
    pub messages_sent: u64,
    pub termination: Termination,
    pub elapsed: Duration,
}

pub struct MasterLoop {
    store: WorkloadStore,
    outbox: Arc<MessageOutbox>,
    events: Sender<MasterEvent>,
    pacing: Duration,
    duration: Duration,
    state: MasterState,
}

impl MasterLoop {
    pub fn new(
        store: WorkloadStore,
        outbox: Arc<MessageOutbox>,
        events: Sender<MasterEvent>,
        pacing: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            store,
            outbox,
            events,
            pacing,
            duration,
            state: MasterState::Idle,
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    fn transition(&mut self, next: MasterState) {
        debug!("[Master] {:?} -> {:?}", self.state, next);
        self.state = next;
        let _ = self.events.send(MasterEvent::State(next));
    }

    /// Run the session to completion. Consumes the loop: `Stopped` is terminal.
    pub fn run(mut self) -> Result<MasterReport, ChannelClosedError> {
        let started = Instant::now();
        let mut sequence: u64 = 0;
        self.transition(MasterState::Running);

        let termination = loop {
            let iterations = self.store.get(Role::Master);
            busy_work::run(Role::Master, iterations);

            match self.outbox.send_data(sequence) {
                Ok(Delivery::Sent) => {
                    debug!("[Master] Master -> Slave: {}", Message::Data { sequence });
                    let _ = self.events.send(MasterEvent::Sent {
                        sequence,
                        at: Instant::now(),
                    });
                    sequence += 1;
                }
                Ok(Delivery::Closed) => break Termination::Stopped,
                Err(e) => {
                    self.transition(MasterState::Stopped);
                    return Err(e);
                }
            }

            if self.outbox.wait_closed(self.pacing) {
                break Termination::Stopped;
            }
            if started.elapsed() >= self.duration {
                break Termination::Expired;
            }
        };

        self.transition(MasterState::Stopping);
        match self.outbox.close_with_exit() {
            Ok(true) => info!("[Master] session expired after {} message(s), EXIT sent", sequence),
            Ok(false) => info!("[Master] stopped after {} message(s), EXIT already sent", sequence),
            Err(e) => {
                self.transition(MasterState::Stopped);
                return Err(e);
            }
        }
        self.transition(MasterState::Stopped);

        Ok(MasterReport {
            messages_sent: sequence,
            termination,
            elapsed: started.elapsed(),
        })
    }
}
