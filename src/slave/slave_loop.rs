//! slave_loop.rs
//! Blocking consumer: one `Ack` per `Data`, until the `Exit` sentinel.
//! - no pacing on this side; throughput is bounded by the master's pacing
//! - the workload is re-read for every message, so controller-side changes apply immediately

use crossbeam::channel::{Receiver, Sender};
use log::{debug, info};

use crate::shared::{
    busy_work,
    channel::{MASTER_TO_SLAVE, SLAVE_TO_MASTER},
    error::ChannelClosedError,
    wire::{Ack, Message},
    workload::{Role, WorkloadStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveReport {
    pub processed: u64,
}

pub struct SlaveLoop {
    rx: Receiver<Message>,
    acks: Sender<Ack>,
    store: WorkloadStore,
}

impl SlaveLoop {
    pub fn new(rx: Receiver<Message>, acks: Sender<Ack>, store: WorkloadStore) -> Self {
        Self { rx, acks, store }
    }

    /// Consume until `Exit`. A channel that closes without the sentinel is an error.
    pub fn run(self) -> Result<SlaveReport, ChannelClosedError> {
        let mut processed = 0u64;
        loop {
            match self.rx.recv() {
                Ok(Message::Exit) => {
                    info!("[Slave] EXIT received after {} message(s)", processed);
                    return Ok(SlaveReport { processed });
                }
                Ok(Message::Data { sequence }) => {
                    let iterations = self.store.get(Role::Slave);
                    busy_work::run(Role::Slave, iterations);

                    let ack = Ack { sequence };
                    self.acks
                        .send(ack)
                        .map_err(|_| ChannelClosedError(SLAVE_TO_MASTER))?;
                    debug!("[Slave] Slave -> Master: {}", ack);
                    processed += 1;
                }
                Err(_) => return Err(ChannelClosedError(MASTER_TO_SLAVE)),
            }
        }
    }
}
