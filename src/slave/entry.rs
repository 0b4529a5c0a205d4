//! Slave process entry point.
//!
//! Pins the process, opens the controller's workload mapping, bridges stdin/stdout to channels
//! and runs the slave loop on the main thread. Stdout carries protocol lines only; logs go to
//! stderr.

use std::{
    io::{self, BufReader},
    path::PathBuf,
};

use crossbeam::channel::unbounded;
use log::{info, warn};

use crate::{
    shared::{
        affinity,
        channel::{self, MASTER_TO_SLAVE, SLAVE_TO_MASTER},
        error::SessionError,
        wire::Message,
        workload::{Role, WorkloadStore},
    },
    slave::slave_loop::{SlaveLoop, SlaveReport},
};

#[derive(Debug, Clone)]
pub struct SlaveArgs {
    pub workload: PathBuf,
    pub core: usize,
}

pub fn run(args: &SlaveArgs) -> Result<SlaveReport, SessionError> {
    // Pin before any thread exists so the bridges inherit the mask.
    affinity::bind_or_warn(Role::Slave, args.core);
    let store = WorkloadStore::open_shared(&args.workload)?;
    info!(
        "[Slave] started (pid {}), workload={}",
        std::process::id(),
        store.get(Role::Slave)
    );

    let (msg_tx, msg_rx) = unbounded();
    let (ack_tx, ack_rx) = unbounded();

    // The reader is never joined: it stays blocked on stdin until the controller closes it.
    let _reader = channel::spawn_reader(
        MASTER_TO_SLAVE,
        BufReader::new(io::stdin()),
        msg_tx,
        |msg: Message| msg,
    )?;
    let writer = channel::spawn_writer(SLAVE_TO_MASTER, ack_rx, io::stdout())?;

    let result = SlaveLoop::new(msg_rx, ack_tx, store).run();

    // The loop dropped its ack sender; wait until every ack is flushed to stdout.
    if let Err(e) = channel::join_bridge(writer, SLAVE_TO_MASTER) {
        warn!("[Slave] ack writer ended with: {}", e);
    }
    Ok(result?)
}
