//! Slave process handle: spawn, pipe bridging, bounded shutdown.
//!
//! The slave is the current binary (or a configured program) started with hidden `--slave`
//! flags. Its stdin carries master -> slave lines, its stdout slave -> master lines; stderr is
//! inherited so the child's log records land next to ours.

use std::{
    io::{self, BufReader, BufWriter},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender};
use log::{info, warn};

use crate::{
    config::SlaveCommand,
    shared::{
        channel::{self, MASTER_TO_SLAVE, SLAVE_TO_MASTER},
        error::{ProcessSpawnError, ShutdownTimeoutError},
        wire::{Ack, Message},
    },
};

const EXIT_POLL: Duration = Duration::from_millis(10);

/// How the slave process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveExit {
    pub status: ExitStatus,
    /// The grace period elapsed and the process was killed.
    pub forced: bool,
}

pub struct SlaveProcess {
    child: Child,
}

/// A running slave plus the two bridge threads feeding its pipes.
pub struct SlaveLink {
    pub process: SlaveProcess,
    pub writer: JoinHandle<io::Result<u64>>,
    pub reader: JoinHandle<io::Result<u64>>,
}

impl SlaveProcess {
    /// Start the slave and bridge `messages` into its stdin and its stdout into `acks`.
    /// Each ack is stamped with its arrival instant on the reader thread.
    pub fn spawn(
        command: &SlaveCommand,
        workload_path: &Path,
        core: usize,
        messages: Receiver<Message>,
        acks: Sender<(Ack, Instant)>,
    ) -> Result<SlaveLink, ProcessSpawnError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg("--slave")
            .arg("--workload")
            .arg(workload_path)
            .arg("--core")
            .arg(core.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        // Wrapped first so the child is reaped if any step below fails.
        let mut process = SlaveProcess { child };

        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                process.kill();
                return Err(ProcessSpawnError(io::Error::other("slave pipes unavailable")));
            }
        };

        let writer = match channel::spawn_writer(MASTER_TO_SLAVE, messages, BufWriter::new(stdin)) {
            Ok(handle) => handle,
            Err(e) => {
                process.kill();
                return Err(ProcessSpawnError(e));
            }
        };
        let reader = match channel::spawn_reader(
            SLAVE_TO_MASTER,
            BufReader::new(stdout),
            acks,
            |ack: Ack| (ack, Instant::now()),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                process.kill();
                return Err(ProcessSpawnError(e));
            }
        };

        info!("[Coordinator] slave process started (pid {})", process.id());
        Ok(SlaveLink {
            process,
            writer,
            reader,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `grace` for a voluntary exit.
    pub fn wait_timeout(&mut self, grace: Duration) -> io::Result<Result<ExitStatus, ShutdownTimeoutError>> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Ok(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Err(ShutdownTimeoutError(grace)));
            }
            thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }

    /// Wait for the slave to leave after `EXIT`; kill it once `grace` has elapsed.
    pub fn shutdown(&mut self, grace: Duration) -> io::Result<SlaveExit> {
        match self.wait_timeout(grace)? {
            Ok(status) => Ok(SlaveExit { status, forced: false }),
            Err(timeout) => {
                warn!("[Coordinator] {}; terminating pid {}", timeout, self.id());
                self.child.kill()?;
                let status = self.child.wait()?;
                Ok(SlaveExit { status, forced: true })
            }
        }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for SlaveProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            warn!("[Coordinator] slave pid {} still running on drop, killing", self.id());
            self.kill();
        }
    }
}
