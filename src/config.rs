//! Session configuration.
//!
//! Defaults reproduce the reference setup: 60 s sessions, a 50 ms pacing interval, a 1 s grace
//! period before the slave is force-terminated, master on core 0 and slave on core 1.

use std::{ffi::OsString, io, path::PathBuf, time::Duration};

use crate::shared::error::SessionError;

pub const SESSION_DURATION: Duration = Duration::from_secs(60);
pub const PACING_INTERVAL: Duration = Duration::from_millis(50);
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MASTER_CORE: usize = 0;
pub const SLAVE_CORE: usize = 1;

/// Program used to start the slave role. The coordinator appends the hidden `--slave` flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl SlaveCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-execute the running binary (supervisor/worker style).
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_duration: Duration,
    pub pacing_interval: Duration,
    pub shutdown_grace: Duration,
    pub poll_interval: Duration,
    pub master_core: usize,
    pub slave_core: usize,
    /// Pin the controller's own thread to `master_core` when the coordinator is created.
    pub pin_controller: bool,
    /// `None` re-executes the current binary.
    pub slave_command: Option<SlaveCommand>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration: SESSION_DURATION,
            pacing_interval: PACING_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
            poll_interval: POLL_INTERVAL,
            master_core: MASTER_CORE,
            slave_core: SLAVE_CORE,
            pin_controller: true,
            slave_command: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.master_core == self.slave_core {
            return Err(SessionError::InvalidConfig(format!(
                "master and slave must use distinct cores (both {})",
                self.master_core
            )));
        }
        if self.session_duration.is_zero() {
            return Err(SessionError::InvalidConfig("session duration is zero".into()));
        }
        if self.pacing_interval.is_zero() {
            return Err(SessionError::InvalidConfig("pacing interval is zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SessionError::InvalidConfig("poll interval is zero".into()));
        }
        Ok(())
    }

    pub fn slave_command(&self) -> io::Result<SlaveCommand> {
        match &self.slave_command {
            Some(cmd) => Ok(cmd.clone()),
            None => SlaveCommand::current_exe(),
        }
    }
}
