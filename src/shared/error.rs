//! Error taxonomy shared by both roles.
//!
//! Fatal errors (`InsufficientCores`, `ProcessSpawn`, `InvalidConfig`) abort `start()` and leave
//! the coordinator idle. `Affinity` and `ShutdownTimeout` are logged and execution continues.

use std::time::Duration;

use thiserror::Error;

use crate::shared::workload::Role;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("host reports {available} logical core(s), at least {required} are needed")]
pub struct InsufficientCoresError {
    pub available: usize,
    pub required: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AffinityError {
    #[error("core pinning is not supported on this platform")]
    Unsupported,

    #[error("core {core} does not exist ({available} core(s) visible)")]
    InvalidCore { core: usize, available: usize },

    #[error("operating system refused to pin {role} to core {core}")]
    Rejected { role: Role, core: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{role} workload {value} is outside [{min}, {max}]")]
pub struct ValidationError {
    pub role: Role,
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Error)]
#[error("failed to spawn slave process: {0}")]
pub struct ProcessSpawnError(#[from] pub std::io::Error);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0} channel closed before the exit sentinel")]
pub struct ChannelClosedError(pub &'static str);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("slave process did not exit within {0:?}")]
pub struct ShutdownTimeoutError(pub Duration);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed wire message: {0:?}")]
pub struct WireError(pub String);

/// Umbrella error for session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InsufficientCores(#[from] InsufficientCoresError),

    #[error(transparent)]
    ProcessSpawn(#[from] ProcessSpawnError),

    #[error(transparent)]
    ChannelClosed(#[from] ChannelClosedError),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
