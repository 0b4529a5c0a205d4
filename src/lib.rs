//! # Core-pinned master/slave session
//!
//! Two cooperating processes on distinct logical cores:
//! - **Master** (controller process): paces sequenced `DATA_<n>` messages from a worker thread,
//!   burning CPU proportional to its workload before every send.
//! - **Slave** (child process): burns CPU proportional to its own workload per message and
//!   answers each with `ACK_DATA_<n>`, until the `EXIT` sentinel.
//!
//! Workloads live in a shared, atomically accessed mapping so the controller can retune either
//! role mid-session. Sessions are bounded (60 s by default), can be stopped early from any
//! thread, and end with a bounded grace period before the slave is force-terminated.

pub mod config;
pub mod master;
pub mod shared;
pub mod slave;
pub mod utils;

pub use config::{SessionConfig, SlaveCommand};
pub use master::coordinator::{
    SessionCoordinator, SessionObserver, SessionOutcome, SessionSummary, SessionUpdate,
    StartOutcome, StopHandle, UpdateKind,
};
pub use shared::{
    error::SessionError,
    wire::{Ack, Message},
    workload::{Role, WorkloadStore},
};
