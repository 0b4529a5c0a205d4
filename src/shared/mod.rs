// Shared by both roles: placement, workload parameters, busy work, wire format, channels.
//Nothing in here knows which process it runs in.

pub mod affinity;
pub mod busy_work;
pub mod channel;
pub mod error;
pub mod wire;
pub mod workload;
