// Master role: controller-side session coordination.
// Spawns the slave process, paces data messages from a worker thread and accounts for acks.

pub mod coordinator;
pub mod master_loop;
pub mod slave_process;
