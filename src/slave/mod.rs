// Slave role: runs in its own process, consumes master messages and acknowledges each one.

pub mod entry;
pub mod slave_loop;
