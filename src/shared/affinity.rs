//! Best-effort core pinning for the two roles.
//!
//! `bind` pins the calling thread; threads spawned afterwards inherit the mask, so the slave
//! binds its main thread before starting any bridge threads and the whole process follows.
//! Failure is never fatal: callers log it and keep running on the OS default mask.

use core_affinity::{CoreId, get_core_ids, set_for_current};
use log::{info, warn};

use crate::shared::{
    error::{AffinityError, InsufficientCoresError},
    workload::Role,
};

pub const REQUIRED_CORES: usize = 2;

/// Successful pin of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreBinding {
    pub role: Role,
    pub core: usize,
}

/// Fails fast when the host cannot give each role its own core.
pub fn check_host() -> Result<usize, InsufficientCoresError> {
    ensure_cores(num_cpus::get())
}

pub fn ensure_cores(available: usize) -> Result<usize, InsufficientCoresError> {
    if available < REQUIRED_CORES {
        return Err(InsufficientCoresError {
            available,
            required: REQUIRED_CORES,
        });
    }
    Ok(available)
}

/// Restrict the calling thread (and its future children) to logical core `core`.
pub fn bind(role: Role, core: usize) -> Result<CoreBinding, AffinityError> {
    let cores: Vec<CoreId> = get_core_ids().ok_or(AffinityError::Unsupported)?;
    let core_id = cores
        .iter()
        .copied()
        .find(|c| c.id == core)
        .ok_or(AffinityError::InvalidCore {
            core,
            available: cores.len(),
        })?;

    if !set_for_current(core_id) {
        return Err(AffinityError::Rejected { role, core });
    }
    Ok(CoreBinding { role, core })
}

/// [`bind`], logging the outcome. `None` means the role runs unpinned.
pub fn bind_or_warn(role: Role, core: usize) -> Option<CoreBinding> {
    match bind(role, core) {
        Ok(binding) => {
            info!("[Affinity] {} pinned to core {}", role, core);
            Some(binding)
        }
        Err(e) => {
            warn!("[Affinity] {} continues unpinned: {}", role, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn single_core_host_is_rejected() {
        let err = ensure_cores(1).unwrap_err();
        assert_eq!(err.available, 1);
        assert_eq!(err.required, 2);
        assert_eq!(ensure_cores(2), Ok(2));
        assert_eq!(ensure_cores(16), Ok(16));
    }

    #[test]
    fn nonexistent_core_is_an_affinity_error() {
        // Separate thread so a successful pin elsewhere never leaks into the test harness.
        let result = thread::spawn(|| bind(Role::Slave, 100_000)).join().unwrap();
        match result {
            Err(AffinityError::InvalidCore { core, .. }) => assert_eq!(core, 100_000),
            Err(AffinityError::Unsupported) => {}
            other => panic!("unexpected bind result: {:?}", other),
        }
    }

    #[test]
    fn rebinding_the_same_core_is_harmless() {
        let outcome = thread::spawn(|| {
            let first = bind(Role::Master, 0);
            let second = bind(Role::Master, 0);
            (first, second)
        })
        .join()
        .unwrap();
        assert_eq!(outcome.0, outcome.1);
    }

    #[test]
    fn bind_or_warn_swallows_failures() {
        let binding = thread::spawn(|| bind_or_warn(Role::Master, 100_000)).join().unwrap();
        assert!(binding.is_none());
    }
}
