//! workload.rs
//! Synchronised per-role iteration counts read by each loop before every unit of work.
//!
//! - one `AtomicU32` per role: a read always observes a fully written value
//! - writes outside [`WorkloadRange`] are rejected, the stored value stays untouched
//! - the controller creates a file-backed shared mapping, the slave process opens it by path,
//!   so the slider-style setter in the controller is seen by the slave without any message

use std::{
    fmt,
    fs::{self, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use log::debug;

use crate::shared::error::ValidationError;

pub const MIN_WORKLOAD: u32 = 10_000;
pub const MAX_WORKLOAD: u32 = 1_500_000;
pub const DEFAULT_WORKLOAD: u32 = 100_000;

const ROLE_COUNT: usize = 2;
const REGION_BYTES: usize = ROLE_COUNT * std::mem::size_of::<AtomicU32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub const ALL: [Role; ROLE_COUNT] = [Role::Master, Role::Slave];

    fn index(self) -> usize {
        match self {
            Role::Master => 0,
            Role::Slave => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepted iteration range for either role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadRange;

impl WorkloadRange {
    pub fn contains(value: u32) -> bool {
        (MIN_WORKLOAD..=MAX_WORKLOAD).contains(&value)
    }

    /// Nearest accepted value, for callers that want to retry after a [`ValidationError`].
    pub fn clamp(value: u32) -> u32 {
        value.clamp(MIN_WORKLOAD, MAX_WORKLOAD)
    }
}

/// Handle to the workload pair. Cheap to clone; every clone sees the same cells.
#[derive(Clone)]
pub struct WorkloadStore {
    cells: Arc<Cells>,
}

enum Cells {
    Local([AtomicU32; ROLE_COUNT]),
    Shared(SharedRegion),
}

impl Cells {
    fn cell(&self, role: Role) -> &AtomicU32 {
        match self {
            Cells::Local(cells) => &cells[role.index()],
            Cells::Shared(region) => region.cell(role.index()),
        }
    }
}

impl WorkloadStore {
    /// Process-local store; both roles start at [`DEFAULT_WORKLOAD`].
    pub fn new() -> Self {
        Self {
            cells: Arc::new(Cells::Local([
                AtomicU32::new(DEFAULT_WORKLOAD),
                AtomicU32::new(DEFAULT_WORKLOAD),
            ])),
        }
    }

    /// Creates (or truncates) the shared mapping at `path` and seeds it with defaults.
    /// The file is removed when the last handle of this store is dropped.
    pub fn create_shared(path: impl AsRef<Path>) -> io::Result<Self> {
        let region = SharedRegion::map(path.as_ref(), true)?;
        for idx in 0..ROLE_COUNT {
            region.cell(idx).store(DEFAULT_WORKLOAD, Ordering::Release);
        }
        debug!("[Workload] created shared mapping at {:?}", path.as_ref());
        Ok(Self { cells: Arc::new(Cells::Shared(region)) })
    }

    /// Opens a mapping previously created by [`WorkloadStore::create_shared`].
    pub fn open_shared(path: impl AsRef<Path>) -> io::Result<Self> {
        let region = SharedRegion::map(path.as_ref(), false)?;
        debug!("[Workload] opened shared mapping at {:?}", path.as_ref());
        Ok(Self { cells: Arc::new(Cells::Shared(region)) })
    }

    /// Path of the backing mapping, if this store is shared.
    pub fn shared_path(&self) -> Option<&Path> {
        match self.cells.as_ref() {
            Cells::Local(_) => None,
            Cells::Shared(region) => Some(&region.path),
        }
    }

    pub fn get(&self, role: Role) -> u32 {
        self.cells.cell(role).load(Ordering::Acquire)
    }

    pub fn set(&self, role: Role, value: u32) -> Result<(), ValidationError> {
        if !WorkloadRange::contains(value) {
            return Err(ValidationError {
                role,
                value,
                min: MIN_WORKLOAD,
                max: MAX_WORKLOAD,
            });
        }
        self.cells.cell(role).store(value, Ordering::Release);
        Ok(())
    }
}

impl Default for WorkloadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkloadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadStore")
            .field("master", &self.get(Role::Master))
            .field("slave", &self.get(Role::Slave))
            .field("shared", &self.shared_path())
            .finish()
    }
}

/// `MAP_SHARED` file mapping holding one `AtomicU32` per role.
struct SharedRegion {
    ptr: NonNull<AtomicU32>,
    path: PathBuf,
    is_owner: bool,
}

// The mapping is only ever accessed through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    fn map(path: &Path, create: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(create)
            .open(path)?;
        if create {
            file.set_len(REGION_BYTES as u64)?;
        } else if file.metadata()?.len() < REGION_BYTES as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("workload mapping {:?} is too small", path),
            ));
        }

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                REGION_BYTES,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if create {
                let _ = fs::remove_file(path);
            }
            return Err(err);
        }

        let ptr = NonNull::new(raw.cast::<AtomicU32>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(Self {
            ptr,
            path: path.to_path_buf(),
            is_owner: create,
        })
    }

    fn cell(&self, idx: usize) -> &AtomicU32 {
        debug_assert!(idx < ROLE_COUNT);
        // Page-aligned mapping of REGION_BYTES, valid for the lifetime of `self`.
        unsafe { &*self.ptr.as_ptr().add(idx) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), REGION_BYTES);
        }
        if self.is_owner {
            let _ = fs::remove_file(&self.path);
        }
    }
}
