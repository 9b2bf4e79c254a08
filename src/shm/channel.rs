//! Shared-memory pixel transport.
//!
//! The peer process creates a POSIX shared-memory object named after its own
//! process id; this side opens it read+write and maps the entire region. The
//! region's true size belongs to the peer: [`SharedMemoryChannel::buffer`]
//! takes a caller-supplied logical length and never trusts it past the mapped
//! extent. The lifecycle is explicit (`open`, `resize`, `close`), so a
//! required reopen cannot be skipped by accident.

// The only module allowed to touch raw memory: the mapped region has no safe
// owner type to borrow from.
#![allow(unsafe_code)]

use rustix::fs::Mode;
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use rustix::shm;
use tracing::debug;

use crate::foundation::error::{BridgeError, BridgeResult};

const NAME_PREFIX: &str = "/pixelbridge-pixel-";

/// Shared-memory object name for a given peer process id.
pub fn region_name(peer_pid: i32) -> String {
    format!("{NAME_PREFIX}{peer_pid}")
}

/// Owned view of the mapped region. Unmaps on drop, on every exit path.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// The mapping is exclusively owned and only handed out as &mut [u8].
unsafe impl Send for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        unsafe {
            let _ = munmap(self.ptr.cast(), self.len);
        }
    }
}

/// Channel onto the peer-created shared-memory region.
///
/// Constructed once from the peer's process id and passed to whoever needs
/// it; there is deliberately no process-wide instance.
pub struct SharedMemoryChannel {
    peer_pid: i32,
    name: String,
    mapping: Option<Mapping>,
}

impl SharedMemoryChannel {
    pub fn new(peer_pid: i32) -> Self {
        Self {
            peer_pid,
            name: region_name(peer_pid),
            mapping: None,
        }
    }

    pub fn peer_pid(&self) -> i32 {
        self.peer_pid
    }

    pub fn object_name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Mapped region size, if open.
    pub fn mapped_len(&self) -> Option<usize> {
        self.mapping.as_ref().map(|m| m.len)
    }

    /// Open and map the peer's region. Precondition: closed. Use
    /// [`SharedMemoryChannel::resize`] to replace an existing mapping.
    pub fn open(&mut self) -> BridgeResult<()> {
        if self.mapping.is_some() {
            return Err(BridgeError::shared_memory(format!(
                "{} is already mapped; resize() replaces an open mapping",
                self.name
            )));
        }
        self.map_region()
    }

    /// Close any existing mapping, then open fresh. The old mapping is fully
    /// released before the new one is created; no copy may ever target a
    /// stale mapping.
    pub fn resize(&mut self) -> BridgeResult<()> {
        self.close();
        self.map_region()
    }

    /// Unmap and release. Idempotent.
    pub fn close(&mut self) {
        if self.mapping.take().is_some() {
            debug!(name = %self.name, "shared memory unmapped");
        }
    }

    /// Bounded mutable view of the region: at most `max_len` bytes, clipped
    /// to the mapped extent, empty if unmapped. `max_len` is peer-supplied
    /// per request and is never assumed to match the true region size.
    pub fn buffer(&mut self, max_len: usize) -> &mut [u8] {
        match &self.mapping {
            Some(m) => {
                let len = max_len.min(m.len);
                // SAFETY: the region stays mapped for the lifetime of the
                // borrow (it is owned by self) and this process is its only
                // writer.
                unsafe { std::slice::from_raw_parts_mut(m.ptr, len) }
            }
            None => &mut [],
        }
    }

    fn map_region(&mut self) -> BridgeResult<()> {
        let fd = shm::open(&self.name, shm::OFlags::RDWR, Mode::empty()).map_err(|e| {
            BridgeError::shared_memory(format!("failed to open {}: {e}", self.name))
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| {
            BridgeError::shared_memory(format!("failed to stat {}: {e}", self.name))
        })?;
        let len = stat.st_size as usize;
        if len == 0 {
            return Err(BridgeError::shared_memory(format!(
                "{} has zero size; the peer has not sized it yet",
                self.name
            )));
        }

        // SAFETY: null hint, length from fstat, anonymous address choice; the
        // fd is dropped after mapping (the mapping keeps the region alive).
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(|e| BridgeError::shared_memory(format!("failed to map {}: {e}", self.name)))?;

        self.mapping = Some(Mapping {
            ptr: ptr.cast(),
            len,
        });
        debug!(name = %self.name, len, "shared memory mapped");
        Ok(())
    }
}

impl Drop for SharedMemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create (or grow) the named region the way the peer process would. Intended
/// for host-side harnesses and tests; in production the peer owns creation.
pub fn create_region(peer_pid: i32, len: usize) -> BridgeResult<()> {
    let name = region_name(peer_pid);
    let fd = shm::open(
        &name,
        shm::OFlags::CREATE | shm::OFlags::RDWR,
        Mode::RUSR | Mode::WUSR,
    )
    .map_err(|e| BridgeError::shared_memory(format!("failed to create {name}: {e}")))?;
    rustix::fs::ftruncate(&fd, len as u64)
        .map_err(|e| BridgeError::shared_memory(format!("failed to size {name}: {e}")))
}

/// Remove the named region. Companion to [`create_region`]; ignores a missing
/// object.
pub fn destroy_region(peer_pid: i32) {
    let _ = shm::unlink(region_name(peer_pid));
}
