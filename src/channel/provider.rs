//! Backing memory for channel regions
//!
//! Channels prefer anonymous huge-page memory (a `memfd` with `MFD_HUGETLB`)
//! and fall back to a named POSIX shared memory object when huge pages are
//! unavailable. Either way the mapping is shared, pre-populated and locked
//! in RAM; the file descriptor is kept so it can be passed to applications
//! over an out-of-band handshake.

use std::{
    ffi::CString,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    ptr::NonNull,
};

use log::warn;
use memmap2::{MmapMut, MmapOptions};
use nix::{
    errno::Errno,
    fcntl::OFlag,
    sys::memfd::{memfd_create, MemFdCreateFlag},
    sys::mman::{shm_open, shm_unlink},
    sys::stat::Mode,
    unistd::ftruncate,
};
use serde::{Deserialize, Serialize};

use crate::{
    channel::layout::HUGE_PAGE_SIZE,
    error::{MonetError, Result},
};

/// log2 of [`HUGE_PAGE_SIZE`], for the mmap huge page size selector.
const HUGE_PAGE_SHIFT: u8 = 21;

/// How a channel region is backed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backing {
    /// Anonymous huge-page memory file descriptor
    HugePages,
    /// Named POSIX shared memory object
    PosixShm,
}

/// Page size a layout must be computed with for the given backing.
pub fn backing_page_size(backing: Backing) -> usize {
    match backing {
        Backing::HugePages => HUGE_PAGE_SIZE,
        Backing::PosixShm => system_page_size(),
    }
}

/// The kernel's regular page size.
pub fn system_page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as usize
    }
}

/// A mapped, locked shared memory region backing one channel
#[derive(Debug)]
pub struct ChannelRegion {
    name: String,
    mmap: MmapMut,
    fd: OwnedFd,
    backing: Backing,
    unlink_on_drop: bool,
}

impl ChannelRegion {
    /// Create a huge-page backed region of `size` bytes (a multiple of
    /// [`HUGE_PAGE_SIZE`]).
    pub fn create_hugetlb(name: &str, size: usize) -> Result<Self> {
        if size % HUGE_PAGE_SIZE != 0 {
            return Err(MonetError::invalid_parameter(
                "size",
                "Huge page regions must be a multiple of the huge page size",
            ));
        }

        let name_cstr = CString::new(name)
            .map_err(|_| MonetError::invalid_parameter("name", "Name contains null bytes"))?;
        let fd = memfd_create(
            &name_cstr,
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_HUGETLB,
        )
        .map_err(|e| MonetError::out_of_memory(format!("memfd_create(MFD_HUGETLB): {}", e)))?;

        ftruncate(&fd, size as i64)
            .map_err(|e| MonetError::out_of_memory(format!("ftruncate on hugetlb memfd: {}", e)))?;

        let mmap = Self::map_populated(&fd, size, true)?;
        Ok(Self::finish(name.to_string(), mmap, fd, Backing::HugePages, false))
    }

    /// Create a POSIX shared memory backed region of `size` bytes. Fails
    /// with [`MonetError::ChannelExists`] if the object already exists; the
    /// existing object is left untouched.
    pub fn create_posix(name: &str, size: usize) -> Result<Self> {
        let path = shm_path(name);
        let fd = match shm_open(
            path.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        ) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => return Err(MonetError::channel_exists(name)),
            Err(e) => {
                return Err(MonetError::out_of_memory(format!("shm_open({}): {}", path, e)))
            }
        };

        let cleanup = |err: MonetError| {
            let _ = shm_unlink(path.as_str());
            err
        };

        ftruncate(&fd, size as i64)
            .map_err(|e| cleanup(MonetError::out_of_memory(format!("ftruncate: {}", e))))?;
        let mmap = Self::map_populated(&fd, size, false).map_err(cleanup)?;
        Ok(Self::finish(name.to_string(), mmap, fd, Backing::PosixShm, true))
    }

    /// Map a region that already exists, from a descriptor received over an
    /// out-of-band handshake. The mapping is never unlinked on drop.
    pub fn from_fd(name: &str, fd: OwnedFd, size: usize, backing: Backing) -> Result<Self> {
        let mmap = Self::map_populated(&fd, size, backing == Backing::HugePages)?;
        Ok(Self::finish(name.to_string(), mmap, fd, backing, false))
    }

    fn map_populated(fd: &OwnedFd, size: usize, huge: bool) -> Result<MmapMut> {
        let mut opts = MmapOptions::new();
        opts.len(size).populate();
        if huge {
            opts.huge(Some(HUGE_PAGE_SHIFT));
        }
        unsafe { opts.map_mut(fd.as_raw_fd()) }
            .map_err(|e| MonetError::out_of_memory(format!("mmap failed: {}", e)))
    }

    fn finish(
        name: String,
        mut mmap: MmapMut,
        fd: OwnedFd,
        backing: Backing,
        unlink_on_drop: bool,
    ) -> Self {
        // Lock the region in RAM. Constrained environments routinely cap
        // RLIMIT_MEMLOCK, so a refusal downgrades to a warning.
        if let Err(e) = mmap.lock() {
            warn!("mlock of channel {} failed: {}", name, e);
        }
        Self {
            name,
            mmap,
            fd,
            backing,
            unlink_on_drop,
        }
    }

    /// Base address of the mapping.
    pub fn base(&self) -> NonNull<u8> {
        // A successful mmap is never null.
        unsafe { NonNull::new_unchecked(self.mmap.as_ptr() as *mut u8) }
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    /// Region name (also the POSIX object name, minus the leading slash).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the backing object, for the handshake collaborator.
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Whether this region sits in POSIX shared memory (the fallback path).
    pub fn is_posix_shm(&self) -> bool {
        self.backing == Backing::PosixShm
    }
}

impl Drop for ChannelRegion {
    fn drop(&mut self) {
        if self.backing == Backing::PosixShm && self.unlink_on_drop {
            let path = shm_path(&self.name);
            if let Err(e) = shm_unlink(path.as_str()) {
                warn!("shm_unlink({}) failed: {}", path, e);
            }
        }
    }
}

unsafe impl Send for ChannelRegion {}
unsafe impl Sync for ChannelRegion {}

fn shm_path(name: &str) -> String {
    format!("/{}", name)
}
