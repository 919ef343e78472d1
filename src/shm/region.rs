//! Memory regions a table can be laid out in.
//!
//! [`HeapArena`] is a private, zeroed allocation from the global allocator.
//! [`ShmArena`] is a named memory-mapped file that every worker process can
//! map, which is what makes the table visible across processes.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use super::layout::REGION_ALIGN;
use super::Arena;
use crate::error::{Error, Result};

/// A zeroed region owned by this process.
pub struct HeapArena {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The region is plain bytes; synchronization is done by the table's locks.
unsafe impl Send for HeapArena {}
unsafe impl Sync for HeapArena {}

impl HeapArena {
    /// Allocate `size` zeroed bytes aligned to [`REGION_ALIGN`].
    pub fn with_size(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("arena size must be non-zero"));
        }
        let layout = Layout::from_size_align(size, REGION_ALIGN)
            .map_err(|_| Error::AllocationFailure("table region"))?;
        // Safety: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::AllocationFailure("table region"))?;
        Ok(HeapArena { ptr, layout })
    }
}

unsafe impl Arena for HeapArena {
    fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn is_exclusive(&self) -> bool {
        true
    }
}

impl Drop for HeapArena {
    fn drop(&mut self) {
        // Safety: allocated in `with_size` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(not(target_os = "windows"))]
pub use self::shm::ShmArena;

#[cfg(not(target_os = "windows"))]
mod shm {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::ptr::NonNull;

    use memmap2::MmapMut;

    use crate::error::{Error, Result};
    use crate::shm::Arena;

    /// Where to store the mmap files.
    pub(crate) fn shm_dir() -> PathBuf {
        if cfg!(target_os = "linux") {
            PathBuf::from("/dev/shm")
        } else {
            // macOS and other Unix: use TMPDIR
            std::env::temp_dir().join("sip_ttable")
        }
    }

    /// A named region backed by a memory-mapped file.
    ///
    /// Every handle mapping the same name sees the same bytes. Handles are
    /// never exclusive: dropping one unmaps it but leaves the data for the
    /// other processes.
    pub struct ShmArena {
        mmap: MmapMut,
        base: NonNull<u8>,
        path: PathBuf,
    }

    // The mapping is plain bytes; synchronization is done by the table's locks.
    unsafe impl Send for ShmArena {}
    unsafe impl Sync for ShmArena {}

    impl ShmArena {
        /// Create (or truncate) the region `name` with `size` zeroed bytes.
        pub fn create(name: &str, size: usize) -> Result<Self> {
            if size == 0 {
                return Err(Error::InvalidConfig("arena size must be non-zero"));
            }
            let dir = shm_dir();
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
            let path = dir.join(format!("{name}.ttable"));

            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(size as u64)?;

            // Safety: we just created the file and nobody has mapped it yet.
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            mmap.fill(0);
            log::debug!("created shared region {} ({size} bytes)", path.display());

            Self::from_mmap(mmap, path)
        }

        /// Map an existing region created by another handle or process.
        pub fn open(name: &str) -> Result<Self> {
            Self::open_path(&shm_dir().join(format!("{name}.ttable")))
        }

        fn open_path(path: &Path) -> Result<Self> {
            let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
            // Safety: the file is shared on purpose; all access goes through
            // the table's locks and atomics.
            let mmap = unsafe { MmapMut::map_mut(&file)? };
            if mmap.is_empty() {
                return Err(Error::LayoutMismatch("empty region file"));
            }
            log::debug!("mapped shared region {}", path.display());
            Self::from_mmap(mmap, path.to_path_buf())
        }

        fn from_mmap(mut mmap: MmapMut, path: PathBuf) -> Result<Self> {
            let base = NonNull::new(mmap.as_mut_ptr())
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null mapping"))?;
            Ok(ShmArena { mmap, base, path })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Flush the mapping to its backing file.
        pub fn flush(&self) -> Result<()> {
            self.mmap.flush()?;
            Ok(())
        }

        /// Remove the backing file. Existing mappings stay valid.
        pub fn unlink(&self) -> Result<()> {
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    unsafe impl Arena for ShmArena {
        fn base(&self) -> NonNull<u8> {
            self.base
        }

        fn size(&self) -> usize {
            self.mmap.len()
        }

        fn is_exclusive(&self) -> bool {
            false
        }
    }
}
