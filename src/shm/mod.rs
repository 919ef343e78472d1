//! Shared-memory backing for tables.
//!
//! A table is laid out in one contiguous region: header, bucket array and
//! item arena (see [`layout`]). The region comes from an [`Arena`]: either a
//! private heap allocation ([`HeapArena`]) or a named memory-mapped file
//! ([`ShmArena`]) that several worker processes map at once. All links
//! inside the region are slot indices, and all locks are spin locks stored
//! in the region itself, so the same table logic works for both.
pub mod layout;
pub mod list;
pub mod lock;
pub mod region;

use std::ptr::NonNull;

pub use lock::{ShmSpinLock, SpinGuard};
pub use region::HeapArena;
#[cfg(not(target_os = "windows"))]
pub use region::ShmArena;

/// A contiguous region of memory a table is laid out in.
///
/// # Safety
///
/// Implementors must guarantee that `base()` points to `size()` readable and
/// writable bytes, aligned to [`layout::REGION_ALIGN`], that stay at the
/// same address for the lifetime of `self`, and that the bytes were zeroed
/// when the region was first created.
pub unsafe trait Arena: Send + Sync {
    fn base(&self) -> NonNull<u8>;

    fn size(&self) -> usize;

    /// Whether this handle is the only one that can ever see the region.
    ///
    /// Dropping a table over an exclusive arena releases every payload.
    /// Shared regions outlive any single handle and are left untouched.
    fn is_exclusive(&self) -> bool;
}
