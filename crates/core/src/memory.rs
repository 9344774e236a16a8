//! Process image access and pointer validation
//!
//! Everything this crate touches in the game is foreign memory: it may be
//! unmapped or freed by the engine at any time. Reads go through
//! [`is_readable`] first. Validation narrows the window for a use-after-free,
//! it does not close it.

use cdchook_engine::ModuleInfo;

/// A contiguous readable range of the image
#[derive(Debug, Clone, Copy)]
pub struct ImageRegion<'a> {
    pub base: usize,
    pub bytes: &'a [u8],
}

impl ImageRegion<'_> {
    pub fn contains(&self, address: usize, len: usize) -> bool {
        address >= self.base
            && address
                .checked_add(len)
                .is_some_and(|end| end <= self.base + self.bytes.len())
    }
}

/// The address space of the running target binary
pub trait ProcessImage {
    /// Regions of the main module to scan for signatures
    fn scan_regions(&self) -> Vec<ImageRegion<'_>>;

    /// Read a pointer-sized value at an arbitrary address
    fn read_pointer(&self, address: usize) -> Option<usize>;

    /// Read a little-endian u32 from the scanned regions
    fn read_u32(&self, address: usize) -> Option<u32> {
        self.scan_regions()
            .into_iter()
            .find(|region| region.contains(address, 4))
            .and_then(|region| {
                let start = address - region.base;
                region.bytes[start..start + 4].try_into().ok()
            })
            .map(u32::from_le_bytes)
    }
}

/// The live main module of the current process
pub struct LiveImage {
    module: ModuleInfo,
}

impl LiveImage {
    /// Wrap the main module of this process
    ///
    /// # Safety
    /// `module` must describe an image mapped in this process for as long as
    /// the returned value is used.
    pub unsafe fn new(module: ModuleInfo) -> Self {
        Self { module }
    }

    pub fn module(&self) -> &ModuleInfo {
        &self.module
    }
}

impl ProcessImage for LiveImage {
    fn scan_regions(&self) -> Vec<ImageRegion<'_>> {
        let regions = match region::query_range(self.module.base as *const u8, self.module.size) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::error!("Failed to query main module pages: {}", e);
                return Vec::new();
            }
        };

        regions
            .filter_map(Result::ok)
            .filter(|r| r.is_executable() && r.is_readable() && !r.is_guarded())
            .filter_map(|r| {
                let range = r.as_range();
                let start = range.start.max(self.module.base);
                let end = range.end.min(self.module.end());
                (start < end).then(|| ImageRegion {
                    base: start,
                    // SAFETY: the page range was reported readable and lies inside the module
                    bytes: unsafe { std::slice::from_raw_parts(start as *const u8, end - start) },
                })
            })
            .collect()
    }

    fn read_pointer(&self, address: usize) -> Option<usize> {
        read_usize(address)
    }
}

/// Check that `[address, address + size)` is mapped and readable
///
/// Null and partially mapped ranges are not readable.
pub fn is_readable(address: usize, size: usize) -> bool {
    if address == 0 {
        return false;
    }
    if size == 0 {
        return true;
    }
    let Some(end) = address.checked_add(size) else {
        return false;
    };

    let Ok(regions) = region::query_range(address as *const u8, size) else {
        return false;
    };

    let mut covered = address;
    for region in regions {
        let Ok(region) = region else {
            return false;
        };
        let range = region.as_range();
        if range.start > covered || !region.is_readable() || region.is_guarded() {
            return false;
        }
        covered = covered.max(range.end);
        if covered >= end {
            return true;
        }
    }

    covered >= end
}

/// Read a pointer-sized value from foreign memory after validating it
pub fn read_usize(address: usize) -> Option<usize> {
    if !is_readable(address, std::mem::size_of::<usize>()) {
        return None;
    }
    // SAFETY: range checked readable just above
    Some(unsafe { std::ptr::read_unaligned(address as *const usize) })
}

/// Read a NUL-terminated byte string of at most `capacity` bytes
///
/// The string's allocation may be shorter than `capacity`, so pages are
/// validated one at a time and reading stops at the first NUL. A string
/// that runs into an unreadable page before its terminator is rejected;
/// one that fills the capacity is truncated.
pub fn read_c_bytes(address: usize, capacity: usize) -> Option<Vec<u8>> {
    if address == 0 {
        return None;
    }
    let end = address.checked_add(capacity)?;
    let page = region::page::size();

    let mut bytes = Vec::new();
    let mut cursor = address;
    while cursor < end {
        let chunk_end = (cursor | (page - 1)).saturating_add(1);
        let len = chunk_end.min(end) - cursor;
        if !is_readable(cursor, len) {
            return None;
        }
        // SAFETY: range checked readable just above
        let chunk = unsafe { std::slice::from_raw_parts(cursor as *const u8, len) };
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&chunk[..nul]);
            return Some(bytes);
        }
        bytes.extend_from_slice(chunk);
        cursor += len;
    }

    Some(bytes)
}
