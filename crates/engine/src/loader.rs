//! Main module discovery

use crate::error::EngineError;

/// Location of a loaded module in the current process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Base address the module is loaded at
    pub base: usize,
    /// Size of the mapped image in bytes
    pub size: usize,
}

impl ModuleInfo {
    pub fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// One past the last byte of the image
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }

    /// Check if an address lies inside the image
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    /// Translate a relative virtual address into an absolute address
    pub fn rva(&self, offset: usize) -> Option<usize> {
        (offset < self.size).then(|| self.base + offset)
    }
}

/// Locate the main executable module of the current process
#[cfg(windows)]
#[tracing::instrument]
pub fn main_module() -> Result<ModuleInfo, EngineError> {
    use windows::core::PCWSTR;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
    use windows::Win32::System::Threading::GetCurrentProcess;

    let module = unsafe { GetModuleHandleW(PCWSTR::null()) }
        .map_err(|e| EngineError::ModuleNotFound(e.to_string()))?;

    let mut info = MODULEINFO::default();
    unsafe {
        GetModuleInformation(
            GetCurrentProcess(),
            module,
            &mut info,
            std::mem::size_of::<MODULEINFO>() as u32,
        )
    }
    .map_err(|e| EngineError::ModuleInfo(e.to_string()))?;

    let info = ModuleInfo::new(info.lpBaseOfDll as usize, info.SizeOfImage as usize);
    tracing::info!("Main module: {:x} (+{:x})", info.base, info.size);
    Ok(info)
}

/// Locate the main executable module of the current process
#[cfg(not(windows))]
pub fn main_module() -> Result<ModuleInfo, EngineError> {
    Err(EngineError::Unsupported("main module discovery requires Windows"))
}
