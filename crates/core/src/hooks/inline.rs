//! Inline function hooks
//!
//! Detours a function by overwriting its first instructions with a `jmp rel32`
//! to a relay next to the trampoline. The overwritten instructions are
//! decoded and relocated with iced-x86 so the original can still be called.
//!
//! ```text
//! target:      jmp relay ; nop padding over the stolen bytes
//! relay:       jmp detour           (absolute on x86_64 when far)
//! trampoline:  <stolen instructions, relocated>
//!              jmp target + stolen
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};
use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use super::trampoline::{self, TRAMPOLINE_SIZE};
use crate::memory;

new_key_type! {
    /// Handle for an inline hook
    pub struct InlineHookKey;
}

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to create detour: {0}")]
    DetourCreation(String),

    #[error("Failed to enable hook: {0}")]
    EnableFailed(String),

    #[error("Failed to disable hook: {0}")]
    DisableFailed(String),

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),

    #[error("Address already hooked: {0:x}")]
    AlreadyHooked(usize),

    #[error("Failed to allocate trampoline near {0:x}")]
    TrampolineAllocation(usize),

    #[error("Instruction relocation failed: {0}")]
    RelocationFailed(String),
}

/// Size of the `jmp rel32` written over the target
pub const JMP_SIZE: usize = 5;

/// Bytes read from the target when relocating its prologue
const MAX_PROLOGUE: usize = 32;

/// Bytes reserved at the start of a trampoline block for the relay jump
const RELAY_SIZE: usize = 32;

/// Machine code bitness of this process
pub const BITNESS: u32 = if cfg!(target_pointer_width = "64") {
    64
} else {
    32
};

fn jmp_code(bitness: u32) -> Code {
    if bitness == 64 {
        Code::Jmp_rel32_64
    } else {
        Code::Jmp_rel32_32
    }
}

/// Relocated copy of a function prologue
#[derive(Debug, Clone)]
pub struct Relocated {
    /// Machine code to place at the trampoline address
    pub code: Vec<u8>,
    /// Number of bytes taken from the target
    pub stolen: usize,
}

/// Decode whole instructions from `code` until at least [`JMP_SIZE`] bytes are
/// covered, re-encode them at `trampoline_ip` and append a jump back to the
/// first instruction that was not taken.
pub fn relocate_prologue(
    code: &[u8],
    target_ip: u64,
    trampoline_ip: u64,
    bitness: u32,
) -> Result<Relocated, HookError> {
    let mut decoder = Decoder::with_ip(bitness, code, target_ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut stolen = 0usize;

    while stolen < JMP_SIZE {
        if !decoder.can_decode() {
            return Err(HookError::RelocationFailed(format!(
                "ran out of bytes after {} of {}",
                stolen, JMP_SIZE
            )));
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::RelocationFailed(format!(
                "invalid instruction at {:x}",
                instruction.ip()
            )));
        }

        stolen += instruction.len();
        instructions.push(instruction);

        if stolen < JMP_SIZE
            && matches!(
                instruction.flow_control(),
                FlowControl::Return | FlowControl::Interrupt
            )
        {
            return Err(HookError::RelocationFailed(format!(
                "function at {:x} is shorter than a jump",
                target_ip
            )));
        }
    }

    let back = Instruction::with_branch(jmp_code(bitness), target_ip + stolen as u64)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;
    instructions.push(back);

    let block = InstructionBlock::new(&instructions, trampoline_ip);
    let encoded = BlockEncoder::encode(bitness, block, BlockEncoderOptions::NONE)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;

    Ok(Relocated {
        code: encoded.code_buffer,
        stolen,
    })
}

/// Encode a single jump placed at `from` that lands on `to`
///
/// Far targets become an indirect jump through an inline address.
pub fn encode_jump(from: u64, to: u64, bitness: u32) -> Result<Vec<u8>, HookError> {
    let jump = Instruction::with_branch(jmp_code(bitness), to)
        .map_err(|e| HookError::DetourCreation(e.to_string()))?;
    let block = InstructionBlock::new(std::slice::from_ref(&jump), from);
    BlockEncoder::encode(bitness, block, BlockEncoderOptions::NONE)
        .map(|encoded| encoded.code_buffer)
        .map_err(|e| HookError::DetourCreation(e.to_string()))
}

/// rel32 displacement of a `jmp` at `from` landing on `to`
fn rel32(from: usize, to: usize) -> Option<i32> {
    let next = from.wrapping_add(JMP_SIZE);
    if cfg!(target_pointer_width = "64") {
        i32::try_from(to as i64 - next as i64).ok()
    } else {
        // 32-bit EIP wraps, every displacement is reachable
        Some(to.wrapping_sub(next) as u32 as i32)
    }
}

/// Build the bytes written over the target: `jmp rel32` plus NOP padding
fn build_patch(target: usize, relay: usize, stolen: usize) -> Result<Vec<u8>, HookError> {
    let rel = rel32(target, relay).ok_or(HookError::TrampolineAllocation(target))?;
    let mut patch = Vec::with_capacity(stolen);
    patch.push(0xE9);
    patch.extend_from_slice(&rel.to_le_bytes());
    patch.resize(stolen, 0x90);
    Ok(patch)
}

/// Internal storage for an inline hook
struct InlineHookEntry {
    /// Target function address
    target: usize,

    /// Bytes overwritten at the target
    original: Vec<u8>,

    /// Jump written over the target when enabled
    patch: Vec<u8>,

    /// Whether the hook is currently enabled
    enabled: bool,

    /// Description for debugging
    name: String,
}

/// Global inline hook registry
static INLINE_HOOKS: LazyLock<RwLock<HookMap>> =
    LazyLock::new(|| RwLock::new(SlotMap::with_key()));

/// Overwrite code at `address`, restoring page protection afterwards
unsafe fn write_code(address: usize, bytes: &[u8]) -> Result<(), HookError> {
    let _guard = region::protect_with_handle(
        address as *const u8,
        bytes.len(),
        region::Protection::READ_WRITE_EXECUTE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    Ok(())
}

/// Create an inline hook for a function
///
/// The hook is created disabled; nothing is written to the target until it
/// is enabled.
///
/// # Safety
/// - `target` must be the entry of a function in executable memory
/// - `detour` must be a function with a compatible signature and ABI
///
/// # Returns
/// A key to manage the hook, and a pointer to call the original function
pub unsafe fn create_inline_hook(
    name: &str,
    target: *const (),
    detour: *const (),
) -> Result<(InlineHookKey, *const ()), HookError> {
    let target_addr = target as usize;

    tracing::debug!(
        "Creating inline hook '{}' at {:x} -> {:x}",
        name,
        target_addr,
        detour as usize
    );

    if target.is_null() || detour.is_null() {
        return Err(HookError::InvalidAddress(target_addr));
    }
    if INLINE_HOOKS
        .read()
        .values()
        .any(|entry| entry.target == target_addr)
    {
        return Err(HookError::AlreadyHooked(target_addr));
    }
    if !memory::is_readable(target_addr, MAX_PROLOGUE) {
        return Err(HookError::InvalidAddress(target_addr));
    }

    let block = trampoline::alloc_trampoline(target as *const u8)
        .ok_or(HookError::TrampolineAllocation(target_addr))?;
    let relay_addr = block.as_ptr() as usize;
    let trampoline_addr = relay_addr + RELAY_SIZE;

    let relay = encode_jump(relay_addr as u64, detour as u64, BITNESS)?;
    if relay.len() > RELAY_SIZE {
        return Err(HookError::DetourCreation(format!(
            "relay jump is {} bytes",
            relay.len()
        )));
    }

    let code = std::slice::from_raw_parts(target as *const u8, MAX_PROLOGUE);
    let relocated = relocate_prologue(code, target_addr as u64, trampoline_addr as u64, BITNESS)?;
    if RELAY_SIZE + relocated.code.len() > TRAMPOLINE_SIZE {
        return Err(HookError::RelocationFailed(format!(
            "relocated prologue is {} bytes",
            relocated.code.len()
        )));
    }

    let patch = build_patch(target_addr, relay_addr, relocated.stolen)?;

    // Trampoline memory is private and RWX
    std::ptr::copy_nonoverlapping(relay.as_ptr(), relay_addr as *mut u8, relay.len());
    std::ptr::copy_nonoverlapping(
        relocated.code.as_ptr(),
        trampoline_addr as *mut u8,
        relocated.code.len(),
    );

    let entry = InlineHookEntry {
        target: target_addr,
        original: code[..relocated.stolen].to_vec(),
        patch,
        enabled: false,
        name: name.to_string(),
    };

    let key = INLINE_HOOKS.write().insert(entry);

    tracing::info!(
        "Created inline hook '{}' at {:x} ({} bytes relocated)",
        name,
        target_addr,
        relocated.stolen
    );

    Ok((key, trampoline_addr as *const ()))
}

fn set_enabled(entry: &mut InlineHookEntry, enabled: bool) -> Result<(), HookError> {
    if entry.enabled == enabled {
        return Ok(());
    }

    let bytes = if enabled { &entry.patch } else { &entry.original };
    unsafe { write_code(entry.target, bytes) }.map_err(|e| {
        if enabled {
            HookError::EnableFailed(e.to_string())
        } else {
            HookError::DisableFailed(e.to_string())
        }
    })?;

    entry.enabled = enabled;
    tracing::info!(
        "{} inline hook '{}' at {:x}",
        if enabled { "Enabled" } else { "Disabled" },
        entry.name,
        entry.target
    );
    Ok(())
}

type HookMap = SlotMap<InlineHookKey, InlineHookEntry>;

/// Enable every hook in `hooks`, or none of them
///
/// On failure the hooks enabled by this call are restored.
fn enable_all_in(hooks: &mut HookMap) -> Result<(), HookError> {
    let pending: Vec<InlineHookKey> = hooks
        .iter()
        .filter(|(_, entry)| !entry.enabled)
        .map(|(key, _)| key)
        .collect();

    for (done, &key) in pending.iter().enumerate() {
        let entry = &mut hooks[key];
        let Err(e) = set_enabled(entry, true) else {
            continue;
        };
        tracing::error!("Enabling '{}' failed, rolling back {} hooks", entry.name, done);
        for &key in &pending[..done] {
            let entry = &mut hooks[key];
            if let Err(e) = set_enabled(entry, false) {
                tracing::error!("Rollback of '{}' failed: {}", entry.name, e);
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Disable every hook in `hooks`, continuing past failures
///
/// Returns the first error.
fn disable_all_in(hooks: &mut HookMap) -> Result<(), HookError> {
    let mut first = None;
    for (_, entry) in hooks.iter_mut() {
        if let Err(e) = set_enabled(entry, false) {
            tracing::error!("Disabling '{}' failed: {}", entry.name, e);
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Enable every created inline hook
///
/// Either all hooks end up enabled or the target code is left as it was.
pub fn enable_all_inline_hooks() -> Result<(), HookError> {
    enable_all_in(&mut INLINE_HOOKS.write())
}

/// Disable every created inline hook
pub fn disable_all_inline_hooks() -> Result<(), HookError> {
    disable_all_in(&mut INLINE_HOOKS.write())
}

/// Storage for the original-function pointer a detour calls through
///
/// Filled in before the hook is enabled, so the detour can never observe an
/// empty slot once the game reaches it.
pub struct DetourSlot {
    original: AtomicUsize,
}

impl DetourSlot {
    pub const fn new() -> Self {
        Self {
            original: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, original: *const ()) {
        self.original.store(original as usize, Ordering::Release);
    }

    /// Get pointer to call the original function
    ///
    /// Returns None if the hook is not created
    pub fn get(&self) -> Option<*const ()> {
        match self.original.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr as *const ()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

impl Default for DetourSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs function intercepts
///
/// Hooks share one enable state: they are created disabled and enabled together.
pub trait HookInstaller {
    /// Create a disabled hook; `slot` receives the original before this returns
    ///
    /// # Safety
    /// `target` must be a function entry and `detour` a compatible function.
    unsafe fn create_hook(
        &mut self,
        name: &str,
        target: usize,
        detour: *const (),
        slot: &DetourSlot,
    ) -> Result<(), HookError>;

    /// Enable every created hook
    fn enable_all(&mut self) -> Result<(), HookError>;

    /// Restore the original bytes of every created hook
    fn disable_all(&mut self) -> Result<(), HookError>;
}

/// Inline hook installer backed by the global hook registry
#[derive(Debug, Default)]
pub struct InlineHooks {
    keys: Vec<InlineHookKey>,
}

impl InlineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[InlineHookKey] {
        &self.keys
    }
}

impl HookInstaller for InlineHooks {
    unsafe fn create_hook(
        &mut self,
        name: &str,
        target: usize,
        detour: *const (),
        slot: &DetourSlot,
    ) -> Result<(), HookError> {
        let (key, original) = create_inline_hook(name, target as *const (), detour)?;
        slot.set(original);
        self.keys.push(key);
        Ok(())
    }

    fn enable_all(&mut self) -> Result<(), HookError> {
        enable_all_inline_hooks()
    }

    fn disable_all(&mut self) -> Result<(), HookError> {
        disable_all_inline_hooks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // push rbp; mov rbp, rsp; sub rsp, 0x20; ret
    const PROLOGUE_64: [u8; 9] = [0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20, 0xC3];

    fn decode_all(code: &[u8], ip: u64, bitness: u32) -> Vec<Instruction> {
        let mut decoder = Decoder::with_ip(bitness, code, ip, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn test_relocate_whole_instructions() {
        let target = 0x1000_0000u64;
        let trampoline = 0x1000_8000u64;

        let relocated = relocate_prologue(&PROLOGUE_64, target, trampoline, 64).unwrap();
        // push (1) + mov (3) + sub (4) covers the 5-byte jump
        assert_eq!(relocated.stolen, 8);

        let decoded = decode_all(&relocated.code, trampoline, 64);
        assert_eq!(decoded.len(), 4);
        let back = decoded.last().unwrap();
        assert_eq!(back.flow_control(), FlowControl::UnconditionalBranch);
        assert_eq!(back.near_branch_target(), target + 8);
    }

    #[test]
    fn test_relocate_32bit_prologue() {
        // push ebp; mov ebp, esp; sub esp, 8
        let code = [0x55, 0x8B, 0xEC, 0x83, 0xEC, 0x08, 0xC3];
        let relocated = relocate_prologue(&code, 0x0040_1000, 0x0050_0000, 32).unwrap();
        assert_eq!(relocated.stolen, 6);

        let decoded = decode_all(&relocated.code, 0x0050_0000, 32);
        assert_eq!(decoded.last().unwrap().near_branch_target(), 0x0040_1006);
    }

    #[test]
    fn test_relocate_rejects_short_function() {
        // xor eax, eax; ret; int3...
        let code = [0x31, 0xC0, 0xC3, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC];
        assert!(matches!(
            relocate_prologue(&code, 0x1000, 0x2000, 64),
            Err(HookError::RelocationFailed(_))
        ));
    }

    #[test]
    fn test_encode_far_jump() {
        let near = encode_jump(0x1000_0000, 0x1000_1000, 64).unwrap();
        assert_eq!(near.len(), JMP_SIZE);

        let far = encode_jump(0x1000_0000, 0x7FFF_0000_0000, 64).unwrap();
        assert!(far.len() <= RELAY_SIZE);
        let decoded = decode_all(&far, 0x1000_0000, 64);
        assert_eq!(decoded[0].flow_control(), FlowControl::IndirectBranch);
    }

    #[test]
    fn test_build_patch_pads_with_nops() {
        let patch = build_patch(0x1000, 0x2000, 8).unwrap();
        assert_eq!(patch.len(), 8);
        assert_eq!(patch[0], 0xE9);
        assert_eq!(
            i32::from_le_bytes(patch[1..5].try_into().unwrap()),
            0x2000 - 0x1005
        );
        assert_eq!(&patch[5..], &[0x90, 0x90, 0x90]);
    }

    fn entry(name: &str, target: usize, original: Vec<u8>, patch: Vec<u8>) -> InlineHookEntry {
        InlineHookEntry {
            target,
            original,
            patch,
            enabled: false,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_enable_all_rolls_back_on_failure() {
        let code = region::alloc(region::page::size(), region::Protection::READ_WRITE).unwrap();
        let target = code.as_ptr::<u8>() as usize;
        let original = vec![0x55, 0x8B, 0xEC, 0x83, 0xEC];
        unsafe {
            std::ptr::copy_nonoverlapping(original.as_ptr(), target as *mut u8, original.len());
        }

        let mut hooks = HookMap::with_key();
        let good = hooks.insert(entry(
            "Good",
            target,
            original.clone(),
            build_patch(target, target + 0x100, 5).unwrap(),
        ));
        // Page one is never mapped
        let bad = hooks.insert(entry("Unmapped", 0x1000, vec![0x90; 5], vec![0xCC; 5]));

        assert!(matches!(
            enable_all_in(&mut hooks),
            Err(HookError::EnableFailed(_))
        ));

        assert!(!hooks[good].enabled);
        assert!(!hooks[bad].enabled);
        let bytes = unsafe { std::slice::from_raw_parts(target as *const u8, original.len()) };
        assert_eq!(bytes, &original[..]);
    }

    #[test]
    fn test_enable_then_disable_all() {
        let code = region::alloc(region::page::size(), region::Protection::READ_WRITE).unwrap();
        let target = code.as_ptr::<u8>() as usize;
        let original = vec![0x55, 0x8B, 0xEC, 0x83, 0xEC, 0x08];
        unsafe {
            std::ptr::copy_nonoverlapping(original.as_ptr(), target as *mut u8, original.len());
        }
        let patch = build_patch(target, target + 0x100, original.len()).unwrap();

        let mut hooks = HookMap::with_key();
        let key = hooks.insert(entry("Target", target, original.clone(), patch.clone()));
        let bytes = || unsafe { std::slice::from_raw_parts(target as *const u8, original.len()) };

        enable_all_in(&mut hooks).unwrap();
        assert!(hooks[key].enabled);
        assert_eq!(bytes(), &patch[..]);

        disable_all_in(&mut hooks).unwrap();
        assert!(!hooks[key].enabled);
        assert_eq!(bytes(), &original[..]);
    }

    #[test]
    fn test_detour_slot() {
        static SLOT: DetourSlot = DetourSlot::new();
        assert!(SLOT.get().is_none());
        SLOT.set(0x1234 as *const ());
        assert_eq!(SLOT.get(), Some(0x1234 as *const ()));
        assert!(SLOT.is_set());
    }

    #[test]
    fn test_create_hook_rejects_null() {
        let mut hooks = InlineHooks::new();
        let slot = DetourSlot::new();
        let result = unsafe { hooks.create_hook("Null", 0, 0x1000 as *const (), &slot) };
        assert!(matches!(result, Err(HookError::InvalidAddress(0))));
        assert!(!slot.is_set());
        assert!(hooks.keys().is_empty());
    }
}
