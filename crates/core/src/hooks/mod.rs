//! Hook system
//!
//! Function detours built on iced-x86: the target prologue is relocated into
//! a trampoline allocated within rel32 range, and the target is patched with
//! a jump to the detour. All hooks share one enable state.

pub mod inline;
mod trampoline;

pub use inline::{
    create_inline_hook, disable_all_inline_hooks, enable_all_inline_hooks, DetourSlot, HookError,
    HookInstaller, InlineHookKey, InlineHooks,
};
