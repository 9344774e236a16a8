//! Diagnostic console window

/// Attach a console window to the game process
///
/// The standard handles are reassigned by the system, so stdout writes go
/// to the new window.
#[cfg(windows)]
pub fn attach() -> bool {
    use windows::Win32::System::Console::AllocConsole;

    // Fails if the process already has a console, which is fine
    unsafe { AllocConsole() }.is_ok()
}

#[cfg(not(windows))]
pub fn attach() -> bool {
    false
}
