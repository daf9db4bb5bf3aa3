//! Fatal error presentation
//!
//! Fatal conditions (the launcher cannot find itself, the child cannot be
//! run) are reported to the user before the launcher exits.

use pkgboot_common::{basename, env_vars};
use std::env;
use tracing::error;

/// Report a fatal error to the user.
///
/// Always written to stderr. Windowed launchers without a console also get a
/// blocking message box unless `PKGBOOT_NO_DIALOG=1`.
pub fn present(message: &str) {
    error!("{message}");
    eprintln!("[{}] {message}", program_name());

    #[cfg(windows)]
    {
        if dialogs_enabled() && !has_console() {
            message_box(message);
        }
    }
}

/// Executable name used as the message prefix and dialog caption.
pub fn program_name() -> String {
    env::current_exe()
        .ok()
        .map(|exe| basename(&exe.to_string_lossy()).to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "pkgboot".to_string())
}

#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn dialogs_enabled() -> bool {
    env::var(env_vars::NO_DIALOG).as_deref() != Ok("1")
}

#[cfg(windows)]
fn has_console() -> bool {
    // SAFETY: no arguments; returns 0 when no console is attached.
    unsafe { windows_sys::Win32::System::Console::GetConsoleWindow() != 0 }
}

#[cfg(windows)]
fn message_box(message: &str) {
    use std::iter;
    use windows_sys::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    let text: Vec<u16> = message.encode_utf16().chain(iter::once(0)).collect();
    let caption: Vec<u16> = program_name().encode_utf16().chain(iter::once(0)).collect();
    // SAFETY: both strings are NUL-terminated and outlive the call.
    unsafe {
        MessageBoxW(0, text.as_ptr(), caption.as_ptr(), MB_OK | MB_ICONERROR);
    }
}
