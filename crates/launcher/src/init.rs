//! One-time launcher initialisation.

use once_cell::sync::OnceCell;
use tracing::debug;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Register the UI classes needed before any dialog can be shown.
///
/// Runs its work at most once per process; later calls return immediately.
pub fn init_launcher() {
    INITIALIZED.get_or_init(|| {
        #[cfg(windows)]
        {
            // SAFETY: no arguments; registers comctl32's common control classes.
            unsafe { windows_sys::Win32::UI::Controls::InitCommonControls() };
        }
        debug!("launcher initialized");
    });
}

pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}
