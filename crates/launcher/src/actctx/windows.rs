//! kernel32 activation context backend.
//!
//! Entry points are looked up at runtime so the launcher still starts on
//! systems that predate them.

use super::{ActCtxError, ActivationCookie, ActivationPlatform, EnterOps, RawContext, TeardownOps};
use std::ffi::{CString, OsStr};
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use tracing::debug;
use windows_sys::Win32::Foundation::{GetLastError, BOOL, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::ApplicationInstallationAndServicing::{
    ACTCTXW, DEACTIVATE_ACTCTX_FLAG_FORCE_EARLY_DEACTIVATION,
};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};

type CreateActCtxWFn = unsafe extern "system" fn(*const ACTCTXW) -> HANDLE;
type ActivateActCtxFn = unsafe extern "system" fn(HANDLE, *mut usize) -> BOOL;
type DeactivateActCtxFn = unsafe extern "system" fn(u32, usize) -> BOOL;
type ReleaseActCtxFn = unsafe extern "system" fn(HANDLE);
type GetCurrentActCtxFn = unsafe extern "system" fn(*mut HANDLE) -> BOOL;
type RawProc = unsafe extern "system" fn() -> isize;

/// Activation contexts through kernel32 (Windows XP and later).
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel32Activation;

impl ActivationPlatform for Kernel32Activation {
    type Enter = Kernel32Enter;
    type Teardown = Kernel32Teardown;

    fn supports_activation_contexts(&self) -> bool {
        is_xp_or_later()
    }

    fn probe_enter(&self) -> Result<Kernel32Enter, ActCtxError> {
        // SAFETY: the signatures match the documented kernel32 exports.
        unsafe {
            Ok(Kernel32Enter {
                create: mem::transmute::<RawProc, CreateActCtxWFn>(kernel32_symbol("CreateActCtxW")?),
                activate: mem::transmute::<RawProc, ActivateActCtxFn>(kernel32_symbol(
                    "ActivateActCtx",
                )?),
            })
        }
    }

    fn probe_teardown(&self) -> Result<Kernel32Teardown, ActCtxError> {
        // SAFETY: the signatures match the documented kernel32 exports.
        unsafe {
            Ok(Kernel32Teardown {
                deactivate: mem::transmute::<RawProc, DeactivateActCtxFn>(kernel32_symbol(
                    "DeactivateActCtx",
                )?),
                release: mem::transmute::<RawProc, ReleaseActCtxFn>(kernel32_symbol(
                    "ReleaseActCtx",
                )?),
                current: kernel32_symbol("GetCurrentActCtx")
                    .ok()
                    .map(|f| mem::transmute::<RawProc, GetCurrentActCtxFn>(f)),
            })
        }
    }
}

pub struct Kernel32Enter {
    create: CreateActCtxWFn,
    activate: ActivateActCtxFn,
}

impl EnterOps for Kernel32Enter {
    fn create(&self, manifest: &str) -> Result<RawContext, ActCtxError> {
        let source = to_wide(manifest);
        let request = ACTCTXW {
            cbSize: mem::size_of::<ACTCTXW>() as u32,
            dwFlags: 0,
            lpSource: source.as_ptr(),
            wProcessorArchitecture: 0,
            wLangId: 0,
            lpAssemblyDirectory: ptr::null(),
            lpResourceName: ptr::null(),
            lpApplicationName: ptr::null(),
            hModule: 0,
        };

        // SAFETY: `request` and `source` outlive the call.
        let handle = unsafe { (self.create)(&request) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(ActCtxError::Create {
                manifest: manifest.to_string(),
                code: unsafe { GetLastError() },
            });
        }
        Ok(RawContext(handle))
    }

    fn activate(&self, context: RawContext) -> Result<ActivationCookie, ActCtxError> {
        let mut cookie = 0usize;
        // SAFETY: `context` came from CreateActCtxW and has not been released.
        if unsafe { (self.activate)(context.0, &mut cookie) } == 0 {
            return Err(ActCtxError::Activate {
                code: unsafe { GetLastError() },
            });
        }
        Ok(ActivationCookie(cookie))
    }
}

pub struct Kernel32Teardown {
    deactivate: DeactivateActCtxFn,
    release: ReleaseActCtxFn,
    current: Option<GetCurrentActCtxFn>,
}

impl Kernel32Teardown {
    /// Whether `context` is the innermost active context of this thread.
    /// `None` when that cannot be determined.
    fn is_on_top(&self, context: RawContext) -> Option<bool> {
        let current = self.current?;
        let mut top: HANDLE = 0;
        // SAFETY: GetCurrentActCtx writes one handle and adds a reference to it.
        if unsafe { current(&mut top) } == 0 {
            return None;
        }
        if top != 0 {
            unsafe { (self.release)(top) };
        }
        Some(top == context.0)
    }
}

impl TeardownOps for Kernel32Teardown {
    fn deactivate(&self, context: RawContext, cookie: ActivationCookie) -> Result<(), ActCtxError> {
        if self.is_on_top(context) == Some(false) {
            // The forced pop never raises STATUS_SXS_EARLY_DEACTIVATION.
            debug!("activation context is not on top of the stack; forcing early deactivation");
            // SAFETY: the cookie was produced by ActivateActCtx for this thread.
            unsafe { (self.deactivate)(DEACTIVATE_ACTCTX_FLAG_FORCE_EARLY_DEACTIVATION, cookie.0) };
            return Err(ActCtxError::ExpectedRace);
        }

        // SAFETY: as above.
        if unsafe { (self.deactivate)(0, cookie.0) } == 0 {
            return Err(ActCtxError::Deactivate {
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }

    fn release(&self, context: RawContext) {
        // SAFETY: the manager releases each created handle exactly once.
        unsafe { (self.release)(context.0) };
    }
}

fn kernel32_symbol(name: &'static str) -> Result<RawProc, ActCtxError> {
    let module_name = to_wide("kernel32.dll");
    let symbol = CString::new(name).map_err(|_| ActCtxError::MissingEntryPoint(name))?;

    // SAFETY: both strings are NUL-terminated and live across the calls.
    unsafe {
        let module = GetModuleHandleW(module_name.as_ptr());
        if module == 0 {
            return Err(ActCtxError::MissingEntryPoint(name));
        }
        GetProcAddress(module, symbol.as_ptr() as *const u8).ok_or(ActCtxError::MissingEntryPoint(name))
    }
}

/// Windows XP (5.1) introduced activation contexts.
fn is_xp_or_later() -> bool {
    // SAFETY: OSVERSIONINFOW is plain data; the size field is set before the call.
    let info = unsafe {
        let mut info: OSVERSIONINFOW = mem::zeroed();
        info.dwOSVersionInfoSize = mem::size_of::<OSVERSIONINFOW>() as u32;
        if GetVersionExW(&mut info) == 0 {
            return false;
        }
        info
    };

    info.dwMajorVersion > 5 || (info.dwMajorVersion == 5 && info.dwMinorVersion >= 1)
}

fn to_wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(iter::once(0)).collect()
}
