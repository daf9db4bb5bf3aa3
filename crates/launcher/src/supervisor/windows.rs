use super::signals::SavedDispositions;
use super::{ChildExit, CommandLine, SupervisorError};
use std::ffi::{OsStr, OsString};
use std::io;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::Path;
use std::ptr;
use tracing::debug;
use windows_sys::Win32::Foundation::{HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::System::Environment::GetCommandLineW;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, GetStartupInfoW, WaitForSingleObject, INFINITE,
    PROCESS_INFORMATION, STARTF_USESHOWWINDOW, STARTF_USESTDHANDLES, STARTUPINFOW,
};
use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

pub(super) fn current_command_line() -> CommandLine {
    // SAFETY: GetCommandLineW returns a NUL-terminated string owned by the process.
    let wide = unsafe {
        let line = GetCommandLineW();
        let mut len = 0;
        while *line.add(len) != 0 {
            len += 1;
        }
        std::slice::from_raw_parts(line, len).to_vec()
    };
    CommandLine { wide }
}

pub(super) fn command_line_from_args(args: impl Iterator<Item = OsString>) -> CommandLine {
    let mut wide = Vec::new();
    for (i, arg) in args.enumerate() {
        if i > 0 {
            wide.push(u16::from(b' '));
        }
        append_quoted(&arg, &mut wide);
    }
    CommandLine { wide }
}

/// Quote one argument so the MSVC runtime parses it back unchanged.
fn append_quoted(arg: &OsStr, out: &mut Vec<u16>) {
    const QUOTE: u16 = b'"' as u16;
    const BACKSLASH: u16 = b'\\' as u16;

    let units: Vec<u16> = arg.encode_wide().collect();
    let needs_quotes = units.is_empty()
        || units
            .iter()
            .any(|&c| c == u16::from(b' ') || c == u16::from(b'\t') || c == QUOTE);
    if !needs_quotes {
        out.extend_from_slice(&units);
        return;
    }

    out.push(QUOTE);
    let mut backslashes = 0usize;
    for &c in &units {
        if c == BACKSLASH {
            backslashes += 1;
            continue;
        }
        if c == QUOTE {
            out.extend(iter::repeat(BACKSLASH).take(backslashes * 2 + 1));
        } else {
            out.extend(iter::repeat(BACKSLASH).take(backslashes));
        }
        backslashes = 0;
        out.push(c);
    }
    out.extend(iter::repeat(BACKSLASH).take(backslashes * 2));
    out.push(QUOTE);
}

pub(super) fn spawn_and_wait(
    executable: &Path,
    command_line: &CommandLine,
    _saved: &SavedDispositions,
) -> Result<ChildExit, SupervisorError> {
    let application: Vec<u16> = executable
        .as_os_str()
        .encode_wide()
        .chain(iter::once(0))
        .collect();
    // CreateProcessW may write into the command line buffer.
    let mut line: Vec<u16> = command_line.wide.iter().copied().chain(iter::once(0)).collect();

    // SAFETY: STARTUPINFOW is plain data and GetStartupInfoW fills it in.
    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
    unsafe { GetStartupInfoW(&mut startup) };
    startup.lpReserved = ptr::null_mut();
    startup.lpDesktop = ptr::null_mut();
    startup.lpTitle = ptr::null_mut();
    startup.dwFlags = STARTF_USESTDHANDLES | STARTF_USESHOWWINDOW;
    startup.wShowWindow = SW_SHOWNORMAL as u16;
    startup.hStdInput = io::stdin().as_raw_handle() as HANDLE;
    startup.hStdOutput = io::stdout().as_raw_handle() as HANDLE;
    startup.hStdError = io::stderr().as_raw_handle() as HANDLE;

    // SAFETY: PROCESS_INFORMATION is plain data written by CreateProcessW.
    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

    debug!("creating child process");
    // SAFETY: every buffer is NUL-terminated and outlives the call.
    let created = unsafe {
        CreateProcessW(
            application.as_ptr(),
            line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1, // inherit handles
            0,
            ptr::null(),
            ptr::null(),
            &startup,
            &mut info,
        )
    };
    if created == 0 {
        return Err(SupervisorError::Spawn {
            path: executable.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }

    // SAFETY: both handles were just returned to us and are closed exactly once on drop.
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess as RawHandle) };
    let _thread = unsafe { OwnedHandle::from_raw_handle(info.hThread as RawHandle) };

    debug!(pid = info.dwProcessId, "waiting for child process to finish");
    let raw = process.as_raw_handle() as HANDLE;
    // SAFETY: `raw` stays valid while `process` is alive.
    if unsafe { WaitForSingleObject(raw, INFINITE) } != WAIT_OBJECT_0 {
        return Err(SupervisorError::Wait(io::Error::last_os_error()));
    }

    let mut code = 0u32;
    // SAFETY: as above; `code` is a valid out pointer.
    if unsafe { GetExitCodeProcess(raw, &mut code) } == 0 {
        return Err(SupervisorError::ExitCode(io::Error::last_os_error()));
    }

    Ok(ChildExit::Code(code as i32))
}
