use super::signals::{apply_in_child, forward_to_child, SavedDispositions};
use super::{ChildExit, CommandLine, SupervisorError};
use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::debug;

use std::os::unix::process::{CommandExt, ExitStatusExt};

pub(super) fn current_command_line() -> CommandLine {
    CommandLine {
        argv: env::args_os().collect(),
    }
}

pub(super) fn command_line_from_args(args: impl Iterator<Item = OsString>) -> CommandLine {
    CommandLine {
        argv: args.collect(),
    }
}

pub(super) fn spawn_and_wait(
    executable: &Path,
    command_line: &CommandLine,
    saved: &SavedDispositions,
) -> Result<ChildExit, SupervisorError> {
    let mut cmd = Command::new(executable);

    let mut argv = command_line.argv.iter();
    if let Some(arg0) = argv.next() {
        cmd.arg0(arg0); // Preserve argv[0] exactly as the launcher received it
    }
    cmd.args(argv);

    let dispositions = saved.child_dispositions();
    // SAFETY: the hook only calls sigaction, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || apply_in_child(&dispositions));
    }

    debug!("creating child process");
    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        path: executable.to_path_buf(),
        source,
    })?;

    let forwarding = forward_to_child(child.id());

    debug!(pid = child.id(), "waiting for child process to finish");
    let status = child.wait().map_err(SupervisorError::Wait);
    drop(forwarding);

    Ok(child_exit(status?))
}

fn child_exit(status: ExitStatus) -> ChildExit {
    if let Some(signal) = status.signal() {
        return ChildExit::Signal(signal);
    }
    ChildExit::Code(status.code().unwrap_or(1))
}
