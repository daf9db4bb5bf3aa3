//! Spawn-and-wait supervision of the launcher's child process
//!
//! The supervisor ignores the termination signals before the child exists,
//! launches it on the inherited standard streams with the full command line,
//! waits without timeout, and hands back the child's exit code verbatim.
//! On POSIX, interrupt and terminate aimed at the supervisor alone are relayed
//! to the child for the duration of the wait.

mod signals;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use self::unix as platform;
#[cfg(windows)]
use self::windows as platform;

use crate::fatal;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Exit code reported when the child could not be run at all.
pub const SPAWN_FAILED: i32 = -1;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Error creating child process {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error waiting for child process: {0}")]
    Wait(#[source] io::Error),
    #[error("Error reading child exit code: {0}")]
    ExitCode(#[source] io::Error),
}

/// Command line handed to the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    #[cfg(unix)]
    argv: Vec<OsString>,
    #[cfg(windows)]
    wide: Vec<u16>,
}

impl CommandLine {
    /// The current process's full command line, argv[0] included.
    pub fn current() -> Self {
        platform::current_command_line()
    }

    /// Build a command line from individual arguments, argv[0] first.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        platform::command_line_from_args(args.into_iter().map(|a| a.as_ref().to_os_string()))
    }
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildExit {
    Code(i32),
    #[cfg_attr(windows, allow(dead_code))]
    Signal(i32),
}

impl ChildExit {
    /// Exit code verbatim; death by signal becomes `128 + signal`.
    pub(crate) fn code(self) -> i32 {
        match self {
            ChildExit::Code(code) => code,
            ChildExit::Signal(signal) => 128 + signal,
        }
    }
}

/// Runs exactly one child per call and blocks until it exits.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    restore_signals: bool,
    #[cfg_attr(windows, allow(dead_code))]
    reraise_signals: bool,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put the previous signal dispositions back after the wait.
    ///
    /// A short-lived launcher leaves them ignored; long-lived hosts want them
    /// restored.
    pub fn restore_signals(mut self, restore: bool) -> Self {
        self.restore_signals = restore;
        self
    }

    /// When the child dies from a signal, die from the same signal instead of
    /// returning `128 + signal`. POSIX only.
    pub fn reraise_signals(mut self, reraise: bool) -> Self {
        self.reraise_signals = reraise;
        self
    }

    /// Re-run `executable` with the current command line and return its exit
    /// code, or [`SPAWN_FAILED`] after presenting a fatal error.
    pub fn spawn_and_wait(&self, executable: &Path) -> i32 {
        self.spawn_and_wait_with(executable, CommandLine::current())
    }

    pub fn spawn_and_wait_with(&self, executable: &Path, command_line: CommandLine) -> i32 {
        match self.supervise(executable, &command_line) {
            Ok(code) => code,
            Err(e) => {
                fatal::present(&e.to_string());
                SPAWN_FAILED
            }
        }
    }

    /// Fallible core of [`Supervisor::spawn_and_wait_with`].
    pub fn supervise(
        &self,
        executable: &Path,
        command_line: &CommandLine,
    ) -> Result<i32, SupervisorError> {
        let saved = signals::ignore_termination_signals();

        debug!(executable = %executable.display(), "setting up to run child");
        let result = platform::spawn_and_wait(executable, command_line, &saved);

        if self.restore_signals {
            saved.restore();
        }

        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                debug!(error = %e, "child process supervision failed");
                return Err(e);
            }
        };
        debug!(exit = ?exit, "child process finished");

        #[cfg(unix)]
        {
            if let ChildExit::Signal(signal) = exit {
                if self.reraise_signals {
                    debug!(signal, "re-raising the child's signal");
                    signals::reraise(signal);
                }
            }
        }

        Ok(exit.code())
    }
}

/// [`Supervisor::spawn_and_wait`] with default settings.
pub fn spawn_and_wait(executable: &Path) -> i32 {
    Supervisor::new().spawn_and_wait(executable)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use nix::unistd::getpid;
    use serial_test::serial;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> CommandLine {
        CommandLine::from_args(["sh", "-c", script])
    }

    fn supervisor() -> Supervisor {
        Supervisor::new().restore_signals(true)
    }

    fn current_handler(signal: Signal) -> SigHandler {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: the previous action is reinstalled immediately.
        unsafe {
            let previous = sigaction(signal, &default).unwrap();
            sigaction(signal, &previous).unwrap();
            previous.handler()
        }
    }

    #[test]
    #[serial]
    fn test_exit_code_is_propagated() {
        let code = supervisor().spawn_and_wait_with(Path::new("/bin/sh"), sh("exit 42"));
        assert_eq!(code, 42);
    }

    #[test]
    #[serial]
    fn test_zero_exit_code() {
        let code = supervisor().spawn_and_wait_with(Path::new("/bin/sh"), sh("true"));
        assert_eq!(code, 0);
    }

    #[test]
    #[serial]
    fn test_missing_executable_returns_spawn_failed() {
        let started = Instant::now();
        let code = supervisor().spawn_and_wait_with(
            Path::new("/nonexistent/pkgboot-child"),
            CommandLine::from_args(["pkgboot-child"]),
        );
        assert_eq!(code, SPAWN_FAILED);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_spawn_error_is_typed() {
        let err = supervisor()
            .supervise(
                Path::new("/nonexistent/pkgboot-child"),
                &CommandLine::from_args(["pkgboot-child"]),
            )
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/pkgboot-child"));
    }

    #[test]
    #[serial]
    fn test_interrupt_during_wait_does_not_kill_supervisor() {
        let code = supervisor().spawn_and_wait_with(
            Path::new("/bin/sh"),
            sh("trap '' INT TERM; kill -INT $PPID; kill -TERM $PPID; sleep 0.2; exit 7"),
        );
        assert_eq!(code, 7);
    }

    #[test]
    #[serial]
    fn test_terminate_sent_to_supervisor_reaches_child() {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: the harness's disposition is reinstalled below.
        let previous = unsafe { sigaction(Signal::SIGTERM, &default).unwrap() };

        let supervisor_pid = getpid();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            kill(supervisor_pid, Signal::SIGTERM).unwrap();
        });

        let started = Instant::now();
        let code = supervisor().spawn_and_wait_with(Path::new("/bin/sh"), sh("sleep 5; exit 5"));
        sender.join().unwrap();

        unsafe { sigaction(Signal::SIGTERM, &previous).unwrap() };
        assert_eq!(code, 128 + Signal::SIGTERM as i32);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    #[serial]
    fn test_interrupt_sent_to_supervisor_is_relayed() {
        let code = supervisor().spawn_and_wait_with(
            Path::new("/bin/sh"),
            sh("trap 'exit 9' INT; kill -INT $PPID; sleep 2 & wait; exit 0"),
        );
        assert_eq!(code, 9);
    }

    #[test]
    #[serial]
    fn test_child_keeps_default_signal_dispositions() {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: the harness's disposition is reinstalled below.
        let previous = unsafe { sigaction(Signal::SIGTERM, &default).unwrap() };

        let code = supervisor().spawn_and_wait_with(Path::new("/bin/sh"), sh("kill -TERM $$; exit 0"));

        unsafe { sigaction(Signal::SIGTERM, &previous).unwrap() };
        assert_eq!(code, 128 + Signal::SIGTERM as i32);
    }

    #[test]
    #[serial]
    fn test_arguments_reach_child() {
        let code = supervisor().spawn_and_wait_with(
            Path::new("/bin/sh"),
            CommandLine::from_args(["sh", "-c", "test \"$0:$1\" = \"custom:two words\"", "custom", "two words"]),
        );
        assert_eq!(code, 0);
    }

    #[test]
    #[serial]
    fn test_restore_signals_puts_dispositions_back() {
        let before = (current_handler(Signal::SIGINT), current_handler(Signal::SIGTERM));
        let code = supervisor().spawn_and_wait_with(Path::new("/bin/sh"), sh("exit 0"));
        assert_eq!(code, 0);
        assert_eq!(
            (current_handler(Signal::SIGINT), current_handler(Signal::SIGTERM)),
            before
        );
    }

    #[test]
    #[serial]
    fn test_without_restore_signals_stay_ignored() {
        let before = current_handler(Signal::SIGINT);
        let saved = signals::ignore_termination_signals();
        saved.restore();

        let code = Supervisor::new().spawn_and_wait_with(Path::new("/bin/sh"), sh("exit 0"));
        assert_eq!(code, 0);
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigIgn);

        saved.restore();
        assert_eq!(current_handler(Signal::SIGINT), before);
    }
}
