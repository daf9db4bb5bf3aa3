//! Termination-signal dispositions for the supervising process.
//!
//! While the child runs, abort/interrupt/terminate/break are ignored here so
//! that only the child reacts to them. On POSIX, interrupt and terminate sent
//! to the supervisor's own pid are relayed to the child once it exists.

use tracing::debug;

#[cfg(unix)]
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, Ordering};

// SIGQUIT is what a terminal sends for the break key on POSIX.
#[cfg(unix)]
const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGABRT,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
];

// Signals relayed to the child; the rest stay ignored.
#[cfg(unix)]
const FORWARDED_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

// Pid of the running child, 0 when there is none.
#[cfg(unix)]
static FORWARD_TO: AtomicI32 = AtomicI32::new(0);

#[cfg(windows)]
const SIGBREAK: libc::c_int = 21;

#[cfg(windows)]
const TERMINATION_SIGNALS: [libc::c_int; 4] = [libc::SIGABRT, libc::SIGINT, libc::SIGTERM, SIGBREAK];

/// Dispositions in effect before [`ignore_termination_signals`] ran.
#[derive(Debug)]
pub(crate) struct SavedDispositions {
    #[cfg(unix)]
    previous: Vec<(Signal, SigAction)>,
    #[cfg(windows)]
    previous: Vec<(libc::c_int, libc::sighandler_t)>,
}

#[cfg(unix)]
pub(crate) fn ignore_termination_signals() -> SavedDispositions {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let previous = TERMINATION_SIGNALS
        .iter()
        .filter_map(|&signal| {
            // SAFETY: SIG_IGN runs no code in signal context.
            match unsafe { sigaction(signal, &ignore) } {
                Ok(previous) => Some((signal, previous)),
                Err(e) => {
                    debug!(?signal, error = %e, "cannot ignore signal");
                    None
                }
            }
        })
        .collect();

    SavedDispositions { previous }
}

#[cfg(windows)]
pub(crate) fn ignore_termination_signals() -> SavedDispositions {
    let previous = TERMINATION_SIGNALS
        .iter()
        .filter_map(|&signal| {
            // SAFETY: CRT signal() with SIG_IGN installs no Rust code.
            let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
            if previous == libc::SIG_ERR {
                debug!(signal, "cannot ignore signal");
                None
            } else {
                Some((signal, previous))
            }
        })
        .collect();

    SavedDispositions { previous }
}

impl SavedDispositions {
    /// Reinstall the saved dispositions.
    pub(crate) fn restore(&self) {
        for (signal, previous) in &self.previous {
            #[cfg(unix)]
            {
                // SAFETY: reinstalls an action previously returned by sigaction.
                if let Err(e) = unsafe { sigaction(*signal, previous) } {
                    debug!(?signal, error = %e, "cannot restore signal disposition");
                }
            }

            #[cfg(windows)]
            {
                // SAFETY: reinstalls a handler previously returned by signal().
                unsafe { libc::signal(*signal, *previous) };
            }
        }
    }

    /// Dispositions the child should start with. Signals ignored before the
    /// supervisor took over stay ignored; the rest go back to default.
    #[cfg(unix)]
    pub(crate) fn child_dispositions(&self) -> Vec<(Signal, SigHandler)> {
        self.previous
            .iter()
            .map(|(signal, previous)| {
                let handler = match previous.handler() {
                    SigHandler::SigIgn => SigHandler::SigIgn,
                    _ => SigHandler::SigDfl,
                };
                (*signal, handler)
            })
            .collect()
    }
}

#[cfg(unix)]
extern "C" fn forward_signal(signal: nix::libc::c_int) {
    let pid = FORWARD_TO.load(Ordering::SeqCst);
    if pid <= 0 {
        return;
    }
    if let Ok(signal) = Signal::try_from(signal) {
        // kill(2) is async-signal-safe.
        let _ = kill(Pid::from_raw(pid), signal);
    }
}

/// Relays interrupt and terminate to a running child. Dropping it puts the
/// relayed signals back to ignored.
#[cfg(unix)]
#[derive(Debug)]
pub(crate) struct ForwardGuard {
    installed: Vec<Signal>,
}

#[cfg(unix)]
pub(crate) fn forward_to_child(pid: u32) -> ForwardGuard {
    FORWARD_TO.store(pid as i32, Ordering::SeqCst);

    let relay = SigAction::new(
        SigHandler::Handler(forward_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let installed = FORWARDED_SIGNALS
        .iter()
        .filter_map(|&signal| {
            // SAFETY: the handler only reads an atomic and calls kill.
            match unsafe { sigaction(signal, &relay) } {
                Ok(_) => Some(signal),
                Err(e) => {
                    debug!(?signal, error = %e, "cannot relay signal to child");
                    None
                }
            }
        })
        .collect();

    ForwardGuard { installed }
}

#[cfg(unix)]
impl Drop for ForwardGuard {
    fn drop(&mut self) {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        for &signal in &self.installed {
            // SAFETY: SIG_IGN runs no code in signal context.
            if let Err(e) = unsafe { sigaction(signal, &ignore) } {
                debug!(?signal, error = %e, "cannot stop relaying signal");
            }
        }
        FORWARD_TO.store(0, Ordering::SeqCst);
    }
}

/// Die from `signal` the way the child did. Returns only when the signal's
/// default action does not terminate the process.
#[cfg(unix)]
pub(crate) fn reraise(signal: i32) {
    let Ok(signal) = Signal::try_from(signal) else {
        return;
    };
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installs the default action only.
    if let Err(e) = unsafe { sigaction(signal, &default) } {
        debug!(?signal, error = %e, "cannot reset signal before re-raising");
    }
    if let Err(e) = nix::sys::signal::raise(signal) {
        debug!(?signal, error = %e, "cannot re-raise child's signal");
    }
}

/// Install `dispositions` in a freshly forked child, before exec.
#[cfg(unix)]
pub(crate) fn apply_in_child(dispositions: &[(Signal, SigHandler)]) -> io::Result<()> {
    for &(signal, handler) in dispositions {
        // SAFETY: only SIG_DFL/SIG_IGN are installed; sigaction is async-signal-safe.
        unsafe { nix::sys::signal::signal(signal, handler) }?;
    }
    Ok(())
}
