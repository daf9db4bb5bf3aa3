//! pkgboot launcher
//!
//! This library is the start-up half of a packaged executable. It prepares the
//! process so bundled DLLs resolve through a side-by-side manifest, then runs
//! the real work in a supervised copy of itself.
//!
//! ## Architecture
//!
//! The launcher works by:
//! 1. Resolving its own path and deriving the home directory and archive path
//! 2. Re-executing itself with the same command line, marked as the child
//! 3. Ignoring termination signals while it waits, so only the child reacts
//! 4. In the child, activating `<exe>.manifest` around the payload
//! 5. Returning the child's exit code verbatim
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pkgboot_launcher::{ArchiveProbe, Launcher};
//!
//! fn main() {
//!     pkgboot_launcher::logging::init();
//!     let code = Launcher::new(ArchiveProbe).run();
//!     std::process::exit(code);
//! }
//! ```

pub use actctx::{
    ActCtxError, ActivationPlatform, ContextManager, ContextScope, NativeActivation,
    NoActivationContexts,
};
pub use context::{LaunchContext, LaunchRole, SelfPath};
pub use init::init_launcher;
pub use launch::{ArchiveProbe, LaunchError, Launcher, Payload, LAUNCH_FAILED};
pub use supervisor::{spawn_and_wait, CommandLine, Supervisor, SupervisorError, SPAWN_FAILED};

pub mod actctx;
mod context;
pub mod fatal;
mod init;
mod launch;
pub mod logging;
pub mod supervisor;
