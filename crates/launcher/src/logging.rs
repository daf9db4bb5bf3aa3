//! Diagnostic logging setup.
//!
//! Launcher diagnostics go to stderr only: stdout belongs to the child.
//! Nothing is printed unless `PKGBOOT_LOG` enables it (e.g. `PKGBOOT_LOG=debug`).

use pkgboot_common::env_vars;
use std::io;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default directive when `PKGBOOT_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "off";

/// Install the global subscriber. Safe to call more than once.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_env(env_vars::LOG).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
