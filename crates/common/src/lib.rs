//! Shared utilities for pkgboot components

pub mod paths;

pub use paths::{
    appended_archive_path, archive_path, basename, home_dir, manifest_path, ArchiveNaming,
};

/// Environment variables understood by the launcher
pub mod env_vars {
    /// `tracing_subscriber::EnvFilter` directive for launcher diagnostics
    pub const LOG: &str = "PKGBOOT_LOG";
    /// Re-exec marker; holds the parent's home directory
    pub const CHILD: &str = "PKGBOOT_CHILD";
    /// UUIDv7 correlating the parent and child launcher logs
    pub const LAUNCH_ID: &str = "PKGBOOT_LAUNCH_ID";
    /// Set to `1` to keep fatal errors on stderr only
    pub const NO_DIALOG: &str = "PKGBOOT_NO_DIALOG";
}

/// Extension appended to the executable's base name to locate its manifest
pub const MANIFEST_SUFFIX: &str = ".manifest";

/// Three-letter extension of the companion data archive
pub const ARCHIVE_EXTENSION: &str = "pkg";
