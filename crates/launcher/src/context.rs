//! Launch context and environment detection
//!
//! This module resolves the launcher's own executable, derives the companion
//! archive and home directory from it, and works out whether this process is
//! the supervising parent or the re-executed child.

use crate::launch::LaunchError;
use pkgboot_common::{env_vars, home_dir, ArchiveNaming};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The running executable's path in every form callers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfPath {
    path: PathBuf,
    narrow: String,
    /// UTF-16, NUL-terminated
    wide: Vec<u16>,
}

impl SelfPath {
    /// Ask the OS for the current executable.
    pub fn resolve() -> Result<Self, LaunchError> {
        let exe = env::current_exe().map_err(LaunchError::SelfPath)?;

        // Relative components break the child once it changes directory.
        #[cfg(unix)]
        let exe = match exe.canonicalize() {
            Ok(abs) => abs,
            Err(e) => {
                tracing::warn!(path = %exe.display(), error = %e, "cannot make executable path absolute");
                exe
            }
        };

        debug!(path = %exe.display(), "resolved executable path");
        Ok(Self::from_path(exe))
    }

    pub fn from_path(path: PathBuf) -> Self {
        let narrow = path.to_string_lossy().into_owned();

        #[cfg(windows)]
        let wide = {
            use std::os::windows::ffi::OsStrExt;
            path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
        };
        #[cfg(not(windows))]
        let wide = narrow.encode_utf16().chain(std::iter::once(0)).collect();

        Self { path, narrow, wide }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn narrow(&self) -> &str {
        &self.narrow
    }

    /// NUL-terminated UTF-16 form, as wide-character OS calls expect.
    pub fn wide(&self) -> &[u16] {
        &self.wide
    }
}

/// Which half of the re-exec pair this process is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRole {
    /// First invocation: supervises a re-executed copy of itself.
    Parent,
    /// Re-executed child; `work_dir` is the directory handed down by the parent.
    Child { work_dir: String },
}

/// Everything the launcher derives at startup.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub self_path: SelfPath,
    /// Directory of the executable, trailing separator included
    pub home_dir: String,
    /// Companion data archive next to the executable
    pub archive_path: String,
    /// Correlates parent and child diagnostics
    pub launch_id: String,
    pub role: LaunchRole,
}

impl LaunchContext {
    /// Resolve the executable and read the role from the environment.
    pub fn from_current_exe() -> Result<Self, LaunchError> {
        Ok(Self::from_env(SelfPath::resolve()?))
    }

    pub fn from_env(self_path: SelfPath) -> Self {
        let role = match env::var(env_vars::CHILD) {
            Ok(work_dir) if !work_dir.is_empty() => LaunchRole::Child { work_dir },
            _ => LaunchRole::Parent,
        };
        let launch_id =
            env::var(env_vars::LAUNCH_ID).unwrap_or_else(|_| uuid::Uuid::now_v7().to_string());

        Self::new(self_path, role, launch_id)
    }

    pub fn new(self_path: SelfPath, role: LaunchRole, launch_id: String) -> Self {
        let home_dir = home_dir(self_path.narrow());
        let archive_path = ArchiveNaming::native().derive(self_path.narrow());

        Self {
            self_path,
            home_dir,
            archive_path,
            launch_id,
            role,
        }
    }

    /// Directory the activation context manifest is looked up in.
    pub fn work_dir(&self) -> &str {
        match &self.role {
            LaunchRole::Child { work_dir } => work_dir,
            LaunchRole::Parent => &self.home_dir,
        }
    }

    /// Mark the environment so the re-executed child knows its role.
    pub fn setup_child_env(&self) {
        env::set_var(env_vars::CHILD, &self.home_dir);
        env::set_var(env_vars::LAUNCH_ID, &self.launch_id);
    }

    /// Drop the child marker once the role is known, so programs started by
    /// the payload run their own launch from scratch.
    pub fn clear_child_env(&self) {
        env::remove_var(env_vars::CHILD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_path_forms_agree() {
        let path = SelfPath::from_path(PathBuf::from("/opt/apps/tool"));
        assert_eq!(path.narrow(), "/opt/apps/tool");
        assert_eq!(path.as_path(), Path::new("/opt/apps/tool"));
        assert_eq!(path.wide().last(), Some(&0));
        assert_eq!(
            String::from_utf16(&path.wide()[..path.wide().len() - 1]).unwrap(),
            "/opt/apps/tool"
        );
    }

    #[test]
    fn test_resolve_finds_current_executable() {
        let path = SelfPath::resolve().unwrap();
        assert!(path.as_path().is_absolute());
        assert!(path.as_path().exists());
    }

    #[test]
    fn test_context_derives_home_and_archive() {
        let ctx = LaunchContext::new(
            SelfPath::from_path(PathBuf::from("/opt/apps/tool")),
            LaunchRole::Parent,
            "launch-1".to_string(),
        );
        assert_eq!(ctx.home_dir, "/opt/apps/");
        #[cfg(not(windows))]
        assert_eq!(ctx.archive_path, "/opt/apps/tool.pkg");
        assert_eq!(ctx.work_dir(), "/opt/apps/");
    }

    #[test]
    fn test_child_role_uses_inherited_work_dir() {
        let ctx = LaunchContext::new(
            SelfPath::from_path(PathBuf::from("/opt/apps/tool")),
            LaunchRole::Child {
                work_dir: "/tmp/_extracted/".to_string(),
            },
            "launch-1".to_string(),
        );
        assert_eq!(ctx.work_dir(), "/tmp/_extracted/");
        assert_eq!(ctx.home_dir, "/opt/apps/");
    }
}
