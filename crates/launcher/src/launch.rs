//! Main launcher flow
//!
//! The first invocation resolves itself, marks the environment and re-runs
//! itself as a supervised child. The child enters the activation context,
//! runs the payload, and leaves the context before returning its exit code.

use crate::actctx::{ActivationPlatform, ContextManager, NativeActivation};
use crate::context::{LaunchContext, LaunchRole};
use crate::fatal;
use crate::init::init_launcher;
use crate::supervisor::Supervisor;
use anyhow::Context as _;
use std::fs::File;
use std::io;
use thiserror::Error;
use tracing::{debug, info, info_span};

/// Exit code when the launcher cannot run the payload or the child at all.
pub const LAUNCH_FAILED: i32 = -1;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("System error - unable to load!")]
    SelfPath(#[source] io::Error),
    #[error("{0:#}")]
    Payload(#[source] anyhow::Error),
}

/// Work done by the re-executed child while the activation context is active.
pub trait Payload {
    fn run(&self, ctx: &LaunchContext) -> anyhow::Result<i32>;
}

impl<F> Payload for F
where
    F: Fn(&LaunchContext) -> anyhow::Result<i32>,
{
    fn run(&self, ctx: &LaunchContext) -> anyhow::Result<i32> {
        self(ctx)
    }
}

/// Payload that checks the companion archive can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveProbe;

impl Payload for ArchiveProbe {
    fn run(&self, ctx: &LaunchContext) -> anyhow::Result<i32> {
        let archive = File::open(&ctx.archive_path)
            .with_context(|| format!("Cannot open archive: {}", ctx.archive_path))?;
        let metadata = archive
            .metadata()
            .with_context(|| format!("Cannot open archive: {}", ctx.archive_path))?;
        anyhow::ensure!(metadata.is_file(), "Cannot open archive: {}", ctx.archive_path);

        info!(archive = %ctx.archive_path, bytes = metadata.len(), "archive found");
        Ok(0)
    }
}

pub struct Launcher<P, A = NativeActivation> {
    payload: P,
    activation: A,
    supervisor: Supervisor,
}

impl<P: Payload> Launcher<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            activation: NativeActivation::default(),
            supervisor: Supervisor::new(),
        }
    }
}

impl<P: Payload, A: ActivationPlatform> Launcher<P, A> {
    /// Swap the activation backend (used by embedding hosts and tests).
    pub fn with_activation<B: ActivationPlatform>(self, activation: B) -> Launcher<P, B> {
        Launcher {
            payload: self.payload,
            activation,
            supervisor: self.supervisor,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Run the launcher and return the exit code the process should report.
    pub fn run(self) -> i32 {
        init_launcher();

        let ctx = match LaunchContext::from_current_exe() {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(error = ?e, "cannot resolve executable path");
                fatal::present(&e.to_string());
                return LAUNCH_FAILED;
            }
        };

        self.run_in(&ctx)
    }

    /// Run with an already resolved context.
    pub fn run_in(self, ctx: &LaunchContext) -> i32 {
        let span = info_span!("launch", launch_id = %ctx.launch_id);
        let _enter = span.enter();

        debug!(
            self_path = %ctx.self_path.narrow(),
            home_dir = %ctx.home_dir,
            archive = %ctx.archive_path,
            role = ?ctx.role,
            "launch context"
        );

        match ctx.role {
            LaunchRole::Parent => {
                ctx.setup_child_env();
                self.supervisor.spawn_and_wait(ctx.self_path.as_path())
            }
            LaunchRole::Child { .. } => {
                ctx.clear_child_env();
                self.run_payload(ctx)
            }
        }
    }

    fn run_payload(self, ctx: &LaunchContext) -> i32 {
        let mut contexts = ContextManager::new(self.activation);
        let scope = contexts.scope(ctx.work_dir(), ctx.self_path.narrow());
        if !scope.entered() {
            debug!("continuing without activation context");
        }

        let code = match self.payload.run(ctx).map_err(LaunchError::Payload) {
            Ok(code) => code,
            Err(e) => {
                fatal::present(&e.to_string());
                LAUNCH_FAILED
            }
        };

        drop(scope);
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actctx::testing::{Call, RecordingPlatform};
    use crate::actctx::RawContext;
    use crate::context::SelfPath;
    use pkgboot_common::env_vars;
    use serial_test::serial;
    use std::cell::RefCell;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn child_context(self_path: PathBuf) -> LaunchContext {
        let home = pkgboot_common::home_dir(&self_path.to_string_lossy());
        LaunchContext::new(
            SelfPath::from_path(self_path),
            LaunchRole::Child { work_dir: home },
            "test-launch".to_string(),
        )
    }

    #[test]
    fn test_child_runs_payload_inside_activation_context() {
        let platform = RecordingPlatform::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let observer = platform.clone();
        let seen_by_payload = Rc::clone(&seen);
        let payload = move |_: &LaunchContext| -> anyhow::Result<i32> {
            *seen_by_payload.borrow_mut() = observer.calls();
            Ok(3)
        };

        let ctx = child_context(PathBuf::from("/opt/apps/tool"));
        let code = Launcher::new(payload)
            .with_activation(platform.clone())
            .run_in(&ctx);

        assert_eq!(code, 3);
        assert!(seen
            .borrow()
            .contains(&Call::Create("/opt/apps/tool.manifest".to_string())));
        assert!(!seen.borrow().iter().any(|c| matches!(c, Call::Release(_))));
        assert_eq!(platform.releases(), vec![RawContext(101)]);
    }

    #[test]
    #[serial]
    fn test_child_marker_is_not_inherited_by_payload() {
        env::set_var(env_vars::CHILD, "/opt/apps/");
        let ctx = LaunchContext::from_env(SelfPath::from_path(PathBuf::from("/opt/apps/tool")));
        assert_eq!(
            ctx.role,
            LaunchRole::Child {
                work_dir: "/opt/apps/".to_string()
            }
        );

        let payload = |_: &LaunchContext| -> anyhow::Result<i32> {
            Ok(if env::var_os(env_vars::CHILD).is_some() { 1 } else { 0 })
        };
        let code = Launcher::new(payload)
            .with_activation(RecordingPlatform::default())
            .run_in(&ctx);

        let leaked = env::var_os(env_vars::CHILD);
        env::remove_var(env_vars::CHILD);
        env::remove_var(env_vars::LAUNCH_ID);
        assert_eq!(code, 0);
        assert!(leaked.is_none());
    }

    #[test]
    fn test_payload_error_maps_to_launch_failed_and_releases_context() {
        let platform = RecordingPlatform::default();
        let payload =
            |_: &LaunchContext| -> anyhow::Result<i32> { anyhow::bail!("payload exploded") };

        let ctx = child_context(PathBuf::from("/opt/apps/tool"));
        let code = Launcher::new(payload)
            .with_activation(platform.clone())
            .run_in(&ctx);

        assert_eq!(code, LAUNCH_FAILED);
        assert_eq!(platform.releases(), vec![RawContext(101)]);
    }

    #[test]
    fn test_payload_runs_when_context_cannot_be_entered() {
        let platform = RecordingPlatform::with(|s| s.fail_create = true);
        let payload = |_: &LaunchContext| -> anyhow::Result<i32> { Ok(0) };

        let ctx = child_context(PathBuf::from("/opt/apps/tool"));
        let code = Launcher::new(payload)
            .with_activation(platform.clone())
            .run_in(&ctx);

        assert_eq!(code, 0);
        assert!(platform.releases().is_empty());
    }

    #[test]
    fn test_archive_probe_finds_archive() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("tool");
        fs::write(&exe, b"").unwrap();
        let ctx = child_context(exe);
        fs::write(&ctx.archive_path, b"archive bytes").unwrap();

        assert_eq!(ArchiveProbe.run(&ctx).unwrap(), 0);
    }

    #[test]
    fn test_archive_probe_reports_missing_archive() {
        let temp = TempDir::new().unwrap();
        let ctx = child_context(temp.path().join("tool"));

        let err = ArchiveProbe.run(&ctx).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot open archive"));
    }

    #[test]
    fn test_launch_error_messages() {
        let err = LaunchError::SelfPath(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.to_string(), "System error - unable to load!");

        let err = LaunchError::Payload(anyhow::anyhow!("inner").context("outer"));
        assert_eq!(err.to_string(), "outer: inner");
    }
}
