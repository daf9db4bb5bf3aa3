//! Activation context lifecycle for manifest-based DLL redirection
//!
//! The launcher creates one activation context from `<work_dir><exe>.manifest`,
//! keeps it active while redirected work runs, and tears it down before the
//! process exits. Platforms without activation contexts turn every step into
//! a no-op.

use pkgboot_common::manifest_path;
use std::convert::Infallible;
use std::mem;
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::Kernel32Activation;

/// Activation backend for the platform this binary was built for.
#[cfg(windows)]
pub type NativeActivation = Kernel32Activation;
#[cfg(not(windows))]
pub type NativeActivation = NoActivationContexts;

/// Opaque OS handle of a created activation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawContext(pub isize);

/// Token handed out by activation, required to deactivate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationCookie(pub usize);

#[derive(Debug, Error)]
pub enum ActCtxError {
    #[error("{0} is not exported by kernel32")]
    MissingEntryPoint(&'static str),
    #[error("cannot create activation context from {manifest}: os error {code}")]
    Create { manifest: String, code: u32 },
    #[error("cannot activate activation context: os error {code}")]
    Activate { code: u32 },
    #[error("cannot deactivate activation context: os error {code}")]
    Deactivate { code: u32 },
    /// Another frame pushed a context on top of ours and never popped it.
    #[error("activation context deactivated early")]
    ExpectedRace,
}

/// Entry points needed to create and activate a context.
pub trait EnterOps {
    fn create(&self, manifest: &str) -> Result<RawContext, ActCtxError>;
    fn activate(&self, context: RawContext) -> Result<ActivationCookie, ActCtxError>;
}

/// Entry points needed to deactivate and release a context.
pub trait TeardownOps {
    /// Returns [`ActCtxError::ExpectedRace`] when the context was no longer on
    /// top of the activation stack.
    fn deactivate(&self, context: RawContext, cookie: ActivationCookie) -> Result<(), ActCtxError>;
    fn release(&self, context: RawContext);
}

/// Capability probe for activation contexts.
///
/// A probe error means the capability set is unavailable; the manager treats
/// that as "skip" during teardown and as a soft failure when entering.
pub trait ActivationPlatform {
    type Enter: EnterOps;
    type Teardown: TeardownOps;

    fn supports_activation_contexts(&self) -> bool;
    fn probe_enter(&self) -> Result<Self::Enter, ActCtxError>;
    fn probe_teardown(&self) -> Result<Self::Teardown, ActCtxError>;
}

/// Backend for platforms that have no activation contexts at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActivationContexts;

impl ActivationPlatform for NoActivationContexts {
    type Enter = Infallible;
    type Teardown = Infallible;

    fn supports_activation_contexts(&self) -> bool {
        false
    }

    fn probe_enter(&self) -> Result<Infallible, ActCtxError> {
        Err(ActCtxError::MissingEntryPoint("CreateActCtxW"))
    }

    fn probe_teardown(&self) -> Result<Infallible, ActCtxError> {
        Err(ActCtxError::MissingEntryPoint("DeactivateActCtx"))
    }
}

impl EnterOps for Infallible {
    fn create(&self, _manifest: &str) -> Result<RawContext, ActCtxError> {
        match *self {}
    }

    fn activate(&self, _context: RawContext) -> Result<ActivationCookie, ActCtxError> {
        match *self {}
    }
}

impl TeardownOps for Infallible {
    fn deactivate(&self, _context: RawContext, _cookie: ActivationCookie) -> Result<(), ActCtxError> {
        match *self {}
    }

    fn release(&self, _context: RawContext) {
        match *self {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Inactive,
    Active {
        context: RawContext,
        cookie: ActivationCookie,
    },
}

/// Owner of the launcher's single activation context.
///
/// Lifecycle: `enter` creates and activates, `exit` deactivates and releases.
/// The manager also exits on drop, so a context never outlives its owner.
pub struct ContextManager<P: ActivationPlatform = NativeActivation> {
    platform: P,
    state: ContextState,
}

impl ContextManager<NativeActivation> {
    pub fn native() -> Self {
        Self::new(NativeActivation::default())
    }
}

impl<P: ActivationPlatform> ContextManager<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            state: ContextState::Inactive,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Whether a context is currently created and activated.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ContextState::Active { .. })
    }

    /// Create and activate the context for `<work_dir><basename(self_path)>.manifest`.
    ///
    /// Returns `true` on platforms without activation contexts. A `false`
    /// return leaves nothing active; callers may carry on without redirection.
    pub fn enter(&mut self, work_dir: &str, self_path: &str) -> bool {
        if !self.platform.supports_activation_contexts() {
            debug!("activation contexts unsupported on this platform; skipping");
            return true;
        }

        if self.is_active() {
            warn!("activation context already active; refusing to create a second one");
            return false;
        }

        let manifest = manifest_path(work_dir, self_path);
        debug!(manifest = %manifest, "manifest path");

        let ops = match self.platform.probe_enter() {
            Ok(ops) => ops,
            Err(e) => {
                debug!(error = %e, "cannot find CreateActCtx/ActivateActCtx");
                return false;
            }
        };

        let context = match ops.create(&manifest) {
            Ok(context) => context,
            Err(e) => {
                debug!(error = %e, "error creating the activation context");
                return false;
            }
        };
        debug!("activation context created");

        match ops.activate(context) {
            Ok(cookie) => {
                self.state = ContextState::Active { context, cookie };
                debug!("activation context activated");
                true
            }
            Err(e) => {
                debug!(error = %e, "error activating the activation context");
                self.discard(context);
                false
            }
        }
    }

    /// Deactivate and release the active context. Never fails; problems are
    /// logged and the early-deactivation race is ignored.
    pub fn exit(&mut self) {
        if !self.platform.supports_activation_contexts() {
            return;
        }

        let (context, cookie) = match mem::replace(&mut self.state, ContextState::Inactive) {
            ContextState::Active { context, cookie } => (context, cookie),
            ContextState::Inactive => {
                debug!("no activation context to release");
                return;
            }
        };

        let ops = match self.platform.probe_teardown() {
            Ok(ops) => ops,
            Err(e) => {
                warn!(error = %e, "cannot find ReleaseActCtx/DeactivateActCtx");
                return;
            }
        };

        debug!("deactivating activation context");
        match ops.deactivate(context, cookie) {
            Ok(()) => {}
            Err(ActCtxError::ExpectedRace) => {
                debug!("early deactivation; another frame left the activation context dirty, ignoring")
            }
            Err(e) => warn!(error = %e, "error deactivating activation context"),
        }

        debug!("releasing activation context");
        ops.release(context);
    }

    /// Enter the context for the lifetime of the returned guard.
    pub fn scope(&mut self, work_dir: &str, self_path: &str) -> ContextScope<'_, P> {
        let entered = self.enter(work_dir, self_path);
        ContextScope {
            manager: self,
            entered,
        }
    }

    fn discard(&self, context: RawContext) {
        match self.platform.probe_teardown() {
            Ok(ops) => ops.release(context),
            Err(e) => warn!(error = %e, "cannot release activation context after failed activation"),
        }
    }
}

impl<P: ActivationPlatform> Drop for ContextManager<P> {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Guard returned by [`ContextManager::scope`]; exits the context on drop.
pub struct ContextScope<'a, P: ActivationPlatform> {
    manager: &'a mut ContextManager<P>,
    entered: bool,
}

impl<P: ActivationPlatform> ContextScope<'_, P> {
    /// Result of the `enter` call that opened this scope.
    pub fn entered(&self) -> bool {
        self.entered
    }

    pub fn manager(&self) -> &ContextManager<P> {
        self.manager
    }
}

impl<P: ActivationPlatform> Drop for ContextScope<'_, P> {
    fn drop(&mut self) {
        self.manager.exit();
    }
}
