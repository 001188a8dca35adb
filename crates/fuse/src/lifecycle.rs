//! Mount lifecycle: prepare the projection, run it, and tear it down.
//!
//! Preparation resolves the collection and builds the whole tree before
//! anything is exposed, so a mount either serves a complete index or does
//! not start. Teardown goes through a [`ShutdownHandle`] that cancels
//! in-flight reads and drops every open session exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Digest, Matcher, RegistryClient, RegistryError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::FsOptions;
use crate::vfs::{ContentSource, EmporousFs, TreeBuilder, TreeError};

/// Mount status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl MountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountStatus::Stopped => "stopped",
            MountStatus::Starting => "starting",
            MountStatus::Running => "running",
            MountStatus::Stopping => "stopping",
            MountStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for MountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that prevent a mount from starting
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("failed to resolve collection: {0}")]
    Resolution(#[source] RegistryError),
    #[error("failed to traverse collection: {0}")]
    Traversal(#[source] RegistryError),
    #[error("collection graph contains a cycle at {0}")]
    Cycle(Digest),
    #[error("collection {0} has no root")]
    EmptyCollection(String),
    #[error("mount io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TreeError> for MountError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::EmptyCollection(reference) => MountError::EmptyCollection(reference),
            TreeError::Traversal(source) => MountError::Traversal(source),
            TreeError::Cycle(digest) => MountError::Cycle(digest),
        }
    }
}

type Hook = Box<dyn FnOnce() + Send>;

struct ShutdownInner {
    token: CancellationToken,
    status: Mutex<MountStatus>,
    hooks: Mutex<Vec<Hook>>,
    done: AtomicBool,
}

/// Shared teardown control for one mount.
///
/// Clones refer to the same mount. The first [`shutdown`](Self::shutdown)
/// cancels the token, runs the registered hooks and marks the mount stopped;
/// later calls do nothing.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("status", &self.status())
            .field("cancelled", &self.is_shutdown())
            .finish()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                token: CancellationToken::new(),
                status: Mutex::new(MountStatus::Starting),
                hooks: Mutex::new(Vec::new()),
                done: AtomicBool::new(false),
            }),
        }
    }

    /// Token cancelled when the mount shuts down
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn status(&self) -> MountStatus {
        *self.inner.status.lock()
    }

    pub fn set_status(&self, status: MountStatus) {
        *self.inner.status.lock() = status;
    }

    /// Register teardown work. Hooks registered after shutdown run at once.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        if self.inner.done.load(Ordering::SeqCst) {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Shut the mount down. Returns whether this call did the work.
    pub fn shutdown(&self) -> bool {
        let hooks = {
            let mut hooks = self.inner.hooks.lock();
            if self.inner.done.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *hooks)
        };
        self.set_status(MountStatus::Stopping);
        self.inner.token.cancel();

        for hook in hooks {
            hook();
        }

        self.set_status(MountStatus::Stopped);
        info!("mount shut down");
        true
    }

    /// Resolves once the mount is shut down
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

/// Prepares filesystems for collections served by one client
#[derive(Debug)]
pub struct Mounter {
    client: Arc<dyn RegistryClient>,
    options: FsOptions,
}

impl Mounter {
    pub fn new(client: Arc<dyn RegistryClient>, options: FsOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    /// Resolve `reference`, build the full tree and return a ready adapter.
    ///
    /// Nothing is exposed on failure.
    pub async fn prepare(
        &self,
        reference: &str,
        matcher: Option<Arc<dyn Matcher>>,
    ) -> Result<EmporousFs, MountError> {
        let shutdown = ShutdownHandle::new();
        match self.build(reference, matcher, shutdown.clone()).await {
            Ok(fs) => {
                shutdown.set_status(MountStatus::Running);
                info!(
                    reference,
                    entries = fs.tree().len(),
                    status = %shutdown.status(),
                    "collection ready"
                );
                Ok(fs)
            }
            Err(e) => {
                shutdown.set_status(MountStatus::Error);
                error!(reference, error = %e, "failed to prepare mount");
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        reference: &str,
        matcher: Option<Arc<dyn Matcher>>,
        shutdown: ShutdownHandle,
    ) -> Result<EmporousFs, MountError> {
        info!(reference, "resolving collection");
        let collection = self
            .client
            .resolve(reference)
            .await
            .map_err(MountError::Resolution)?;

        let tree = TreeBuilder::new(self.client.clone())
            .with_matcher(matcher)
            .build(&collection)
            .await?;

        let content = ContentSource::new(self.client.clone(), self.options.cache.clone());
        Ok(EmporousFs::new(Arc::new(tree), Arc::new(content), shutdown))
    }
}
