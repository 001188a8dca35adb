//! Live FUSE mounts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuser::{BackgroundSession, MountOption};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::info;

use super::host::FuseHost;
use crate::config::FsOptions;
use crate::lifecycle::{MountError, ShutdownHandle};
use crate::vfs::EmporousFs;

pub const FS_NAME: &str = "emporousfs";

/// A mounted filesystem.
///
/// Unmounting is idempotent and also happens on drop, so the mount is
/// released on every exit path.
pub struct LiveMount {
    mount_point: PathBuf,
    session: Mutex<Option<BackgroundSession>>,
    shutdown: ShutdownHandle,
}

impl std::fmt::Debug for LiveMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMount")
            .field("mount_point", &self.mount_point)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

impl LiveMount {
    pub fn mount_options() -> Vec<MountOption> {
        vec![
            MountOption::RO,
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::DefaultPermissions,
            MountOption::AutoUnmount,
        ]
    }

    /// Mount `fs` at `mount_point` and serve it on a background thread
    pub fn mount(
        fs: Arc<EmporousFs>,
        mount_point: &Path,
        options: &FsOptions,
        runtime: Handle,
    ) -> Result<Self, MountError> {
        let shutdown = fs.shutdown_handle().clone();
        let host = FuseHost::new(fs, runtime, options.attr_ttl);

        let session = fuser::spawn_mount2(host, mount_point, &Self::mount_options())?;
        info!(mount_point = %mount_point.display(), "mounted");

        Ok(Self {
            mount_point: mount_point.to_path_buf(),
            session: Mutex::new(Some(session)),
            shutdown,
        })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn is_mounted(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    /// Cancel in-flight reads and unmount. Returns whether this call
    /// unmounted.
    pub fn unmount(&self) -> bool {
        let Some(session) = self.session.lock().take() else {
            return false;
        };
        self.shutdown.shutdown();
        drop(session);
        info!(mount_point = %self.mount_point.display(), "unmounted");
        true
    }
}

impl Drop for LiveMount {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("received shutdown signal");
    Ok(())
}
