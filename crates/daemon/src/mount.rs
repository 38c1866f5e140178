//! Mount lifecycle.
//!
//! `mount` wires a store adapter to a fresh filesystem instance and hands
//! the pair to fuser on a background session. [`LiveMount`] owns that
//! session together with the root cancellation token, so unmounting first
//! cancels in-flight store calls and then joins the session thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bucketfs_store::{ObjectStore, DEFAULT_CALL_TIMEOUT};
use fuser::MountOption;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::fuse::{BucketFs, FsOps, NegativeCacheConfig};

#[derive(Debug, Clone)]
pub struct MountConfig {
    pub mountpoint: PathBuf,
    /// Per-call deadline for store operations.
    pub call_timeout: Duration,
    pub negative_cache: NegativeCacheConfig,
}

impl MountConfig {
    pub fn new(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            negative_cache: NegativeCacheConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount point {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to mount filesystem: {0}")]
    Mount(#[from] std::io::Error),
}

/// A mounted filesystem. Dropping it without calling [`unmount`](Self::unmount)
/// unmounts too, but skips the orderly cancellation of in-flight calls.
pub struct LiveMount {
    session: fuser::BackgroundSession,
    shutdown: CancellationToken,
}

impl LiveMount {
    pub fn unmount(self) {
        self.shutdown.cancel();
        self.session.join();
        info!("filesystem unmounted");
    }
}

/// Mount `store` at the configured mount point.
///
/// Must be called from within a tokio runtime; the filesystem captures the
/// runtime handle to serve fuser's worker threads.
pub fn mount(store: Arc<dyn ObjectStore>, config: MountConfig) -> Result<LiveMount, MountError> {
    if !config.mountpoint.is_dir() {
        return Err(MountError::NotADirectory(config.mountpoint));
    }

    let shutdown = CancellationToken::new();
    let ops = Arc::new(FsOps::new(
        store,
        config.call_timeout,
        config.negative_cache.clone(),
        shutdown.clone(),
    ));
    let fs = BucketFs::new(ops, Handle::current());

    let options = [
        MountOption::FSName("bucketfs".to_owned()),
        MountOption::AutoUnmount,
    ];
    let session = fuser::spawn_mount2(fs, &config.mountpoint, &options)?;
    info!(mountpoint = %config.mountpoint.display(), "filesystem mounted");

    Ok(LiveMount { session, shutdown })
}
