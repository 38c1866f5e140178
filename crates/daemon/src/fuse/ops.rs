//! The request handlers behind the FUSE surface.
//!
//! Each handler composes the path codec and the object store to satisfy one
//! kernel operation, mutating the inode tree so that tree, kernel cache,
//! and bucket stay consistent. Handlers translate store failures into
//! [`FsError`] locally and never retry; suspension points are exactly the
//! store calls, each run under a fresh cancellable, deadlined context.

use std::sync::Arc;
use std::time::Duration;

use bucketfs_store::{CallContext, DirectoryInfo, ObjectStore, StoreError};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::{NegativeCache, NegativeCacheConfig};
use super::inode_tree::{FileTimes, InodeTree, NodeRef, TreeError};
use super::path_codec::{classify_children, full_path, listing_prefix, ChildEntry, EntryKind};

/// Fixed permission bits; the daemon does not enforce POSIX permissions.
pub const FILE_PERM: u16 = 0o644;
pub const DIR_PERM: u16 = 0o777;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,
    #[error("permission denied")]
    Denied,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("entry already exists")]
    Exists,
    #[error("invalid name")]
    InvalidName,
    #[error("internal error")]
    Internal,
}

impl FsError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Denied => libc::EACCES,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::Exists => libc::EEXIST,
            FsError::InvalidName => libc::EINVAL,
            FsError::Internal => libc::EIO,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => FsError::NotFound,
            StoreError::Denied(_) => FsError::Denied,
            // Transient failure is indistinguishable from absence here.
            StoreError::Unavailable(_) => FsError::NotFound,
            StoreError::AlreadyExists => FsError::Exists,
            StoreError::InvalidArgument(_) => FsError::InvalidName,
        }
    }
}

impl From<TreeError> for FsError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotADirectory => FsError::NotDirectory,
            TreeError::NoSuchChild => FsError::NotFound,
            TreeError::Occupied => FsError::Exists,
        }
    }
}

/// Kernel-visible attributes, synthesized from node state alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

pub struct FsOps {
    store: Arc<dyn ObjectStore>,
    tree: InodeTree,
    negative: NegativeCache,
    call_timeout: Duration,
    shutdown: CancellationToken,
}

impl FsOps {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        call_timeout: Duration,
        negative: NegativeCacheConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            tree: InodeTree::new(),
            negative: NegativeCache::new(negative),
            call_timeout,
            shutdown,
        }
    }

    pub fn tree(&self) -> &InodeTree {
        &self.tree
    }

    fn call_ctx(&self) -> CallContext {
        CallContext::new(self.shutdown.child_token(), self.call_timeout)
    }

    /// Attributes for any node. Directories report their aggregate info
    /// when a snapshot is known, zeros otherwise.
    pub fn getattr(&self, node: &NodeRef) -> NodeAttr {
        match node.file() {
            Some(file) => {
                let times = file.times();
                NodeAttr {
                    ino: node.ino(),
                    kind: EntryKind::File,
                    size: file.size(),
                    perm: (file.mode() & 0o7777) as u16,
                    mtime: times.mtime,
                    atime: times.atime,
                    ctime: times.ctime,
                }
            }
            None => {
                let info = node.dir().and_then(|d| d.info());
                let mtime = info.map(|i| i.last_modified).unwrap_or(0);
                NodeAttr {
                    ino: node.ino(),
                    kind: EntryKind::Directory,
                    size: info.map(|i| i.sum_bytes).unwrap_or(0),
                    perm: DIR_PERM,
                    mtime,
                    atime: mtime,
                    ctime: mtime,
                }
            }
        }
    }

    /// Resolve one name under a directory.
    ///
    /// An already-attached child is returned as-is, so repeated lookups
    /// address the same node for as long as the kernel caches the entry.
    pub async fn lookup(&self, parent: &NodeRef, name: &str) -> Result<NodeRef, FsError> {
        validate_name(name)?;
        if let Some(child) = self.tree.get_child(parent, name) {
            self.tree.retain(&child);
            return Ok(child);
        }
        if self.negative.is_negative(parent.ino(), name) {
            return Err(FsError::NotFound);
        }

        let key = full_path(&self.tree.path(parent), name);
        let ctx = self.call_ctx();

        if self.store.is_directory(&ctx, &key).await? {
            let info = match self.store.directory_info(&ctx, &key).await {
                Ok(info) => Some(info),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            };
            let node = self
                .tree
                .add_child(parent, name, self.tree.new_dir(name, info))?;
            self.tree.retain(&node);
            debug!(key = %key, ino = node.ino(), "resolved directory");
            return Ok(node);
        }

        match self.store.get(&ctx, &key).await {
            Ok(obj) => {
                let mtime = obj.last_modified;
                let body = obj.into_bytes().await?;
                let size = body.len();
                let file = self
                    .tree
                    .new_file(name, body, FileTimes::all(mtime), FILE_PERM as u32);
                let node = self.tree.add_child(parent, name, file)?;
                self.tree.retain(&node);
                debug!(key = %key, ino = node.ino(), size = size, "resolved file");
                Ok(node)
            }
            Err(StoreError::NotFound) => {
                self.negative.insert(parent.ino(), name);
                Err(FsError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate a directory's immediate children.
    ///
    /// Attached children short-circuit the store (they are the fresher
    /// truth after mutations) and keep the kind recorded at attach time.
    /// Listing results are not attached here; attachment happens on the
    /// per-name lookups that follow, keeping one source of truth.
    pub async fn readdir(&self, node: &NodeRef) -> Result<Vec<ChildEntry>, FsError> {
        let dir = node.dir().ok_or(FsError::NotDirectory)?;
        if dir.empty_marker_seen() {
            return Ok(Vec::new());
        }

        let attached = dir.children();
        if !attached.is_empty() {
            let mut entries: Vec<ChildEntry> = attached
                .into_iter()
                .map(|(name, child)| ChildEntry {
                    name,
                    kind: child.kind(),
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(entries);
        }

        let prefix = listing_prefix(&self.tree.path(node));
        let ctx = self.call_ctx();
        let listing = self.store.list(&ctx, &prefix).await?;

        // A lone marker means the directory exists and is empty; it must
        // not surface as a child named "".
        if listing.len() == 1 && listing[0] == prefix {
            dir.set_empty_marker_seen(true);
            return Ok(Vec::new());
        }

        Ok(classify_children(&listing, &prefix))
    }

    /// Create an empty regular file.
    pub async fn create(&self, parent: &NodeRef, name: &str, mode: u32) -> Result<NodeRef, FsError> {
        validate_name(name)?;
        let key = full_path(&self.tree.path(parent), name);
        let ctx = self.call_ctx();

        let put = self.store.put_empty(&ctx, &key).await.map_err(|e| {
            warn!(key = %key, error = %e, "create failed");
            FsError::Denied
        })?;

        // Only permission bits survive; everything else (type, immutable
        // and friends) is fixed by the daemon.
        let mode = (mode & 0o7777) | FILE_PERM as u32;
        let file = self
            .tree
            .new_file(name, Bytes::new(), FileTimes::all(put.last_modified), mode);
        let node = self.tree.add_child(parent, name, file)?;
        self.tree.retain(&node);
        self.negative.invalidate(parent.ino(), name);
        dir_mutated(parent);
        debug!(key = %key, ino = node.ino(), "created file");
        Ok(node)
    }

    /// Remove a regular file.
    pub async fn unlink(&self, parent: &NodeRef, name: &str) -> Result<(), FsError> {
        validate_name(name)?;
        let key = full_path(&self.tree.path(parent), name);
        let ctx = self.call_ctx();

        match self.store.delete(&ctx, &key).await {
            // Absence on delete is success: the object is gone either way.
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "unlink failed");
                return Err(FsError::NotFound);
            }
        }
        self.tree.remove_child(parent, name);
        debug!(key = %key, "unlinked file");
        Ok(())
    }

    /// Create an empty directory by writing its marker object.
    pub async fn mkdir(&self, parent: &NodeRef, name: &str, _mode: u32) -> Result<NodeRef, FsError> {
        validate_name(name)?;
        let marker_key = format!("{}/", full_path(&self.tree.path(parent), name));
        let ctx = self.call_ctx();

        let put = self.store.put_empty(&ctx, &marker_key).await.map_err(|e| {
            warn!(key = %marker_key, error = %e, "mkdir failed");
            FsError::NotFound
        })?;

        let info = DirectoryInfo {
            sum_bytes: 0,
            last_modified: put.last_modified,
        };
        let node = self
            .tree
            .add_child(parent, name, self.tree.new_dir(name, Some(info)))?;
        self.tree.retain(&node);
        self.negative.invalidate(parent.ino(), name);
        dir_mutated(parent);
        debug!(key = %marker_key, ino = node.ino(), "created directory");
        Ok(node)
    }

    /// Remove an empty directory and its marker.
    ///
    /// The kernel has already unlinked every descendant, so anything beyond
    /// the marker under the directory's prefix means it is not empty.
    pub async fn rmdir(&self, parent: &NodeRef, name: &str) -> Result<(), FsError> {
        validate_name(name)?;
        let key = full_path(&self.tree.path(parent), name);
        let marker = format!("{key}/");
        let ctx = self.call_ctx();

        let listing = self.store.list(&ctx, &marker).await?;
        if !(listing.len() == 1 && listing[0] == marker) {
            return Err(FsError::NotFound);
        }

        match self.store.delete(&ctx, &marker).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                warn!(key = %marker, error = %e, "rmdir failed");
                return Err(FsError::NotFound);
            }
        }
        self.tree.remove_child(parent, name);
        debug!(key = %marker, "removed directory");
        Ok(())
    }

    /// Move an entry, in-tree first, then reconcile the store.
    ///
    /// Only the key moves on the store side: the destination object is
    /// created empty. Regular-file bodies stay with the in-memory node, so
    /// the store copy is faithful only for empty files and directory
    /// markers.
    pub async fn rename(
        &self,
        parent: &NodeRef,
        name: &str,
        new_parent: &NodeRef,
        new_name: &str,
    ) -> Result<(), FsError> {
        validate_name(name)?;
        validate_name(new_name)?;

        let old_path = full_path(&self.tree.path(parent), name);
        let moved = self
            .tree
            .move_child(parent, name, new_parent, new_name)
            .map_err(|_| FsError::NotFound)?;
        let new_path = full_path(&self.tree.path(new_parent), new_name);

        let (old_key, new_key) = match moved.kind() {
            EntryKind::Directory => (format!("{old_path}/"), format!("{new_path}/")),
            EntryKind::File => (old_path, new_path),
        };

        let ctx = self.call_ctx();
        match self.store.delete(&ctx, &old_key).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                // The in-tree move already happened; tree and store diverge
                // until the kernel re-resolves the paths.
                warn!(old = %old_key, new = %new_key, error = %e, "rename did not delete source");
                return Err(FsError::NotFound);
            }
        }
        if let Err(e) = self.store.put_empty(&ctx, &new_key).await {
            warn!(old = %old_key, new = %new_key, error = %e, "rename did not create destination");
            return Err(FsError::NotFound);
        }

        self.negative.invalidate(new_parent.ino(), new_name);
        dir_mutated(new_parent);
        debug!(old = %old_key, new = %new_key, "renamed entry");
        Ok(())
    }

    /// Open a regular file. Bodies live on the node, so handles are
    /// stateless.
    pub fn open(&self, node: &NodeRef) -> Result<(), FsError> {
        node.file().map(|_| ()).ok_or(FsError::IsDirectory)
    }

    /// Serve a read from the memory-resident body.
    pub fn read(&self, node: &NodeRef, offset: i64, size: u32) -> Result<Bytes, FsError> {
        let file = node.file().ok_or(FsError::IsDirectory)?;
        let body = file.body();
        let offset = offset.max(0) as usize;
        if offset >= body.len() {
            return Ok(Bytes::new());
        }
        let end = body.len().min(offset + size as usize);
        Ok(body.slice(offset..end))
    }

    /// Kernel entry-cache mirror.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        self.tree.forget(ino, nlookup);
    }
}

/// A freshly created entry invalidates any cached emptiness of its parent.
fn dir_mutated(parent: &NodeRef) {
    if let Some(dir) = parent.dir() {
        dir.set_empty_marker_seen(false);
    }
}

fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_with_separators_are_rejected() {
        assert_eq!(validate_name("a/b").unwrap_err(), FsError::InvalidName);
        assert_eq!(validate_name("").unwrap_err(), FsError::InvalidName);
        assert_eq!(validate_name(".").unwrap_err(), FsError::InvalidName);
        assert_eq!(validate_name("..").unwrap_err(), FsError::InvalidName);
        assert!(validate_name("plain.txt").is_ok());
    }

    #[test]
    fn errno_mapping_matches_the_taxonomy() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::Denied.errno(), libc::EACCES);
        assert_eq!(FsError::Exists.errno(), libc::EEXIST);
        assert_eq!(FsError::InvalidName.errno(), libc::EINVAL);
        assert_eq!(FsError::Internal.errno(), libc::EIO);
    }

    #[test]
    fn unavailable_is_absence_at_this_layer() {
        let err: FsError = StoreError::Unavailable("timeout".into()).into();
        assert_eq!(err, FsError::NotFound);
    }
}
