//! fuser binding.
//!
//! fuser delivers kernel requests on its own threads; each callback bridges
//! onto the shared tokio runtime with `Handle::block_on`, runs the async
//! handler, and converts the outcome into a reply. All filesystem logic
//! lives in [`FsOps`]; this layer only translates types and errnos.

use std::collections::hash_map::DefaultHasher;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use tokio::runtime::Handle;
use tracing::debug;

use super::inode_tree::{NodeRef, ROOT_INO};
use super::ops::{FsOps, NodeAttr};
use super::path_codec::{full_path, EntryKind};

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(1);
const GENERATION: u64 = 0;

pub struct BucketFs {
    ops: Arc<FsOps>,
    runtime: Handle,
    uid: u32,
    gid: u32,
}

impl BucketFs {
    pub fn new(ops: Arc<FsOps>, runtime: Handle) -> Self {
        Self {
            ops,
            runtime,
            uid: 0,
            gid: 0,
        }
    }

    fn node(&self, ino: u64) -> Option<NodeRef> {
        self.ops.tree().get(ino)
    }

    fn to_file_attr(&self, attr: &NodeAttr) -> FileAttr {
        let (kind, nlink) = match attr.kind {
            EntryKind::Directory => (FileType::Directory, 2),
            EntryKind::File => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: unix_time(attr.atime),
            mtime: unix_time(attr.mtime),
            ctime: unix_time(attr.ctime),
            crtime: unix_time(attr.ctime),
            kind,
            perm: attr.perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

fn unix_time(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

/// Readdir entries not yet attached to the tree still need a d_ino. The
/// top bit keeps these clear of the tree's sequential allocation; the
/// authoritative ino is assigned when lookup attaches the node.
fn placeholder_ino(path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() | (1u64 << 63)
}

fn os_name(name: &OsStr) -> Option<&str> {
    name.to_str()
}

impl Filesystem for BucketFs {
    fn init(&mut self, req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        self.uid = req.uid();
        self.gid = req.gid();
        debug!(uid = self.uid, gid = self.gid, "filesystem initialised");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent) = self.node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = os_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.ops.lookup(&parent, name)) {
            Ok(node) => {
                let attr = self.to_file_attr(&self.ops.getattr(&node));
                reply.entry(&TTL, &attr, GENERATION);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.ops.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.node(ino) {
            Some(node) => {
                let attr = self.to_file_attr(&self.ops.getattr(&node));
                reply.attr(&TTL, &attr);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(node) = self.node(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let children = match self.runtime.block_on(self.ops.readdir(&node)) {
            Ok(children) => children,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let parent_ino = node.parent().map(|p| p.ino()).unwrap_or(ROOT_INO);
        let dir_path = self.ops.tree().path(&node);
        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(children.len() + 2);
        entries.push((node.ino(), FileType::Directory, ".".to_owned()));
        entries.push((parent_ino, FileType::Directory, "..".to_owned()));
        for child in children {
            let entry_ino = self
                .ops
                .tree()
                .get_child(&node, &child.name)
                .map(|n| n.ino())
                .unwrap_or_else(|| placeholder_ino(&full_path(&dir_path, &child.name)));
            let kind = match child.kind {
                EntryKind::Directory => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
            };
            entries.push((entry_ino, kind, child.name));
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(node) = self.node(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.ops.open(&node) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(node) = self.node(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.ops.read(&node, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent) = self.node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = os_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.ops.create(&parent, name, mode)) {
            Ok(node) => {
                let attr = self.to_file_attr(&self.ops.getattr(&node));
                reply.created(&TTL, &attr, GENERATION, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent) = self.node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = os_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.ops.unlink(&parent, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent) = self.node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = os_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.ops.mkdir(&parent, name, mode)) {
            Ok(node) => {
                let attr = self.to_file_attr(&self.ops.getattr(&node));
                reply.entry(&TTL, &attr, GENERATION);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent) = self.node(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = os_name(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.runtime.block_on(self.ops.rmdir(&parent, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent), Some(new_parent)) = (self.node(parent), self.node(newparent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let (Some(name), Some(new_name)) = (os_name(name), os_name(newname)) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self
            .runtime
            .block_on(self.ops.rename(&parent, name, &new_parent, new_name))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
