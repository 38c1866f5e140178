//! The in-memory inode tree.
//!
//! Directory nodes strongly own their children; children hold weak
//! back-references to their parent, so the graph is acyclic and paths are
//! computed by walking up. Node identity is stable for as long as the
//! kernel holds an entry: every entry returned to the kernel bumps a
//! per-node lookup count, and a node is dropped only once `forget` has
//! drained that count *and* its parent no longer lists it.
//!
//! Locking is per-node (children map, name, parent link); no lock is held
//! across an await point, and cross-parent moves take the two children
//! locks in inode order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use bucketfs_store::DirectoryInfo;
use bytes::Bytes;

use super::path_codec::EntryKind;

/// FUSE reserves inode 1 for the mount root.
pub const ROOT_INO: u64 = 1;

pub type NodeRef = Arc<Node>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("not a directory")]
    NotADirectory,
    #[error("no such child")]
    NoSuchChild,
    #[error("name already occupied")]
    Occupied,
}

/// File timestamps, unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTimes {
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

impl FileTimes {
    pub fn all(t: i64) -> Self {
        Self {
            mtime: t,
            atime: t,
            ctime: t,
        }
    }
}

#[derive(Debug)]
pub struct DirState {
    children: RwLock<HashMap<String, NodeRef>>,
    info: RwLock<Option<DirectoryInfo>>,
    empty_marker_seen: AtomicBool,
}

impl DirState {
    fn new(info: Option<DirectoryInfo>) -> Self {
        Self {
            children: RwLock::new(HashMap::new()),
            info: RwLock::new(info),
            empty_marker_seen: AtomicBool::new(false),
        }
    }

    pub fn get_child(&self, name: &str) -> Option<NodeRef> {
        self.children.read().unwrap().get(name).cloned()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().unwrap().is_empty()
    }

    /// Snapshot of the children map, in no particular order.
    pub fn children(&self) -> Vec<(String, NodeRef)> {
        self.children
            .read()
            .unwrap()
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }

    pub fn info(&self) -> Option<DirectoryInfo> {
        *self.info.read().unwrap()
    }

    pub fn set_info(&self, info: Option<DirectoryInfo>) {
        *self.info.write().unwrap() = info;
    }

    pub fn empty_marker_seen(&self) -> bool {
        self.empty_marker_seen.load(Ordering::Acquire)
    }

    pub fn set_empty_marker_seen(&self, seen: bool) {
        self.empty_marker_seen.store(seen, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct FileState {
    body: RwLock<Bytes>,
    times: Mutex<FileTimes>,
    mode: u32,
}

impl FileState {
    fn new(body: Bytes, times: FileTimes, mode: u32) -> Self {
        Self {
            body: RwLock::new(body),
            times: Mutex::new(times),
            mode,
        }
    }

    pub fn body(&self) -> Bytes {
        self.body.read().unwrap().clone()
    }

    pub fn set_body(&self, body: Bytes) {
        *self.body.write().unwrap() = body;
    }

    pub fn size(&self) -> u64 {
        self.body.read().unwrap().len() as u64
    }

    pub fn times(&self) -> FileTimes {
        *self.times.lock().unwrap()
    }

    pub fn set_times(&self, times: FileTimes) {
        *self.times.lock().unwrap() = times;
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }
}

#[derive(Debug)]
pub enum NodeState {
    Dir(DirState),
    File(FileState),
}

#[derive(Debug)]
pub struct Node {
    ino: u64,
    name: RwLock<String>,
    parent: RwLock<Weak<Node>>,
    nlookup: AtomicU64,
    state: NodeState,
}

impl Node {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn is_root(&self) -> bool {
        self.ino == ROOT_INO
    }

    pub fn kind(&self) -> EntryKind {
        match &self.state {
            NodeState::Dir(_) => EntryKind::Directory,
            NodeState::File(_) => EntryKind::File,
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.read().unwrap().upgrade()
    }

    pub fn dir(&self) -> Option<&DirState> {
        match &self.state {
            NodeState::Dir(d) => Some(d),
            NodeState::File(_) => None,
        }
    }

    pub fn file(&self) -> Option<&FileState> {
        match &self.state {
            NodeState::File(f) => Some(f),
            NodeState::Dir(_) => None,
        }
    }

    /// True while the parent's children map still points at this node.
    fn is_attached(self: &Arc<Self>) -> bool {
        let name = self.name();
        self.parent()
            .and_then(|p| p.dir().and_then(|d| d.get_child(&name)))
            .is_some_and(|c| Arc::ptr_eq(&c, self))
    }
}

#[derive(Debug)]
pub struct InodeTree {
    root: NodeRef,
    by_ino: RwLock<HashMap<u64, NodeRef>>,
    next_ino: AtomicU64,
}

impl Default for InodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTree {
    pub fn new() -> Self {
        let root = Arc::new(Node {
            ino: ROOT_INO,
            name: RwLock::new(String::new()),
            parent: RwLock::new(Weak::new()),
            nlookup: AtomicU64::new(0),
            state: NodeState::Dir(DirState::new(None)),
        });
        let mut by_ino = HashMap::new();
        by_ino.insert(ROOT_INO, root.clone());
        Self {
            root,
            by_ino: RwLock::new(by_ino),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root.clone()
    }

    pub fn get(&self, ino: u64) -> Option<NodeRef> {
        self.by_ino.read().unwrap().get(&ino).cloned()
    }

    /// Allocate an unattached directory node.
    pub fn new_dir(&self, name: &str, info: Option<DirectoryInfo>) -> NodeRef {
        self.new_node(name, NodeState::Dir(DirState::new(info)))
    }

    /// Allocate an unattached file node.
    pub fn new_file(&self, name: &str, body: Bytes, times: FileTimes, mode: u32) -> NodeRef {
        self.new_node(name, NodeState::File(FileState::new(body, times, mode)))
    }

    fn new_node(&self, name: &str, state: NodeState) -> NodeRef {
        Arc::new(Node {
            ino: self.next_ino.fetch_add(1, Ordering::SeqCst),
            name: RwLock::new(name.to_owned()),
            parent: RwLock::new(Weak::new()),
            nlookup: AtomicU64::new(0),
            state,
        })
    }

    /// The mount-relative path of a node (root = empty string).
    pub fn path(&self, node: &NodeRef) -> String {
        let mut segments = Vec::new();
        let mut cursor = node.clone();
        while !cursor.is_root() {
            segments.push(cursor.name());
            match cursor.parent() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        segments.reverse();
        segments.join("/")
    }

    /// Attach `child` under `parent`. If the name is already taken the
    /// incumbent is returned instead, preserving identity for the kernel.
    pub fn add_child(
        &self,
        parent: &NodeRef,
        name: &str,
        child: NodeRef,
    ) -> Result<NodeRef, TreeError> {
        let dir = parent.dir().ok_or(TreeError::NotADirectory)?;
        let mut children = dir.children.write().unwrap();
        if let Some(existing) = children.get(name) {
            return Ok(existing.clone());
        }
        *child.name.write().unwrap() = name.to_owned();
        *child.parent.write().unwrap() = Arc::downgrade(parent);
        children.insert(name.to_owned(), child.clone());
        drop(children);

        self.by_ino.write().unwrap().insert(child.ino, child.clone());
        Ok(child)
    }

    pub fn get_child(&self, parent: &NodeRef, name: &str) -> Option<NodeRef> {
        parent.dir()?.get_child(name)
    }

    /// Detach a child. The node itself survives until the kernel forgets it.
    pub fn remove_child(&self, parent: &NodeRef, name: &str) -> Option<NodeRef> {
        let removed = parent.dir()?.children.write().unwrap().remove(name);
        if let Some(node) = &removed {
            if node.nlookup.load(Ordering::SeqCst) == 0 {
                self.by_ino.write().unwrap().remove(&node.ino);
            }
        }
        removed
    }

    /// Re-parent and re-name in one step. Refuses to displace an existing
    /// entry at the destination.
    pub fn move_child(
        &self,
        src: &NodeRef,
        name: &str,
        dst: &NodeRef,
        new_name: &str,
    ) -> Result<NodeRef, TreeError> {
        let src_dir = src.dir().ok_or(TreeError::NotADirectory)?;
        let dst_dir = dst.dir().ok_or(TreeError::NotADirectory)?;

        if Arc::ptr_eq(src, dst) {
            let mut children = src_dir.children.write().unwrap();
            if name != new_name && children.contains_key(new_name) {
                return Err(TreeError::Occupied);
            }
            let child = children.remove(name).ok_or(TreeError::NoSuchChild)?;
            *child.name.write().unwrap() = new_name.to_owned();
            children.insert(new_name.to_owned(), child.clone());
            return Ok(child);
        }

        // Ino order keeps concurrent cross-parent moves deadlock-free.
        let (lo, hi) = if src.ino < dst.ino {
            (src_dir, dst_dir)
        } else {
            (dst_dir, src_dir)
        };
        let mut lo_guard = lo.children.write().unwrap();
        let mut hi_guard = hi.children.write().unwrap();
        let (src_children, dst_children) = if src.ino < dst.ino {
            (&mut *lo_guard, &mut *hi_guard)
        } else {
            (&mut *hi_guard, &mut *lo_guard)
        };

        if dst_children.contains_key(new_name) {
            return Err(TreeError::Occupied);
        }
        let child = src_children.remove(name).ok_or(TreeError::NoSuchChild)?;
        *child.name.write().unwrap() = new_name.to_owned();
        *child.parent.write().unwrap() = Arc::downgrade(dst);
        dst_children.insert(new_name.to_owned(), child.clone());
        Ok(child)
    }

    /// Record that an entry for this node was handed to the kernel.
    pub fn retain(&self, node: &NodeRef) {
        node.nlookup.fetch_add(1, Ordering::SeqCst);
    }

    /// Mirror of the kernel's forget notification.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let Some(node) = self.get(ino) else {
            return;
        };
        let _ = node
            .nlookup
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(nlookup))
            });
        if node.nlookup.load(Ordering::SeqCst) == 0 && !node.is_attached() {
            self.by_ino.write().unwrap().remove(&ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> InodeTree {
        InodeTree::new()
    }

    #[test]
    fn root_is_registered() {
        let t = tree();
        let root = t.get(ROOT_INO).unwrap();
        assert!(root.is_root());
        assert_eq!(t.path(&root), "");
    }

    #[test]
    fn add_child_assigns_path_and_identity() {
        let t = tree();
        let root = t.root();
        let d = t.add_child(&root, "d", t.new_dir("d", None)).unwrap();
        let f = t
            .add_child(&d, "f.txt", t.new_file("f.txt", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();

        assert_eq!(t.path(&d), "d");
        assert_eq!(t.path(&f), "d/f.txt");
        assert_eq!(f.kind(), EntryKind::File);
        assert!(Arc::ptr_eq(&t.get_child(&d, "f.txt").unwrap(), &f));
        assert!(Arc::ptr_eq(&t.get(f.ino()).unwrap(), &f));
    }

    #[test]
    fn add_child_keeps_the_incumbent() {
        let t = tree();
        let root = t.root();
        let first = t.add_child(&root, "x", t.new_dir("x", None)).unwrap();
        let second = t.add_child(&root, "x", t.new_dir("x", None)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn move_child_renames_within_parent() {
        let t = tree();
        let root = t.root();
        let f = t
            .add_child(&root, "old", t.new_file("old", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();

        let moved = t.move_child(&root, "old", &root, "new").unwrap();
        assert!(Arc::ptr_eq(&moved, &f));
        assert!(t.get_child(&root, "old").is_none());
        assert_eq!(t.path(&f), "new");
    }

    #[test]
    fn move_child_reparents() {
        let t = tree();
        let root = t.root();
        let a = t.add_child(&root, "a", t.new_dir("a", None)).unwrap();
        let b = t.add_child(&root, "b", t.new_dir("b", None)).unwrap();
        let f = t
            .add_child(&a, "f", t.new_file("f", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();

        t.move_child(&a, "f", &b, "g").unwrap();
        assert!(t.get_child(&a, "f").is_none());
        assert_eq!(t.path(&f), "b/g");
        assert!(Arc::ptr_eq(&f.parent().unwrap(), &b));
    }

    #[test]
    fn move_child_refuses_conflicts() {
        let t = tree();
        let root = t.root();
        t.add_child(&root, "a", t.new_file("a", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();
        t.add_child(&root, "b", t.new_file("b", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();

        assert_eq!(
            t.move_child(&root, "a", &root, "b").unwrap_err(),
            TreeError::Occupied
        );
        assert_eq!(
            t.move_child(&root, "missing", &root, "c").unwrap_err(),
            TreeError::NoSuchChild
        );
    }

    #[test]
    fn node_survives_detach_until_forgotten() {
        let t = tree();
        let root = t.root();
        let f = t
            .add_child(&root, "f", t.new_file("f", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();
        t.retain(&f);
        let ino = f.ino();

        // Kernel still holds the entry: detaching must not drop identity.
        t.remove_child(&root, "f");
        assert!(t.get(ino).is_some());

        t.forget(ino, 1);
        assert!(t.get(ino).is_none());
    }

    #[test]
    fn detached_node_with_no_lookups_is_evicted_immediately() {
        let t = tree();
        let root = t.root();
        let f = t
            .add_child(&root, "f", t.new_file("f", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();
        let ino = f.ino();
        t.remove_child(&root, "f");
        assert!(t.get(ino).is_none());
    }

    #[test]
    fn forget_of_attached_node_keeps_it() {
        let t = tree();
        let root = t.root();
        let f = t
            .add_child(&root, "f", t.new_file("f", Bytes::new(), FileTimes::all(1), 0o644))
            .unwrap();
        t.retain(&f);
        t.forget(f.ino(), 1);
        // Still attached to root, so still resolvable.
        assert!(t.get(f.ino()).is_some());
    }

    #[test]
    fn forget_root_is_a_noop() {
        let t = tree();
        t.forget(ROOT_INO, u64::MAX);
        assert!(t.get(ROOT_INO).is_some());
    }
}
