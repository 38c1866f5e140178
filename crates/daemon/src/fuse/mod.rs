//! The FUSE translation layer.
//!
//! Projects a flat object-storage namespace as a directory tree:
//!
//! - `path_codec`: key ↔ path mapping and child classification
//! - `inode_tree`: the in-memory node graph the kernel addresses
//! - `cache`: bounded negative-lookup cache
//! - `ops`: the request handlers (lookup, readdir, mutations)
//! - `bucket_fs`: the fuser binding bridging kernel threads onto tokio

mod bucket_fs;
mod cache;
mod inode_tree;
mod ops;
mod path_codec;

pub use bucket_fs::BucketFs;
pub use cache::{NegativeCache, NegativeCacheConfig};
pub use inode_tree::{FileTimes, InodeTree, Node, NodeRef, TreeError, ROOT_INO};
pub use ops::{FsError, FsOps, NodeAttr, DIR_PERM, FILE_PERM};
pub use path_codec::{classify_children, full_path, listing_prefix, ChildEntry, EntryKind};
