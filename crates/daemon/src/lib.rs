//! bucketfs: a user-space daemon that projects one object-storage bucket as
//! a POSIX-style directory tree.
//!
//! The kernel's filesystem calls arrive through fuser, get translated into
//! list/get/put/delete traffic against the bucket, and mutate an in-memory
//! inode tree that stays consistent with both the kernel's entry cache and
//! the backing store. Keys map to paths one-for-one; a zero-byte object
//! whose key ends in `/` marks an otherwise empty directory.

pub mod cli;
pub mod fuse;
pub mod mount;

pub use mount::{mount, LiveMount, MountConfig, MountError};
