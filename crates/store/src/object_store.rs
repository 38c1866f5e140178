//! The object storage port.
//!
//! One bucket, flat keys. A key ending in `/` is a directory marker: a
//! zero-byte object that makes an otherwise empty directory observable.
//! Adapters implement [`ObjectStore`] and are injected into the daemon as
//! `Arc<dyn ObjectStore>` at mount time.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::context::CallContext;
use crate::error::{Result, StoreError};

/// A streamed object body. Callers must read it fully (or drop it) before
/// returning; [`Object::into_bytes`] does both.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// An object as returned by [`ObjectStore::get`].
pub struct Object {
    pub body: BodyReader,
    pub content_length: u64,
    /// Unix seconds.
    pub last_modified: i64,
}

impl Object {
    /// Drain the body into memory, releasing the underlying reader.
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.content_length as usize);
        self.body
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StoreError::Unavailable(format!("body read failed: {e}")))?;
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("content_length", &self.content_length)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ObjectStore::put_empty`].
#[derive(Debug, Clone, Copy)]
pub struct PutResult {
    /// Unix seconds. The current wall clock when the store returns none.
    pub last_modified: i64,
}

/// Aggregate metadata for a synthesized directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryInfo {
    /// Sum of content lengths of all objects under the directory's prefix,
    /// marker included (it contributes 0).
    pub sum_bytes: u64,
    /// Maximum last-modified across those objects, unix seconds.
    pub last_modified: i64,
}

/// Abstract key/value API over one bucket.
///
/// All operations take a [`CallContext`]; cancellation and deadline expiry
/// surface as [`StoreError::Unavailable`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key beginning with `prefix`, fully paginated. Ordering is
    /// unspecified but stable within a single call.
    async fn list(&self, ctx: &CallContext, prefix: &str) -> Result<Vec<String>>;

    /// Fetch the object at exactly `key`.
    async fn get(&self, ctx: &CallContext, key: &str) -> Result<Object>;

    /// Create or replace a zero-byte object at `key`.
    async fn put_empty(&self, ctx: &CallContext, key: &str) -> Result<PutResult>;

    /// Delete the object at `key`. Absence is not an error worth surfacing
    /// to most callers; adapters may still return `NotFound`.
    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()>;

    /// True iff `list(key + "/")` is non-empty.
    async fn is_directory(&self, ctx: &CallContext, key: &str) -> Result<bool>;

    /// Aggregate size and recency over `key + "/"`. `NotFound` when the
    /// prefix matches nothing.
    async fn directory_info(&self, ctx: &CallContext, key: &str) -> Result<DirectoryInfo>;

    /// Release adapter resources. Default is a no-op.
    async fn close(&self) {}
}

/// Current wall clock in unix seconds, the fallback mtime when a store does
/// not report one.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
