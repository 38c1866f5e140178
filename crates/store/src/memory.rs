//! In-memory adapter.
//!
//! A `BTreeMap` keyed bucket, so listings come back in a stable order.
//! This is the test double for the daemon's integration tests and doubles
//! as a fully ephemeral backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::context::CallContext;
use crate::error::{Result, StoreError};
use crate::object_store::{now_unix, DirectoryInfo, Object, ObjectStore, PutResult};

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Bytes,
    last_modified: i64,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    deny_writes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, bypassing the port (tests arrange state with this).
    pub async fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.insert_at(key, body, now_unix()).await;
    }

    /// Seed an object with an explicit mtime.
    pub async fn insert_at(&self, key: impl Into<String>, body: impl Into<Bytes>, mtime: i64) {
        self.objects.write().await.insert(
            key.into(),
            MemoryObject {
                body: body.into(),
                last_modified: mtime,
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Make every mutating call fail with `Denied`, for exercising the
    /// daemon's permission paths.
    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Denied("writes denied".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, ctx: &CallContext, prefix: &str) -> Result<Vec<String>> {
        ctx.run(async {
            let objects = self.objects.read().await;
            Ok(objects
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect())
        })
        .await
    }

    async fn get(&self, ctx: &CallContext, key: &str) -> Result<Object> {
        ctx.run(async {
            let objects = self.objects.read().await;
            let obj = objects.get(key).ok_or(StoreError::NotFound)?;
            Ok(Object {
                body: Box::new(std::io::Cursor::new(obj.body.clone())),
                content_length: obj.body.len() as u64,
                last_modified: obj.last_modified,
            })
        })
        .await
    }

    async fn put_empty(&self, ctx: &CallContext, key: &str) -> Result<PutResult> {
        ctx.run(async {
            self.check_writable()?;
            let last_modified = now_unix();
            self.objects.write().await.insert(
                key.to_owned(),
                MemoryObject {
                    body: Bytes::new(),
                    last_modified,
                },
            );
            Ok(PutResult { last_modified })
        })
        .await
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        ctx.run(async {
            self.check_writable()?;
            match self.objects.write().await.remove(key) {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound),
            }
        })
        .await
    }

    async fn is_directory(&self, ctx: &CallContext, key: &str) -> Result<bool> {
        let prefix = format!("{key}/");
        ctx.run(async {
            let objects = self.objects.read().await;
            Ok(objects
                .range(prefix.clone()..)
                .next()
                .is_some_and(|(k, _)| k.starts_with(&prefix)))
        })
        .await
    }

    async fn directory_info(&self, ctx: &CallContext, key: &str) -> Result<DirectoryInfo> {
        let prefix = format!("{key}/");
        ctx.run(async {
            let objects = self.objects.read().await;
            let mut matched = false;
            let mut sum_bytes = 0u64;
            let mut last_modified = 0i64;
            for (_, obj) in objects
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
            {
                matched = true;
                sum_bytes += obj.body.len() as u64;
                last_modified = last_modified.max(obj.last_modified);
            }
            if !matched {
                return Err(StoreError::NotFound);
            }
            Ok(DirectoryInfo {
                sum_bytes,
                last_modified,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext {
        CallContext::default()
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_ordered() {
        let store = MemoryObjectStore::new();
        store.insert("a/1", "x").await;
        store.insert("a/2", "y").await;
        store.insert("b/1", "z").await;

        let keys = store.list(&ctx(), "a/").await.unwrap();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);

        let all = store.list(&ctx(), "").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn get_reads_full_body() {
        let store = MemoryObjectStore::new();
        store.insert_at("file.txt", "hello", 1234).await;

        let obj = store.get(&ctx(), "file.txt").await.unwrap();
        assert_eq!(obj.content_length, 5);
        assert_eq!(obj.last_modified, 1234);
        assert_eq!(obj.into_bytes().await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get(&ctx(), "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn put_empty_creates_zero_byte_object() {
        let store = MemoryObjectStore::new();
        store.put_empty(&ctx(), "marker/").await.unwrap();

        let obj = store.get(&ctx(), "marker/").await.unwrap();
        assert_eq!(obj.content_length, 0);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        store.insert("k", "v").await;
        store.delete(&ctx(), "k").await.unwrap();
        let err = store.delete(&ctx(), "k").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn is_directory_iff_prefix_non_empty() {
        let store = MemoryObjectStore::new();
        store.insert("d/c.txt", "C").await;
        store.insert("plain.txt", "P").await;

        assert!(store.is_directory(&ctx(), "d").await.unwrap());
        assert!(!store.is_directory(&ctx(), "plain.txt").await.unwrap());
        // A sibling sharing the prefix is not a directory witness.
        assert!(!store.is_directory(&ctx(), "plai").await.unwrap());
    }

    #[tokio::test]
    async fn directory_info_sums_and_takes_max_mtime() {
        let store = MemoryObjectStore::new();
        store.insert_at("d/", "", 10).await;
        store.insert_at("d/a", "aa", 20).await;
        store.insert_at("d/sub/b", "bbb", 15).await;

        let info = store.directory_info(&ctx(), "d").await.unwrap();
        assert_eq!(info.sum_bytes, 5);
        assert_eq!(info.last_modified, 20);

        let err = store.directory_info(&ctx(), "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn deny_writes_maps_to_denied() {
        let store = MemoryObjectStore::new();
        store.set_deny_writes(true);
        let err = store.put_empty(&ctx(), "k").await.unwrap_err();
        assert!(matches!(err, StoreError::Denied(_)));
    }
}
