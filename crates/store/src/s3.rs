//! S3-compatible reference adapter.
//!
//! Speaks AWS signature v4 over HTTP via the official SDK. Works against
//! real S3 or anything S3-shaped (localstack, MinIO) through the endpoint
//! override. `list` paginates fully; `directory_info` is computed from
//! listing metadata, one round-trip per page.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{Result, StoreError};
use crate::object_store::{now_unix, DirectoryInfo, Object, ObjectStore, PutResult};

/// Connection settings for [`S3ObjectStore`].
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Region override; `None` defers to the SDK's default resolution chain.
    pub region: Option<String>,
    /// Endpoint override; `None` uses the provider's default endpoints.
    pub endpoint: Option<String>,
    /// Path-style addressing (`http://host/bucket/key` instead of
    /// `http://bucket.host/key`). Required by localstack.
    pub force_path_style: bool,
}

impl S3Config {
    /// Default endpoint resolution for the given bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            force_path_style: false,
        }
    }

    /// Point at a localstack instance on the conventional port.
    pub fn localstack(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: Some("ap-northeast-1".into()),
            endpoint: Some("http://localhost:4566".into()),
            force_path_style: true,
        }
    }
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build the client and verify the bucket is reachable, so that
    /// credential and connectivity problems abort before mounting.
    pub async fn connect(config: S3Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        client
            .head_bucket()
            .bucket(&config.bucket)
            .send()
            .await
            .map_err(|e| map_sdk_err("head_bucket", e))?;

        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "connected to bucket");
        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, ctx: &CallContext, prefix: &str) -> Result<Vec<String>> {
        ctx.run(async {
            let mut keys = Vec::new();
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| map_sdk_err("list_objects_v2", e))?;
                keys.extend(
                    page.contents()
                        .iter()
                        .filter_map(|obj| obj.key().map(str::to_owned)),
                );
            }
            debug!(prefix = %prefix, count = keys.len(), "listed keys");
            Ok(keys)
        })
        .await
    }

    async fn get(&self, ctx: &CallContext, key: &str) -> Result<Object> {
        ctx.run(async {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_err("get_object", e))?;

            let content_length = resp.content_length.unwrap_or(0).max(0) as u64;
            let last_modified = resp
                .last_modified
                .map(|t| t.secs())
                .unwrap_or_else(now_unix);
            Ok(Object {
                body: Box::new(resp.body.into_async_read()),
                content_length,
                last_modified,
            })
        })
        .await
    }

    async fn put_empty(&self, ctx: &CallContext, key: &str) -> Result<PutResult> {
        ctx.run(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_err("put_object", e))?;
            debug!(key = %key, "created empty object");
            // S3 does not echo the object's mtime on put.
            Ok(PutResult {
                last_modified: now_unix(),
            })
        })
        .await
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        ctx.run(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_err("delete_object", e))?;
            debug!(key = %key, "deleted object");
            Ok(())
        })
        .await
    }

    async fn is_directory(&self, ctx: &CallContext, key: &str) -> Result<bool> {
        ctx.run(async {
            let prefix = format!("{key}/");
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .max_keys(1)
                .send()
                .await
                .map_err(|e| map_sdk_err("list_objects_v2", e))?;
            Ok(resp.key_count.unwrap_or(0) >= 1)
        })
        .await
    }

    async fn directory_info(&self, ctx: &CallContext, key: &str) -> Result<DirectoryInfo> {
        ctx.run(async {
            let prefix = format!("{key}/");
            let mut matched = false;
            let mut sum_bytes = 0u64;
            let mut last_modified = 0i64;

            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| map_sdk_err("list_objects_v2", e))?;
                for obj in page.contents() {
                    matched = true;
                    sum_bytes += obj.size().unwrap_or(0).max(0) as u64;
                    if let Some(t) = obj.last_modified() {
                        last_modified = last_modified.max(t.secs());
                    }
                }
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

/// Translate an SDK failure into the port's taxonomy.
fn map_sdk_err<E, R>(op: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().map(str::to_owned);
    let rendered = format!("{}", DisplayErrorContext(&err));
    match code.as_deref() {
        Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => StoreError::NotFound,
        Some("AccessDenied") | Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch")
        | Some("ExpiredToken") => StoreError::Denied(rendered),
        _ => {
            warn!(op = %op, error = %rendered, "store call failed");
            StoreError::Unavailable(rendered)
        }
    }
}
