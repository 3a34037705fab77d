use super::{ObjectStorage, S3Manager};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use common::Result;
use std::sync::Arc;
use tracing::debug;

/// Publishing straight through the AWS SDK.
pub struct S3Storage {
    bucket: String,
    client: Arc<S3Client>,
}

impl S3Storage {
    pub async fn new(s3_manager: &S3Manager, bucket: &str) -> Result<Self> {
        Ok(Self {
            client: s3_manager.get_client(bucket).await?,
            bucket: bucket.to_string(),
        })
    }
}

fn storage_error<E, R>(operation: &str, bucket: &str, err: SdkError<E, R>) -> common::Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = match err {
        SdkError::ServiceError(service) => service.into_err().to_string(),
        other => DisplayErrorContext(&other).to_string(),
    };
    common::Error::Storage(format!("{} on bucket {}: {}", operation, bucket, detail))
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| storage_error("PutObject", &self.bucket, e))?;

        debug!(bucket = %self.bucket, key, bytes = data.len(), "Put object");
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }

        let mut pages = request.into_paginator().send();
        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| storage_error("ListObjectsV2", &self.bucket, e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        Ok(keys)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
