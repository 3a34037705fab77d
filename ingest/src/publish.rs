use crate::storage::ObjectStorage;
use common::UploadError;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct PublishedObject {
    pub file: PathBuf,
    pub key: String,
    pub bytes: usize,
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub published: Vec<PublishedObject>,
    pub failed: Vec<UploadError>,
}

impl PublishReport {
    fn record_outcome(&mut self, outcome: std::result::Result<PublishedObject, UploadError>) {
        match outcome {
            Ok(object) => {
                info!(file = %object.file.display(), key = %object.key, bytes = object.bytes, "Published file");
                self.published.push(object);
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                self.failed.push(e);
            }
        }
    }
}

/// Uploads each file under its base name, at most `workers` at a time.
///
/// A failed upload is recorded and the remaining files are still attempted.
pub async fn publish_files(
    storage: Arc<dyn ObjectStorage>,
    files: Vec<PathBuf>,
    workers: usize,
) -> PublishReport {
    let workers = workers.max(1);
    let mut report = PublishReport::default();
    let mut futures = FuturesUnordered::new();

    for file in files {
        let storage = Arc::clone(&storage);
        futures.push(async move { upload_file(storage.as_ref(), &file).await });

        if futures.len() >= workers {
            if let Some(outcome) = futures.next().await {
                report.record_outcome(outcome);
            }
        }
    }

    while let Some(outcome) = futures.next().await {
        report.record_outcome(outcome);
    }

    info!(
        bucket = storage.bucket(),
        published = report.published.len(),
        failed = report.failed.len(),
        "Publish finished"
    );
    report
}

async fn upload_file(
    storage: &dyn ObjectStorage,
    file: &Path,
) -> std::result::Result<PublishedObject, UploadError> {
    let key = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fail = |message: String| UploadError {
        file: file.to_path_buf(),
        key: key.clone(),
        message,
    };

    if key.is_empty() {
        return Err(fail("file has no base name".to_string()));
    }

    let data = tokio::fs::read(file).await.map_err(|e| fail(e.to_string()))?;
    storage
        .put_object(&key, &data)
        .await
        .map_err(|e| fail(e.to_string()))?;

    Ok(PublishedObject {
        file: file.to_path_buf(),
        key: key.clone(),
        bytes: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreStorage;
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use std::sync::Mutex;

    /// Storage that rejects one key and remembers every key it was asked for.
    struct RejectingStorage {
        reject: String,
        attempts: Mutex<Vec<String>>,
        inner: ObjectStoreStorage,
    }

    #[async_trait]
    impl ObjectStorage for RejectingStorage {
        async fn put_object(&self, key: &str, data: &[u8]) -> common::Result<()> {
            self.attempts.lock().unwrap().push(key.to_string());
            if key == self.reject {
                return Err(common::Error::Storage("access denied".to_string()));
            }
            self.inner.put_object(key, data).await
        }

        async fn list_objects(&self, prefix: &str) -> common::Result<Vec<String>> {
            self.inner.list_objects(prefix).await
        }

        fn bucket(&self) -> &str {
            self.inner.bucket()
        }
    }

    fn write_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn uploads_under_base_names() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &["ACFTREF.parquet", "ENGINE.parquet"]);
        let storage = Arc::new(ObjectStoreStorage::new("registry", Arc::new(InMemory::new())));

        let report = publish_files(storage.clone(), files, 4).await;

        assert!(report.failed.is_empty());
        assert_eq!(report.published.len(), 2);
        assert_eq!(
            storage.list_objects("").await.unwrap(),
            vec!["ACFTREF.parquet", "ENGINE.parquet"]
        );
    }

    #[tokio::test]
    async fn failed_upload_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &["ACFTREF.parquet", "DEALER.parquet", "ENGINE.parquet"]);
        let storage = Arc::new(RejectingStorage {
            reject: "DEALER.parquet".to_string(),
            attempts: Mutex::new(Vec::new()),
            inner: ObjectStoreStorage::new("registry", Arc::new(InMemory::new())),
        });

        let report = publish_files(storage.clone(), files, 1).await;

        assert_eq!(report.published.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "DEALER.parquet");
        assert_eq!(
            *storage.attempts.lock().unwrap(),
            vec!["ACFTREF.parquet", "DEALER.parquet", "ENGINE.parquet"]
        );
        assert_eq!(
            storage.list_objects("").await.unwrap(),
            vec!["ACFTREF.parquet", "ENGINE.parquet"]
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_upload_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ObjectStoreStorage::new("registry", Arc::new(InMemory::new())));

        let report = publish_files(storage, vec![dir.path().join("MASTER.parquet")], 2).await;

        assert!(report.published.is_empty());
        assert_eq!(report.failed[0].key, "MASTER.parquet");
    }
}
