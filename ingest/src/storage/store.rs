use super::ObjectStorage;
use async_trait::async_trait;
use bytes::Bytes;
use common::Result;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use std::sync::Arc;

/// [`ObjectStorage`] over any `object_store` backend: local filesystem,
/// memory, or S3 through `AmazonS3`.
#[derive(Clone)]
pub struct ObjectStoreStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let location = ObjectPath::parse(key)?;
        self.store
            .put(&location, PutPayload::from(Bytes::copy_from_slice(data)))
            .await?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = if prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::parse(prefix)?)
        };

        let objects: Vec<ObjectMeta> = self.store.list(prefix.as_ref()).try_collect().await?;
        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn same_key_twice_leaves_one_object() {
        let storage = ObjectStoreStorage::new("registry", Arc::new(InMemory::new()));

        storage.put_object("ENGINE.parquet", b"first").await.unwrap();
        storage.put_object("ENGINE.parquet", b"second").await.unwrap();
        storage.put_object("ACFTREF.parquet", b"other").await.unwrap();

        let objects = storage.list_objects("").await.unwrap();
        assert_eq!(objects, vec!["ACFTREF.parquet", "ENGINE.parquet"]);

        let stored = storage
            .store()
            .get(&ObjectPath::from("ENGINE.parquet"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), b"second");
    }

    #[tokio::test]
    async fn lists_by_prefix() {
        let storage = ObjectStoreStorage::new("registry", Arc::new(InMemory::new()));
        storage.put_object("2021/MASTER.parquet", b"a").await.unwrap();
        storage.put_object("2022/MASTER.parquet", b"b").await.unwrap();

        let objects = storage.list_objects("2021").await.unwrap();
        assert_eq!(objects, vec!["2021/MASTER.parquet"]);
        assert_eq!(
            storage.object_uri("2021/MASTER.parquet"),
            "s3://registry/2021/MASTER.parquet"
        );
    }
}
