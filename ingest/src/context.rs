use crate::fetch::Fetcher;
use crate::load::LoadTarget;
use crate::rows::RowPolicy;
use crate::storage::{ObjectStorage, ObjectStoreStorage, S3Config, S3Manager, S3Storage};
use crate::warehouse::{DataFusionWarehouse, Warehouse};
use common::Result;
use common::config::{PipelineConfig, Settings, StorageBackend, StorageSettings};
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a batch needs, built once and shared by reference.
#[derive(Clone)]
pub struct IngestContext {
    pub fetcher: Fetcher,
    pub storage: Arc<dyn ObjectStorage>,
    pub warehouse: Arc<dyn Warehouse>,
    pub staging_root: PathBuf,
    pub pipeline: PipelineConfig,
    pub targets: Vec<LoadTarget>,
}

impl IngestContext {
    pub fn new(
        fetcher: Fetcher,
        storage: Arc<dyn ObjectStorage>,
        warehouse: Arc<dyn Warehouse>,
        staging_root: PathBuf,
        pipeline: PipelineConfig,
        targets: Vec<LoadTarget>,
    ) -> Self {
        Self {
            fetcher,
            storage,
            warehouse,
            staging_root,
            pipeline,
            targets,
        }
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ingest-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let fetcher = Fetcher::new(
            client,
            settings.source.url_template.clone(),
            settings.pipeline.fetch_timeout_secs.map(Duration::from_secs),
        );

        let (storage, store) = open_storage(&settings.storage).await?;
        let warehouse = DataFusionWarehouse::new();
        warehouse.register_bucket(&settings.storage.bucket, store)?;

        let targets = settings
            .load
            .targets
            .iter()
            .map(LoadTarget::from_config)
            .collect::<Result<Vec<_>>>()?;

        info!(
            backend = ?settings.storage.backend,
            bucket = %settings.storage.bucket,
            staging = %settings.staging.dir.display(),
            targets = targets.len(),
            "Ingest context ready"
        );

        Ok(Self::new(
            fetcher,
            storage,
            Arc::new(warehouse),
            settings.staging.dir.clone(),
            settings.pipeline.clone(),
            targets,
        ))
    }

    pub fn row_policy(&self) -> RowPolicy {
        RowPolicy::from_strict(self.pipeline.strict_rows)
    }
}

/// Publishing handle plus the object store the warehouse reads the same
/// bucket through.
async fn open_storage(
    settings: &StorageSettings,
) -> Result<(Arc<dyn ObjectStorage>, Arc<dyn ObjectStore>)> {
    match settings.backend {
        StorageBackend::S3 => {
            let manager = S3Manager::new(S3Config {
                endpoint: settings.endpoint.clone(),
                region: settings.region.clone(),
                access_key: settings.access_key.clone(),
                secret_key: settings.secret_key.clone(),
            });
            let storage: Arc<dyn ObjectStorage> =
                Arc::new(S3Storage::new(&manager, &settings.bucket).await?);
            let store: Arc<dyn ObjectStore> = manager.get_object_store(&settings.bucket)?;
            Ok((storage, store))
        }
        StorageBackend::Local => {
            let root = settings.local_root.join(&settings.bucket);
            tokio::fs::create_dir_all(&root).await?;
            let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&root)?);
            let storage: Arc<dyn ObjectStorage> =
                Arc::new(ObjectStoreStorage::new(&settings.bucket, Arc::clone(&store)));
            Ok((storage, store))
        }
        StorageBackend::Memory => {
            let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
            let storage: Arc<dyn ObjectStorage> =
                Arc::new(ObjectStoreStorage::new(&settings.bucket, Arc::clone(&store)));
            Ok((storage, store))
        }
    }
}
