//! Shared fixtures for pipeline integration tests: a served registration
//! archive, in-memory buckets and a context wired to both.

#![allow(dead_code)]

use async_trait::async_trait;
use common::config::{ColumnConfig, ColumnType, LoadTargetConfig, PipelineConfig};
use ingest::context::IngestContext;
use ingest::fetch::Fetcher;
use ingest::load::LoadTarget;
use ingest::storage::{ObjectStorage, ObjectStoreStorage};
use ingest::warehouse::DataFusionWarehouse;
use object_store::memory::InMemory;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::FileOptions;

pub const BUCKET: &str = "registry";

pub const ACFTREF: &str = "CODE,MFR,MODEL,NO-SEATS\n\
2072738,CESSNA,172S,4\n\
1151533,PIPER,PA-28-181\n\
3930402,BOEING,737-800,189\n\
7100215,MOONEY,M20J,4\n";

pub const ENGINE: &str = "CODE,MFR,MODEL,TYPE,HORSEPOWER,THRUST\n";

pub fn registry_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn scenario_zip() -> Vec<u8> {
    registry_zip(&[
        ("ACFTREF.txt", ACFTREF.as_bytes()),
        ("ENGINE.txt", ENGINE.as_bytes()),
        ("ardata.pdf", b"%PDF-1.4"),
    ])
}

/// Valid ACFTREF plus a DEREG whose Parquet output path is already taken by
/// a directory, so DEREG cannot be normalized.
pub fn blocked_output_zip() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("ACFTREF.txt", FileOptions::default()).unwrap();
    zip.write_all(ACFTREF.as_bytes()).unwrap();
    zip.add_directory("DEREG.parquet", FileOptions::default()).unwrap();
    zip.start_file("DEREG.txt", FileOptions::default()).unwrap();
    zip.write_all(b"N-NUMBER,NAME\n100,SMITH\n").unwrap();
    zip.finish().unwrap().into_inner()
}

pub async fn serve_archive(server: &MockServer, year: i32, status: u16, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/ReleasableAircraft.{}.zip", year)))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(server)
        .await;
}

pub fn aircraft_reference_target() -> LoadTarget {
    LoadTarget::from_config(&LoadTargetConfig {
        pattern: "ACFTREF".to_string(),
        table: "aircraft_reference".to_string(),
        skip_leading_rows: 0,
        columns: vec![
            ColumnConfig {
                name: "CODE".to_string(),
                column_type: ColumnType::String,
            },
            ColumnConfig {
                name: "MFR".to_string(),
                column_type: ColumnType::String,
            },
            ColumnConfig {
                name: "NO-SEATS".to_string(),
                column_type: ColumnType::Integer,
            },
        ],
    })
    .unwrap()
}

pub fn memory_bucket() -> Arc<InMemory> {
    Arc::new(InMemory::new())
}

/// Context over `store` that fetches from `server` and stages under
/// `staging_root`. Publishing goes through `storage` when given, otherwise
/// straight to `store`.
pub fn context(
    server: &MockServer,
    staging_root: &Path,
    store: Arc<InMemory>,
    storage: Option<Arc<dyn ObjectStorage>>,
) -> IngestContext {
    let warehouse = DataFusionWarehouse::new();
    warehouse.register_bucket(BUCKET, store.clone()).unwrap();
    let storage: Arc<dyn ObjectStorage> = match storage {
        Some(storage) => storage,
        None => Arc::new(ObjectStoreStorage::new(BUCKET, store)),
    };

    IngestContext::new(
        Fetcher::new(
            reqwest::Client::new(),
            format!("{}/ReleasableAircraft.{{year}}.zip", server.uri()),
            None,
        ),
        storage,
        Arc::new(warehouse),
        staging_root.to_path_buf(),
        PipelineConfig::default(),
        vec![aircraft_reference_target()],
    )
}

/// Publishing storage that refuses one key.
pub struct RefusingStorage {
    pub refuse: String,
    pub inner: ObjectStoreStorage,
}

#[async_trait]
impl ObjectStorage for RefusingStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> common::Result<()> {
        if key == self.refuse {
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
