use config::{Config, ConfigError};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    pub storage: StorageSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub flight_api: FlightApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// URL of a yearly archive; `{year}` is replaced by the batch year.
    #[serde(default = "default_url_template")]
    pub url_template: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Root directory for the `local` backend; each bucket is a subdirectory.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub strict_rows: bool,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    /// Longest wait for a single load job before it is recorded as failed.
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
    #[serde(default = "default_tabular_extensions")]
    pub tabular_extensions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            strict_rows: false,
            fetch_timeout_secs: None,
            load_timeout_secs: None,
            tabular_extensions: default_tabular_extensions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoadConfig {
    #[serde(default)]
    pub targets: Vec<LoadTargetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadTargetConfig {
    pub pattern: String,
    pub table: String,
    #[serde(default)]
    pub skip_leading_rows: usize,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Warehouse column types, named the way warehouse schemas name them.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    #[serde(alias = "BOOL")]
    Boolean,
    Date,
    Timestamp,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlightApiConfig {
    #[serde(default = "default_flight_api_url")]
    pub url: String,
    #[serde(default)]
    pub access_key: String,
}

impl Default for FlightApiConfig {
    fn default() -> Self {
        Self {
            url: default_flight_api_url(),
            access_key: String::new(),
        }
    }
}

fn default_url_template() -> String {
    "https://registry.faa.gov/database/yearly/ReleasableAircraft.{year}.zip".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_backend() -> StorageBackend {
    StorageBackend::S3
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/buckets")
}

fn default_workers() -> usize {
    4
}

fn default_tabular_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}

fn default_flight_api_url() -> String {
    "https://app.goflightlabs.com/flights".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            bucket = %settings.storage.bucket,
            backend = ?settings.storage.backend,
            targets = settings.load.targets.len(),
            "Loaded ingest settings"
        );

        Ok(settings)
    }
}
