use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use parquet::errors::ParquetError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::ParseError;

pub mod config;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    MalformedRow(#[from] MalformedRowError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    LoadJob(#[from] LoadJobError),

    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// The registration archive for a year could not be downloaded.
#[derive(Error, Debug)]
#[error("failed to fetch registration archive for {year}: {cause}")]
pub struct FetchError {
    pub year: i32,
    #[source]
    pub cause: FetchCause,
}

#[derive(Error, Debug)]
pub enum FetchCause {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned HTTP {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled by caller")]
    Cancelled,
}

impl FetchError {
    pub fn new(year: i32, cause: impl Into<FetchCause>) -> Self {
        Self {
            year,
            cause: cause.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("corrupt archive {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} has entry {entry:?} that escapes the destination directory", path.display())]
    UnsafeEntry { path: PathBuf, entry: String },

    #[error("IO error expanding {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What is wrong with a single delimited row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDefect {
    FieldCount { expected: usize, found: usize },
    Encoding { field: usize },
    HeaderEcho,
    MissingIdentifier,
}

impl fmt::Display for RowDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowDefect::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            RowDefect::Encoding { field } => write!(f, "field {} is not valid UTF-8", field),
            RowDefect::HeaderEcho => write!(f, "row repeats the header"),
            RowDefect::MissingIdentifier => write!(f, "row identifier is empty"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("malformed row at {}:{line}: {defect}", file.display())]
pub struct MalformedRowError {
    pub file: PathBuf,
    pub line: u64,
    pub defect: RowDefect,
}

#[derive(Error, Debug, Clone)]
#[error("failed to upload {} as {key}: {message}", file.display())]
pub struct UploadError {
    pub file: PathBuf,
    pub key: String,
    pub message: String,
}

#[derive(Error, Debug, Clone)]
#[error("load job {job_id} for {source_object} into {table} failed: {message}")]
pub struct LoadJobError {
    pub job_id: String,
    pub source_object: String,
    pub table: String,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed response: {reason}")]
pub struct MalformedResponseError {
    pub reason: String,
}

impl MalformedResponseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(format!("Object store error: {}", err))
    }
}

impl From<object_store::path::Error> for Error {
    fn from(err: object_store::path::Error) -> Self {
        Error::InvalidInput(format!("Object path error: {}", err))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidInput(format!("URL parse error: {}", err))
    }
}
