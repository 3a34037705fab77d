pub mod archive;
pub mod context;
pub mod fetch;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod publish;
pub mod rows;
pub mod storage;
pub mod warehouse;

use common::Result;
use common::config::Settings;
use context::IngestContext;
use load::LoadReport;
use pipeline::{BatchOptions, BatchSummary};
use tokio_util::sync::CancellationToken;

pub use pipeline::run_batch;

/// Runs one yearly batch with the settings at `config_path`.
pub async fn run_ingest(
    config_path: &str,
    year: i32,
    options: BatchOptions,
    cancel: &CancellationToken,
) -> Result<BatchSummary> {
    let settings = Settings::new(config_path)?;
    let ctx = IngestContext::from_settings(&settings).await?;
    run_batch(&ctx, year, options, cancel).await
}

/// Loads already published objects without running a batch.
pub async fn run_load(config_path: &str, cancel: &CancellationToken) -> Result<LoadReport> {
    let settings = Settings::new(config_path)?;
    let ctx = IngestContext::from_settings(&settings).await?;
    pipeline::run_load(&ctx, cancel).await
}
