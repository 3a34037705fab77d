use crate::archive::expand_archive;
use crate::context::IngestContext;
use crate::load::{LoadReport, load_matching};
use crate::normalize::{NormalizeReport, normalize_table};
use crate::publish::publish_files;
use crate::rows::RowPolicy;
use common::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registration archives are published from this year on.
pub const FIRST_YEAR: i32 = 2012;

/// One year of registration data and its staging directory.
#[derive(Debug, Clone)]
pub struct Batch {
    year: i32,
    dir: PathBuf,
}

impl Batch {
    pub fn new(year: i32, staging_root: &Path) -> Result<Self> {
        if year < FIRST_YEAR {
            return Err(common::Error::InvalidInput(format!(
                "year {} is before {}, the first published year",
                year, FIRST_YEAR
            )));
        }
        Ok(Self {
            year,
            dir: staging_root.join(year.to_string()),
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Run the load stage after publishing.
    pub load: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub file: PathBuf,
    pub key: String,
    pub error: String,
}

/// A raw table that could not be normalized. The file stays in staging.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTable {
    pub file: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub year: i32,
    pub files_extracted: usize,
    pub rows_repaired: usize,
    pub files_normalized: usize,
    pub rows_normalized: usize,
    pub rows_skipped: usize,
    pub duplicates_replaced: usize,
    pub failed_tables: Vec<FailedTable>,
    pub objects_published: Vec<String>,
    pub failed_uploads: Vec<FailedUpload>,
    pub load: Option<LoadReport>,
}

/// Moves one year through fetch, expand, normalize, publish and, when
/// asked, load.
///
/// Fetch and archive errors end the batch, as does a malformed row under the
/// strict row policy. Tables that fail to normalize, failed uploads and
/// failed load jobs are recorded in the summary and the rest of the batch
/// carries on.
pub async fn run_batch(
    ctx: &IngestContext,
    year: i32,
    options: BatchOptions,
    cancel: &CancellationToken,
) -> Result<BatchSummary> {
    let batch = Batch::new(year, &ctx.staging_root)?;
    let mut summary = BatchSummary {
        year,
        ..Default::default()
    };
    info!(year, staging = %batch.dir().display(), "Starting batch");

    let archive = ctx.fetcher.fetch(year, batch.dir(), cancel).await?;

    let policy = ctx.row_policy();
    let extensions = ctx.pipeline.tabular_extensions.clone();
    let expand_from = archive.clone();
    let expansion = tokio::task::spawn_blocking(move || {
        expand_archive(&expand_from, &extensions, policy)
    })
    .await
    .map_err(|e| common::Error::Other(format!("archive task failed: {}", e)))??;

    summary.files_extracted = expansion.tabular.len() + expansion.other.len();
    summary.rows_repaired = expansion.rows_dropped;
    remove_files(std::iter::once(&archive).chain(&expansion.other)).await;

    let (reports, failed_tables) =
        normalize_all(expansion.tabular, policy, ctx.pipeline.workers).await?;
    summary.failed_tables = failed_tables;
    let mut normalized = Vec::with_capacity(reports.len());
    for report in reports {
        summary.files_normalized += 1;
        summary.rows_normalized += report.rows_written;
        summary.rows_skipped += report.rows_skipped;
        summary.duplicates_replaced += report.duplicates_replaced;
        normalized.push(report.output);
    }

    let published = publish_files(ctx.storage.clone(), normalized, ctx.pipeline.workers).await;
    remove_files(published.published.iter().map(|object| &object.file)).await;
    summary.objects_published = published.published.into_iter().map(|o| o.key).collect();
    summary.objects_published.sort();
    summary.failed_uploads = published
        .failed
        .into_iter()
        .map(|e| FailedUpload {
            file: e.file,
            key: e.key,
            error: e.message,
        })
        .collect();

    if let Err(e) = tokio::fs::remove_dir(batch.dir()).await {
        debug!(staging = %batch.dir().display(), error = %e, "Staging directory kept");
    }

    if options.load {
        if ctx.targets.is_empty() {
            warn!("Load requested but no load targets are configured");
        } else {
            summary.load = Some(run_load(ctx, cancel).await?);
        }
    }

    info!(
        year,
        files_extracted = summary.files_extracted,
        rows_repaired = summary.rows_repaired,
        files_normalized = summary.files_normalized,
        rows_normalized = summary.rows_normalized,
        rows_skipped = summary.rows_skipped,
        failed_tables = summary.failed_tables.len(),
        published = summary.objects_published.len(),
        failed_uploads = summary.failed_uploads.len(),
        "Batch finished"
    );
    Ok(summary)
}

/// Loads every published object that matches a configured target.
pub async fn run_load(ctx: &IngestContext, cancel: &CancellationToken) -> Result<LoadReport> {
    load_matching(
        ctx.storage.as_ref(),
        ctx.warehouse.as_ref(),
        &ctx.targets,
        ctx.pipeline.load_timeout_secs.map(Duration::from_secs),
        cancel,
    )
    .await
}

async fn normalize_all(
    tables: Vec<PathBuf>,
    policy: RowPolicy,
    workers: usize,
) -> Result<(Vec<NormalizeReport>, Vec<FailedTable>)> {
    let workers = workers.max(1);
    let mut reports = Vec::with_capacity(tables.len());
    let mut failed = Vec::new();
    let mut fatal = None;
    let mut futures = FuturesUnordered::new();

    let mut record = |file: PathBuf,
                      outcome: std::result::Result<Result<NormalizeReport>, tokio::task::JoinError>| {
        let error = match outcome {
            Ok(Ok(report)) => {
                reports.push(report);
                return;
            }
            Ok(Err(e @ common::Error::MalformedRow(_))) => {
                fatal.get_or_insert(e);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("normalization task failed: {}", e),
        };
        warn!(file = %file.display(), error = %error, "Normalization failed, table left in staging");
        failed.push(FailedTable { file, error });
    };

    for table in tables {
        let raw = table.clone();
        let task = tokio::task::spawn_blocking(move || normalize_table(&raw, policy));
        futures.push(async move { (table, task.await) });
        if futures.len() >= workers {
            if let Some((file, outcome)) = futures.next().await {
                record(file, outcome);
            }
        }
    }
    while let Some((file, outcome)) = futures.next().await {
        record(file, outcome);
    }

    if let Some(e) = fatal {
        return Err(e);
    }
    reports.sort_by(|a, b| a.output.cmp(&b.output));
    failed.sort_by(|a, b| a.file.cmp(&b.file));
    Ok((reports, failed))
}

async fn remove_files<'a>(files: impl IntoIterator<Item = &'a PathBuf>) {
    for file in files {
        match tokio::fs::remove_file(file).await {
            Ok(()) => debug!(file = %file.display(), "Removed staged file"),
            Err(e) => warn!(file = %file.display(), error = %e, "Could not remove staged file"),
        }
    }
}
