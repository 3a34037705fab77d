//! Loading published objects into warehouse tables.

use crate::storage::ObjectStorage;
use crate::warehouse::schema::table_schema;
use crate::warehouse::{LoadJobState, LoadRequest, Warehouse};
use arrow::datatypes::SchemaRef;
use common::Result;
use common::config::LoadTargetConfig;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Matches object keys by table name. The pattern must equal a whole path
/// segment, optionally followed by a single extension, so `ENGINE` matches
/// `ENGINE.parquet` and `2021/ENGINE.parquet` but not `ENGINE_BACKUP.parquet`.
#[derive(Debug, Clone)]
pub struct ObjectPattern {
    raw: String,
    regex: Regex,
}

impl ObjectPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() || pattern.contains('/') {
            return Err(common::Error::InvalidInput(format!(
                "invalid object pattern {:?}",
                pattern
            )));
        }
        let regex = Regex::new(&format!(
            r"(?:^|/){}(?:\.[^/.]+)?(?:/|$)",
            regex::escape(pattern)
        ))
        .map_err(|e| common::Error::InvalidInput(e.to_string()))?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub pattern: ObjectPattern,
    pub table: String,
    pub schema: SchemaRef,
    pub skip_leading_rows: usize,
}

impl LoadTarget {
    pub fn from_config(config: &LoadTargetConfig) -> Result<Self> {
        if config.table.is_empty() {
            return Err(common::Error::InvalidInput(format!(
                "load target {} has no table",
                config.pattern
            )));
        }
        Ok(Self {
            pattern: ObjectPattern::new(&config.pattern)?,
            table: config.table.clone(),
            schema: table_schema(&config.columns)?,
            skip_leading_rows: config.skip_leading_rows,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadJobReport {
    pub job_id: Option<String>,
    pub object: String,
    pub table: String,
    #[serde(flatten)]
    pub state: LoadJobState,
    /// Table size after the job finished.
    pub row_count: Option<u64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub triggered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub jobs: Vec<LoadJobReport>,
}

impl LoadReport {
    fn record(&mut self, job: LoadJobReport) {
        self.triggered += 1;
        match job.state {
            LoadJobState::Succeeded { .. } => self.succeeded += 1,
            LoadJobState::Failed { .. } => self.failed += 1,
            LoadJobState::Submitted | LoadJobState::Running => {}
        }
        self.jobs.push(job);
    }
}

/// Submits one load job per (object, matching target) pair and waits for each,
/// for at most `job_limit` per job.
///
/// Failed, timed out and cancelled jobs are reported and never resubmitted.
/// Once `cancel` fires no further jobs are submitted.
pub async fn load_matching(
    storage: &dyn ObjectStorage,
    warehouse: &dyn Warehouse,
    targets: &[LoadTarget],
    job_limit: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<LoadReport> {
    let objects = storage.list_objects("").await?;
    let mut report = LoadReport::default();

    'objects: for key in &objects {
        for target in targets.iter().filter(|t| t.pattern.matches(key)) {
            if cancel.is_cancelled() {
                warn!("Load pass cancelled, no further jobs submitted");
                break 'objects;
            }
            let source_uri = storage.object_uri(key);
            let request = LoadRequest {
                source_uri: source_uri.clone(),
                table: target.table.clone(),
                schema: target.schema.clone(),
                skip_leading_rows: target.skip_leading_rows,
            };

            let job = match warehouse.submit_load(request).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(object = %source_uri, table = %target.table, error = %e, "Could not submit load job");
                    report.record(LoadJobReport {
                        job_id: None,
                        object: source_uri,
                        table: target.table.clone(),
                        state: LoadJobState::Failed {
                            error: e.to_string(),
                        },
                        row_count: None,
                    });
                    continue;
                }
            };

            let job_id = job.id().to_string();
            info!(
                job_id = %job_id,
                object = %source_uri,
                pattern = target.pattern.as_str(),
                table = %target.table,
                "Submitted load job"
            );

            let (state, row_count) = match job.wait(job_limit, cancel).await {
                Ok(rows_loaded) => {
                    let row_count = match warehouse.row_count(&target.table).await {
                        Ok(count) => Some(count),
                        Err(e) => {
                            warn!(table = %target.table, error = %e, "Could not read table row count");
                            None
                        }
                    };
                    info!(job_id = %job_id, table = %target.table, rows_loaded, row_count, "Load job finished");
                    (LoadJobState::Succeeded { rows_loaded }, row_count)
                }
                Err(e) => {
                    warn!(error = %e, "Load job failed, not resubmitting");
                    (LoadJobState::Failed { error: e.message }, None)
                }
            };

            report.record(LoadJobReport {
                job_id: Some(job_id),
                object: source_uri,
                table: target.table.clone(),
                state,
                row_count,
            });
        }
    }

    info!(
        objects = objects.len(),
        jobs = report.jobs.len(),
        succeeded = report.succeeded,
        failed = report.failed,
        "Load pass finished"
    );
    Ok(report)
}
