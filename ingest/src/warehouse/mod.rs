//! Analytical warehouse that published objects are loaded into.

pub mod schema;
pub mod session;

use async_trait::async_trait;
use arrow::datatypes::SchemaRef;
use common::{LoadJobError, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use session::DataFusionWarehouse;

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub source_uri: String,
    pub table: String,
    pub schema: SchemaRef,
    /// Header rows to skip in delimited sources. Parquet sources ignore it.
    pub skip_leading_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadJobState {
    Submitted,
    Running,
    Succeeded { rows_loaded: u64 },
    Failed { error: String },
}

impl LoadJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Handle to a submitted load. The warehouse drives the job; the handle only
/// observes it.
#[derive(Debug)]
pub struct LoadJob {
    id: String,
    source_uri: String,
    table: String,
    state: watch::Receiver<LoadJobState>,
}

impl LoadJob {
    pub fn new(
        id: String,
        source_uri: String,
        table: String,
        state: watch::Receiver<LoadJobState>,
    ) -> Self {
        Self {
            id,
            source_uri,
            table,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn state(&self) -> LoadJobState {
        self.state.borrow().clone()
    }

    /// Waits for the job to finish and returns the number of rows it loaded.
    pub async fn result(mut self) -> std::result::Result<u64, LoadJobError> {
        let terminal = self
            .state
            .wait_for(LoadJobState::is_terminal)
            .await
            .map(|state| state.clone());

        match terminal {
            Ok(LoadJobState::Succeeded { rows_loaded }) => Ok(rows_loaded),
            Ok(LoadJobState::Failed { error }) => Err(self.error(error)),
            Ok(_) | Err(_) => Err(self.error("job ended without reporting a result".to_string())),
        }
    }

    /// Like [`LoadJob::result`], but gives up when `limit` passes or `cancel`
    /// fires. Giving up only stops the wait; the job is reported as failed.
    pub async fn wait(
        self,
        limit: Option<Duration>,
        cancel: &CancellationToken,
    ) -> std::result::Result<u64, LoadJobError> {
        let mut abandoned = self.error(String::new());
        let finished = self.result();
        let waited = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
                None => Some(finished.await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abandoned.message = "cancelled while waiting for the job".to_string();
                Err(abandoned)
            }
            outcome = waited => match outcome {
                Some(result) => result,
                None => {
                    abandoned.message = format!(
                        "timed out after {}s waiting for the job",
                        limit.map(|l| l.as_secs()).unwrap_or_default()
                    );
                    Err(abandoned)
                }
            },
        }
    }

    fn error(&self, message: String) -> LoadJobError {
        LoadJobError {
            job_id: self.id.clone(),
            source_object: self.source_uri.clone(),
            table: self.table.clone(),
            message,
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Starts loading `request.source_uri` into `request.table`, appending to
    /// the table and creating it on first use.
    async fn submit_load(&self, request: LoadRequest) -> Result<LoadJob>;

    async fn row_count(&self, table: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: watch::Receiver<LoadJobState>) -> LoadJob {
        LoadJob::new(
            "job-1".to_string(),
            "s3://registry/ENGINE.parquet".to_string(),
            "engine_reference".to_string(),
            state,
        )
    }

    #[tokio::test]
    async fn result_waits_for_a_terminal_state() {
        let (tx, rx) = watch::channel(LoadJobState::Submitted);
        let job = job(rx);
        assert_eq!(job.state(), LoadJobState::Submitted);

        let waiter = tokio::spawn(job.result());
        tx.send_replace(LoadJobState::Running);
        tx.send_replace(LoadJobState::Succeeded { rows_loaded: 7 });

        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn failure_carries_job_and_object() {
        let (tx, rx) = watch::channel(LoadJobState::Running);
        tx.send_replace(LoadJobState::Failed {
            error: "no column HORSEPOWER".to_string(),
        });

        let err = job(rx).result().await.unwrap_err();
        assert_eq!(err.job_id, "job-1");
        assert_eq!(err.source_object, "s3://registry/ENGINE.parquet");
        assert_eq!(err.message, "no column HORSEPOWER");
    }

    #[tokio::test]
    async fn dropped_driver_is_a_failure() {
        let (tx, rx) = watch::channel(LoadJobState::Running);
        drop(tx);

        let err = job(rx).result().await.unwrap_err();
        assert_eq!(err.table, "engine_reference");
    }

    #[tokio::test]
    async fn cancelled_wait_reports_a_failure() {
        let (_tx, rx) = watch::channel(LoadJobState::Running);
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { job(rx).wait(None, &cancel).await }
        });
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.job_id, "job-1");
        assert!(err.message.contains("cancelled"));
    }

    #[tokio::test]
    async fn wait_gives_up_after_the_limit() {
        let (_tx, rx) = watch::channel(LoadJobState::Running);

        let err = job(rx)
            .wait(Some(Duration::from_millis(20)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn wait_returns_rows_when_the_job_finishes() {
        let (tx, rx) = watch::channel(LoadJobState::Running);
        tx.send_replace(LoadJobState::Succeeded { rows_loaded: 4 });

        let rows = job(rx)
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 4);
    }
}
