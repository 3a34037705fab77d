use super::{LoadJob, LoadJobState, LoadRequest, Warehouse};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use common::Result;
use dashmap::DashMap;
use datafusion::dataframe::DataFrame;
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{Expr, cast, ident};
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use object_store::ObjectStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

struct TableData {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// Warehouse backed by a DataFusion session. Loaded tables are held in memory
/// and registered with the session so they can be queried with SQL.
#[derive(Clone)]
pub struct DataFusionWarehouse {
    ctx: Arc<SessionContext>,
    tables: Arc<DashMap<String, TableData>>,
}

impl Default for DataFusionWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFusionWarehouse {
    pub fn new() -> Self {
        Self {
            ctx: Arc::new(SessionContext::new()),
            tables: Arc::new(DashMap::new()),
        }
    }

    /// Makes `s3://<bucket>/...` URIs readable through `store`.
    pub fn register_bucket(&self, bucket: &str, store: Arc<dyn ObjectStore>) -> Result<()> {
        let url = Url::parse(&format!("s3://{}", bucket))?;
        self.ctx.register_object_store(&url, store);
        debug!(bucket, "Registered object store with warehouse session");
        Ok(())
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }
}

#[async_trait]
impl Warehouse for DataFusionWarehouse {
    async fn submit_load(&self, request: LoadRequest) -> Result<LoadJob> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(LoadJobState::Submitted);
        let job = LoadJob::new(
            id.clone(),
            request.source_uri.clone(),
            request.table.clone(),
            rx,
        );

        let ctx = Arc::clone(&self.ctx);
        let tables = Arc::clone(&self.tables);
        tokio::spawn(async move {
            tx.send_replace(LoadJobState::Running);
            let state = match execute_load(&ctx, &tables, &request).await {
                Ok(rows_loaded) => {
                    info!(job_id = %id, table = %request.table, rows_loaded, "Load job succeeded");
                    LoadJobState::Succeeded { rows_loaded }
                }
                Err(e) => {
                    warn!(job_id = %id, table = %request.table, error = %e, "Load job failed");
                    LoadJobState::Failed {
                        error: e.to_string(),
                    }
                }
            };
            tx.send_replace(state);
        });

        Ok(job)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let df = self.ctx.table(table).await?;
        Ok(df.count().await? as u64)
    }
}

async fn execute_load(
    ctx: &SessionContext,
    tables: &DashMap<String, TableData>,
    request: &LoadRequest,
) -> Result<u64> {
    let (source, by_position) = read_source(ctx, request).await?;
    let projection = project(&source, &request.schema, by_position)?;
    let batches = source.select(projection)?.collect().await?;
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();

    let mut entry = tables
        .entry(request.table.clone())
        .or_insert_with(|| TableData {
            schema: Arc::clone(&request.schema),
            batches: Vec::new(),
        });
    if entry.schema.fields() != request.schema.fields() {
        return Err(common::Error::InvalidInput(format!(
            "table {} exists with a different schema",
            request.table
        )));
    }
    entry.batches.extend(batches);

    let provider = MemTable::try_new(Arc::clone(&entry.schema), vec![entry.batches.clone()])?;
    ctx.deregister_table(request.table.as_str())?;
    ctx.register_table(request.table.as_str(), Arc::new(provider))?;

    Ok(rows as u64)
}

/// Opens the source object. Delimited sources without a header row are
/// matched to the table columns by position.
async fn read_source(ctx: &SessionContext, request: &LoadRequest) -> Result<(DataFrame, bool)> {
    let extension = source_extension(&request.source_uri).unwrap_or_default();

    if extension.eq_ignore_ascii_case("parquet") {
        let df = ctx
            .read_parquet(request.source_uri.as_str(), ParquetReadOptions::default())
            .await?;
        return Ok((df, false));
    }

    let has_header = match request.skip_leading_rows {
        0 => false,
        1 => true,
        n => {
            return Err(common::Error::InvalidInput(format!(
                "cannot skip {} leading rows of {}; only a single header row is supported",
                n, request.source_uri
            )));
        }
    };
    let file_extension = format!(".{}", extension);
    let options = CsvReadOptions::new()
        .has_header(has_header)
        .file_extension(&file_extension);
    let df = ctx.read_csv(request.source_uri.as_str(), options).await?;
    Ok((df, !has_header))
}

fn project(source: &DataFrame, schema: &SchemaRef, by_position: bool) -> Result<Vec<Expr>> {
    let available = source.schema().fields();
    if by_position && available.len() < schema.fields().len() {
        return Err(common::Error::InvalidInput(format!(
            "source has {} columns, table needs {}",
            available.len(),
            schema.fields().len()
        )));
    }

    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let source_name = if by_position {
                available[idx].name().as_str()
            } else if source.schema().has_column_with_unqualified_name(field.name()) {
                field.name().as_str()
            } else {
                return Err(common::Error::InvalidInput(format!(
                    "source has no column {}",
                    field.name()
                )));
            };
            Ok(cast(ident(source_name), field.data_type().clone()).alias(field.name()))
        })
        .collect()
}

fn source_extension(uri: &str) -> Option<&str> {
    let name = uri.rsplit('/').next()?;
    name.rsplit_once('.').map(|(_, ext)| ext)
}
