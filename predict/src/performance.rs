//! On-time performance summaries per airline and per origin airport.

use arrow::array::Array;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use common::Result;
use datafusion::common::cast::{as_float64_array, as_int64_array, as_string_array};
use datafusion::dataframe::DataFrame;
use datafusion::functions_aggregate::count::count_all;
use datafusion::functions_aggregate::expr_fn::avg;
use datafusion::logical_expr::{Expr, cast, col, lit, when};
use ingest::warehouse::DataFusionWarehouse;
use serde::Serialize;
use tracing::debug;

/// Warehouse table with one row per flight.
pub const FLIGHTS_TABLE: &str = "combined_data";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnTimeStats {
    /// Share of flights that arrived late.
    pub delay_rate: f64,
    /// Mean arrival delay in minutes, `None` when no flight reported one.
    pub average_delay: Option<f64>,
    pub cancellation_rate: f64,
    pub flights: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirlinePerformance {
    pub airline: String,
    #[serde(flatten)]
    pub stats: OnTimeStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirportPerformance {
    pub code: String,
    pub name: String,
    #[serde(flatten)]
    pub stats: OnTimeStats,
}

/// Which origin airports make the ranking.
#[derive(Debug, Clone, Copy)]
pub struct AirportRanking {
    /// Airports need more than this many flights to be ranked.
    pub min_flights: i64,
    pub top: usize,
}

impl Default for AirportRanking {
    fn default() -> Self {
        Self {
            min_flights: 10_000,
            top: 20,
        }
    }
}

#[async_trait]
pub trait PerformanceSummary: Send + Sync {
    /// Every airline, worst delay rate first.
    async fn airline_performance(&self) -> Result<Vec<AirlinePerformance>>;

    /// The busiest origin airports with the worst delay rates.
    async fn airport_performance(&self, ranking: AirportRanking) -> Result<Vec<AirportPerformance>>;
}

#[async_trait]
impl PerformanceSummary for DataFusionWarehouse {
    async fn airline_performance(&self) -> Result<Vec<AirlinePerformance>> {
        let flights = self.session().table(FLIGHTS_TABLE).await?;
        let batches = ranked(flights.aggregate(vec![col("airline_name")], stats_aggregates()?)?)?
            .select(with_stats(vec![text(col("airline_name"), "airline")]))?
            .collect()
            .await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let airlines = as_string_array(batch.column(0))?;
            for row in 0..batch.num_rows() {
                rows.push(AirlinePerformance {
                    airline: airlines.value(row).to_string(),
                    stats: read_stats(batch, 1, row)?,
                });
            }
        }
        debug!(airlines = rows.len(), "Airline performance summary");
        Ok(rows)
    }

    async fn airport_performance(&self, ranking: AirportRanking) -> Result<Vec<AirportPerformance>> {
        let flights = self.session().table(FLIGHTS_TABLE).await?;
        let grouped = flights
            .aggregate(
                vec![col("ORIGIN_AIRPORT"), col("origin_airport_name")],
                stats_aggregates()?,
            )?
            .filter(col("flights").gt(lit(ranking.min_flights)))?;
        let batches = ranked(grouped)?
            .limit(0, Some(ranking.top))?
            .select(with_stats(vec![
                text(col("ORIGIN_AIRPORT"), "code"),
                text(col("origin_airport_name"), "name"),
            ]))?
            .collect()
            .await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let codes = as_string_array(batch.column(0))?;
            let names = as_string_array(batch.column(1))?;
            for row in 0..batch.num_rows() {
                rows.push(AirportPerformance {
                    code: codes.value(row).to_string(),
                    name: names.value(row).to_string(),
                    stats: read_stats(batch, 2, row)?,
                });
            }
        }
        debug!(airports = rows.len(), min_flights = ranking.min_flights, "Airport performance summary");
        Ok(rows)
    }
}

/// Mean of a 0/1 indicator; rows where `condition` is null count as 0.
fn share(condition: Expr) -> Result<Expr> {
    Ok(avg(when(condition, lit(1.0)).otherwise(lit(0.0))?))
}

fn stats_aggregates() -> Result<Vec<Expr>> {
    Ok(vec![
        share(col("ARRIVAL_DELAY").gt(lit(0)))?.alias("delay_rate"),
        avg(cast(col("ARRIVAL_DELAY"), DataType::Float64)).alias("average_delay"),
        share(col("CANCELLED").gt(lit(0)))?.alias("cancellation_rate"),
        count_all().alias("flights"),
    ])
}

fn ranked(grouped: DataFrame) -> Result<DataFrame> {
    Ok(grouped.sort(vec![col("delay_rate").sort(false, false)])?)
}

fn text(expr: Expr, name: &str) -> Expr {
    cast(expr, DataType::Utf8).alias(name)
}

fn with_stats(mut keys: Vec<Expr>) -> Vec<Expr> {
    keys.extend([
        col("delay_rate"),
        col("average_delay"),
        col("cancellation_rate"),
        col("flights"),
    ]);
    keys
}

fn read_stats(batch: &RecordBatch, first: usize, row: usize) -> Result<OnTimeStats> {
    let delay_rate = as_float64_array(batch.column(first))?;
    let average_delay = as_float64_array(batch.column(first + 1))?;
    let cancellation_rate = as_float64_array(batch.column(first + 2))?;
    let flights = as_int64_array(batch.column(first + 3))?;

    Ok(OnTimeStats {
        delay_rate: delay_rate.value(row),
        average_delay: (!average_delay.is_null(row)).then(|| average_delay.value(row)),
        cancellation_rate: cancellation_rate.value(row),
        flights: flights.value(row).max(0) as u64,
    })
}
