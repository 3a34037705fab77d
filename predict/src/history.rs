use arrow::array::{Array, Float64Array};
use arrow::datatypes::DataType;
use async_trait::async_trait;
use common::Result;
use datafusion::logical_expr::{cast, col, lit};
use ingest::warehouse::DataFusionWarehouse;
use tracing::debug;

/// Warehouse table holding historical departure delays per route.
pub const DELAY_TABLE: &str = "departure_delays";

/// Source of the historical departure delay for a route.
#[async_trait]
pub trait DelayHistory: Send + Sync {
    /// Minutes of historical delay, or 0 when the route has no history.
    async fn historical_delay(&self, airline: &str, origin: &str, destination: &str) -> Result<f64>;
}

#[async_trait]
impl DelayHistory for DataFusionWarehouse {
    async fn historical_delay(&self, airline: &str, origin: &str, destination: &str) -> Result<f64> {
        let batches = self
            .session()
            .table(DELAY_TABLE)
            .await?
            .filter(
                col("AIRLINE")
                    .eq(lit(airline))
                    .and(col("ORIGIN_AIRPORT").eq(lit(origin)))
                    .and(col("DESTINATION_AIRPORT").eq(lit(destination))),
            )?
            .select(vec![
                cast(col("HIST_DEPART_DELAY"), DataType::Float64).alias("delay"),
            ])?
            .limit(0, Some(1))?
            .collect()
            .await?;

        let delay = batches
            .iter()
            .find(|batch| batch.num_rows() > 0)
            .and_then(|batch| batch.column(0).as_any().downcast_ref::<Float64Array>())
            .filter(|delays| !delays.is_null(0))
            .map(|delays| delays.value(0))
            .unwrap_or(0.0);

        debug!(airline, origin, destination, delay, "Historical delay lookup");
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn warehouse_with_delays() -> DataFusionWarehouse {
        let schema = Arc::new(Schema::new(vec![
            Field::new("AIRLINE", DataType::Utf8, false),
            Field::new("ORIGIN_AIRPORT", DataType::Utf8, false),
            Field::new("DESTINATION_AIRPORT", DataType::Utf8, false),
            Field::new("HIST_DEPART_DELAY", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["AA", "DL"])),
                Arc::new(StringArray::from(vec!["JFK", "ATL"])),
                Arc::new(StringArray::from(vec!["LAX", "SEA"])),
                Arc::new(Int64Array::from(vec![Some(12), None])),
            ],
        )
        .unwrap();

        let warehouse = DataFusionWarehouse::new();
        warehouse.session().register_batch(DELAY_TABLE, batch).unwrap();
        warehouse
    }

    #[tokio::test]
    async fn returns_the_route_delay() {
        let warehouse = warehouse_with_delays();
        let delay = warehouse.historical_delay("AA", "JFK", "LAX").await.unwrap();
        assert_eq!(delay, 12.0);
    }

    #[tokio::test]
    async fn unknown_or_null_routes_have_no_delay() {
        let warehouse = warehouse_with_delays();
        assert_eq!(warehouse.historical_delay("UA", "ORD", "SFO").await.unwrap(), 0.0);
        assert_eq!(warehouse.historical_delay("DL", "ATL", "SEA").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn missing_table_is_an_error() {
        let warehouse = DataFusionWarehouse::new();
        assert!(warehouse.historical_delay("AA", "JFK", "LAX").await.is_err());
    }
}
