use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use common::Result;
use common::config::{ColumnConfig, ColumnType};
use std::collections::HashSet;
use std::sync::Arc;

pub fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::String => DataType::Utf8,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

/// Table schema for a load target. Every column is nullable.
pub fn table_schema(columns: &[ColumnConfig]) -> Result<SchemaRef> {
    if columns.is_empty() {
        return Err(common::Error::InvalidInput(
            "load target declares no columns".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(common::Error::InvalidInput(format!(
                "column {} is declared twice",
                column.name
            )));
        }
        fields.push(Field::new(&column.name, arrow_type(column.column_type), true));
    }

    Ok(Arc::new(Schema::new(fields)))
}
