//! Raw delimited table -> Parquet.

use crate::rows::{Row, RowPolicy, TableReader};
use arrow::array::ArrayRef;
use arrow::compute::{CastOptions, cast_with_options};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use common::Result;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const BATCH_SIZE: usize = 8192;

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub duplicates_replaced: usize,
    /// Columns stored as canonical text.
    pub text_columns: Vec<String>,
}

/// Converts `raw` into `<stem>.parquet` next to it and removes `raw` once the
/// Parquet file is on disk. A zero-byte file becomes a Parquet file with no
/// columns and no rows.
///
/// Rows are keyed by the leading identifier column. When an identifier
/// repeats, the later row replaces the earlier one in place.
pub fn normalize_table(raw: &Path, policy: RowPolicy) -> Result<NormalizeReport> {
    let mut reader = TableReader::open(raw)?;
    let columns = column_names(reader.header());
    let (rows, rows_skipped) = reader.read_valid_rows(policy)?;
    let rows_read = rows.len() + rows_skipped;

    let (rows, duplicates_replaced) = key_by_identifier(rows, raw);
    if duplicates_replaced > 0 {
        warn!(
            file = %raw.display(),
            duplicates_replaced,
            "Duplicate row identifiers, later rows kept"
        );
    }

    let (schema, batches) = if columns.is_empty() {
        (Arc::new(Schema::empty()), Vec::new())
    } else {
        let staged = stage_rows(&columns, &rows)?;
        let (inferred, _) = Format::default()
            .with_header(true)
            .infer_schema(Cursor::new(&staged), None)?;
        let (target, _) = canonical_schema(&inferred);
        let text = decode_as_text(staged, &target)?;
        apply_column_types(&target, &text, raw)?
    };
    let text_columns = schema
        .fields()
        .iter()
        .filter(|field| field.data_type() == &DataType::Utf8)
        .map(|field| field.name().clone())
        .collect();
    let rows_written = batches.iter().map(RecordBatch::num_rows).sum();

    let output = raw.with_extension("parquet");
    let metadata = vec![
        KeyValue::new("source_file".to_string(), file_name(raw)),
        KeyValue::new("rows_skipped".to_string(), rows_skipped.to_string()),
        KeyValue::new("normalized_at".to_string(), Utc::now().to_rfc3339()),
    ];
    write_parquet(&output, schema, &batches, metadata)?;

    fs::remove_file(raw)?;

    info!(
        source = %raw.display(),
        output = %output.display(),
        rows_read,
        rows_written,
        rows_skipped,
        "Normalized table"
    );

    Ok(NormalizeReport {
        source: raw.to_path_buf(),
        output,
        rows_read,
        rows_written,
        rows_skipped,
        duplicates_replaced,
        text_columns,
    })
}

/// Header names usable as column names: blanks are named by position and
/// repeats get a numeric suffix.
pub fn column_names(header: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let base = if name.is_empty() {
                format!("column_{}", idx)
            } else {
                name.clone()
            };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}

/// The identifier column and every column inferred without a concrete
/// numeric, boolean or temporal type become nullable `Utf8`.
pub fn canonical_schema(inferred: &Schema) -> (Schema, Vec<String>) {
    let mut text_columns = Vec::new();
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            if idx == 0 || is_generic(field.data_type()) {
                text_columns.push(field.name().clone());
                Field::new(field.name(), DataType::Utf8, true)
            } else {
                field.as_ref().clone().with_nullable(true)
            }
        })
        .collect();
    (Schema::new(fields), text_columns)
}

fn is_generic(data_type: &DataType) -> bool {
    !(data_type.is_numeric() || data_type.is_temporal() || *data_type == DataType::Boolean)
}

fn key_by_identifier(rows: Vec<Row>, file: &Path) -> (Vec<Row>, usize) {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut keyed: Vec<Row> = Vec::with_capacity(rows.len());
    let mut replaced = 0;

    for row in rows {
        match positions.get(row.identifier()) {
            Some(&pos) => {
                debug!(
                    file = %file.display(),
                    identifier = row.identifier(),
                    line = row.line,
                    replaced_line = keyed[pos].line,
                    "Replacing row with duplicate identifier"
                );
                keyed[pos] = row;
                replaced += 1;
            }
            None => {
                positions.insert(row.identifier().to_string(), keyed.len());
                keyed.push(row);
            }
        }
    }

    (keyed, replaced)
}

fn decode_as_text(staged: Vec<u8>, target: &Schema) -> Result<Vec<RecordBatch>> {
    let fields: Vec<Field> = target
        .fields()
        .iter()
        .map(|field| Field::new(field.name(), DataType::Utf8, true))
        .collect();
    let batches = ReaderBuilder::new(Arc::new(Schema::new(fields)))
        .with_header(true)
        .with_batch_size(BATCH_SIZE)
        .build(Cursor::new(staged))?
        .collect::<std::result::Result<Vec<RecordBatch>, ArrowError>>()?;
    Ok(batches)
}

/// Casts each text column to its inferred type. Inference only looks at the
/// shape of a value, so a column holding something like `2021-02-30` is
/// inferred as a date but cannot be decoded as one; such columns stay `Utf8`.
fn apply_column_types(
    target: &Schema,
    text: &[RecordBatch],
    raw: &Path,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let mut fields = Vec::with_capacity(target.fields().len());
    let mut columns: Vec<Vec<ArrayRef>> = vec![Vec::with_capacity(target.fields().len()); text.len()];

    for (idx, field) in target.fields().iter().enumerate() {
        let as_text = || text.iter().map(|batch| batch.column(idx).clone()).collect::<Vec<_>>();
        let typed = if field.data_type() == &DataType::Utf8 {
            Ok(as_text())
        } else {
            text.iter()
                .map(|batch| cast_with_options(batch.column(idx), field.data_type(), &options))
                .collect::<std::result::Result<Vec<ArrayRef>, ArrowError>>()
        };

        let (field, arrays) = match typed {
            Ok(arrays) => (field.as_ref().clone(), arrays),
            Err(e) => {
                warn!(
                    file = %raw.display(),
                    column = %field.name(),
                    inferred = %field.data_type(),
                    error = %e,
                    "Column does not decode as its inferred type, keeping it as text"
                );
                (Field::new(field.name(), DataType::Utf8, true), as_text())
            }
        };
        fields.push(field);
        for (batch_columns, array) in columns.iter_mut().zip(arrays) {
            batch_columns.push(array);
        }
    }

    let schema = Arc::new(Schema::new(fields));
    let batches = columns
        .into_iter()
        .map(|arrays| RecordBatch::try_new(schema.clone(), arrays))
        .collect::<std::result::Result<Vec<_>, ArrowError>>()?;
    Ok((schema, batches))
}

fn stage_rows(columns: &[String], rows: &[Row]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(&row.fields)?;
    }
    writer
        .into_inner()
        .map_err(|e| common::Error::Io(e.into_error()))
}

fn write_parquet(
    output: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    metadata: Vec<KeyValue>,
) -> Result<()> {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(metadata))
        .build();

    let mut writer = ArrowWriter::try_new(tmp.as_file().try_clone()?, schema, Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;

    tmp.as_file().sync_all()?;
    tmp.persist(output).map_err(|e| e.error)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};
    use common::Error;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;

    fn read_parquet(path: &Path) -> (SchemaRef, Vec<RecordBatch>) {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
        let schema = builder.schema().clone();
        let batches = builder.build().unwrap().map(|b| b.unwrap()).collect();
        (schema, batches)
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> &'a T {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<T>()
            .unwrap()
    }

    #[test]
    fn skips_malformed_rows_and_keeps_numeric_columns() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("ACFTREF.txt");
        fs::write(
            &raw,
            "CODE,MFR,MODEL,NO-SEATS\n\
             2072738,CESSNA  ,172S,4\n\
             1151533,PIPER,PA-28-181\n\
             3930402,BOEING,737-800,189\n\
             7100215,MOONEY, M20J ,4\n",
        )
        .unwrap();

        let report = normalize_table(&raw, RowPolicy::Skip).unwrap();

        assert_eq!(report.rows_read, 4);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.output, dir.path().join("ACFTREF.parquet"));
        assert_eq!(report.text_columns, vec!["CODE", "MFR", "MODEL"]);
        assert!(!raw.exists());

        let (schema, batches) = read_parquet(&report.output);
        assert_eq!(schema.field_with_name("CODE").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(schema.field_with_name("MFR").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field_with_name("NO-SEATS").unwrap().data_type(),
            &DataType::Int64
        );
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 3);

        let mfr = column::<StringArray>(&batches[0], "MFR");
        assert_eq!(mfr.value(0), "CESSNA");
        let model = column::<StringArray>(&batches[0], "MODEL");
        assert_eq!(model.value(2), "M20J");
        let seats = column::<Int64Array>(&batches[0], "NO-SEATS");
        assert_eq!(seats.value(1), 189);
    }

    #[test]
    fn header_only_file_becomes_empty_parquet_with_same_columns() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("ENGINE.txt");
        fs::write(&raw, "CODE,MFR,MODEL,TYPE,HORSEPOWER,THRUST\n").unwrap();

        let report = normalize_table(&raw, RowPolicy::Skip).unwrap();

        assert_eq!(report.rows_written, 0);
        let (schema, batches) = read_parquet(&report.output);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["CODE", "MFR", "MODEL", "TYPE", "HORSEPOWER", "THRUST"]);
        assert!(schema.fields().iter().all(|f| f.data_type() == &DataType::Utf8));
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
    }

    #[test]
    fn identifiers_stay_text_and_later_duplicates_win() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("ENGINE.txt");
        fs::write(
            &raw,
            "CODE,MFR,HORSEPOWER\n00101,LYCOMING,160\n00202,CONTINENTAL,\n00101,LYCOMING,180\n",
        )
        .unwrap();

        let report = normalize_table(&raw, RowPolicy::Skip).unwrap();

        assert_eq!(report.duplicates_replaced, 1);
        assert_eq!(report.rows_written, 2);

        let (_, batches) = read_parquet(&report.output);
        let code = column::<StringArray>(&batches[0], "CODE");
        assert_eq!(code.value(0), "00101");
        assert_eq!(code.value(1), "00202");
        let hp = column::<Int64Array>(&batches[0], "HORSEPOWER");
        assert_eq!(hp.value(0), 180);
        assert!(hp.is_null(1));
    }

    #[test]
    fn strict_mode_keeps_the_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("DEREG.txt");
        fs::write(&raw, "N-NUMBER,NAME\n100,SMITH\n200\n").unwrap();

        let err = normalize_table(&raw, RowPolicy::Strict).unwrap_err();

        assert!(matches!(err, Error::MalformedRow(_)));
        assert!(raw.exists());
        assert!(!dir.path().join("DEREG.parquet").exists());
    }

    #[test]
    fn blank_and_repeated_header_names_are_made_unique() {
        let header: Vec<String> = ["CODE", "", "MFR", "MFR"].iter().map(|s| s.to_string()).collect();
        assert_eq!(column_names(&header), ["CODE", "column_1", "MFR", "MFR_1"]);
    }

    #[test]
    fn impossible_dates_keep_the_column_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("DEREG.txt");
        fs::write(
            &raw,
            "N-NUMBER,CANCEL-DATE,NO-SEATS\n100,2021-01-15,4\n200,2021-02-30,\n",
        )
        .unwrap();

        let report = normalize_table(&raw, RowPolicy::Skip).unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(report.text_columns, vec!["N-NUMBER", "CANCEL-DATE"]);
        let (schema, batches) = read_parquet(&report.output);
        assert_eq!(
            schema.field_with_name("CANCEL-DATE").unwrap().data_type(),
            &DataType::Utf8
        );
        let dates = column::<StringArray>(&batches[0], "CANCEL-DATE");
        assert_eq!(dates.value(1), "2021-02-30");
        let seats = column::<Int64Array>(&batches[0], "NO-SEATS");
        assert_eq!(seats.value(0), 4);
        assert!(seats.is_null(1));
    }

    #[test]
    fn valid_dates_stay_temporal() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("DEREG.txt");
        fs::write(&raw, "N-NUMBER,CANCEL-DATE\n100,2021-01-15\n200,\n").unwrap();

        let report = normalize_table(&raw, RowPolicy::Skip).unwrap();

        let (schema, batches) = read_parquet(&report.output);
        assert_eq!(
            schema.field_with_name("CANCEL-DATE").unwrap().data_type(),
            &DataType::Date32
        );
        assert!(batches[0].column_by_name("CANCEL-DATE").unwrap().is_null(1));
    }

    #[test]
    fn zero_byte_file_becomes_empty_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("DOCINDEX.txt");
        fs::write(&raw, b"").unwrap();

        let report = normalize_table(&raw, RowPolicy::Strict).unwrap();

        assert_eq!(report.rows_read, 0);
        assert_eq!(report.rows_written, 0);
        assert!(report.text_columns.is_empty());
        assert!(!raw.exists());
        let (schema, batches) = read_parquet(&report.output);
        assert!(schema.fields().is_empty());
        assert!(batches.is_empty());
    }
}
