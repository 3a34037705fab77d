//! Generic row validation for delimited registration tables.
//!
//! Every tabular file goes through [`TableReader`], which checks each record
//! against the header instead of relying on knowledge of particular files.

use common::{MalformedRowError, Result, RowDefect};
use csv::{ByteRecord, ReaderBuilder, Trim};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

const BOM: char = '\u{feff}';

/// What to do with a row that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowPolicy {
    /// Log the row and keep going.
    #[default]
    Skip,
    /// Fail with [`MalformedRowError`].
    Strict,
}

impl RowPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { RowPolicy::Strict } else { RowPolicy::Skip }
    }

    /// Returns `Ok(())` when the row has been dropped and reading may continue.
    pub fn handle(&self, file: &Path, line: u64, defect: RowDefect) -> Result<()> {
        match self {
            RowPolicy::Skip => {
                warn!(file = %file.display(), line, %defect, "Dropping malformed row");
                Ok(())
            }
            RowPolicy::Strict => Err(MalformedRowError {
                file: file.to_path_buf(),
                line,
                defect,
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: u64,
    pub fields: Vec<String>,
}

impl Row {
    pub fn identifier(&self) -> &str {
        &self.fields[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRead {
    Valid(Row),
    Malformed { line: u64, defect: RowDefect },
}

pub struct TableReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    header: Vec<String>,
    record: ByteRecord,
}

impl TableReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)?;

        // A zero-byte file reads as a table with no columns and no rows.
        let mut record = ByteRecord::new();
        reader.read_byte_record(&mut record)?;

        let header = record
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let name = String::from_utf8_lossy(field);
                if idx == 0 {
                    name.trim_start_matches(BOM).trim().to_string()
                } else {
                    name.into_owned()
                }
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            header,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn next_row(&mut self) -> Result<Option<RowRead>> {
        if !self.reader.read_byte_record(&mut self.record)? {
            return Ok(None);
        }

        let line = self.record.position().map(|p| p.line()).unwrap_or(0);
        Ok(Some(match self.validate() {
            Ok(fields) => RowRead::Valid(Row { line, fields }),
            Err(defect) => RowRead::Malformed { line, defect },
        }))
    }

    fn validate(&self) -> std::result::Result<Vec<String>, RowDefect> {
        if self.record.len() != self.header.len() {
            return Err(RowDefect::FieldCount {
                expected: self.header.len(),
                found: self.record.len(),
            });
        }

        let mut fields = Vec::with_capacity(self.record.len());
        for (field, bytes) in self.record.iter().enumerate() {
            let value = std::str::from_utf8(bytes).map_err(|_| RowDefect::Encoding { field })?;
            fields.push(value.to_string());
        }

        match fields.first() {
            Some(id) if id.is_empty() => Err(RowDefect::MissingIdentifier),
            Some(id) if Some(id) == self.header.first() => Err(RowDefect::HeaderEcho),
            _ => Ok(fields),
        }
    }

    /// Reads the remaining rows, routing defects through `policy`.
    /// Returns the valid rows and the number of rows dropped.
    pub fn read_valid_rows(&mut self, policy: RowPolicy) -> Result<(Vec<Row>, usize)> {
        let mut rows = Vec::new();
        let mut dropped = 0;
        while let Some(read) = self.next_row()? {
            match read {
                RowRead::Valid(row) => rows.push(row),
                RowRead::Malformed { line, defect } => {
                    policy.handle(&self.path, line, defect)?;
                    dropped += 1;
                }
            }
        }
        Ok((rows, dropped))
    }
}
