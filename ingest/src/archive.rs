//! Archive expansion and content-based repair of the extracted tables.

use crate::rows::{RowPolicy, RowRead, TableReader};
use common::{ArchiveError, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::ZipArchive;

#[derive(Debug, Default)]
pub struct Expansion {
    /// Extracted files whose extension marks them as delimited tables.
    pub tabular: Vec<PathBuf>,
    /// Everything else the archive contained (documentation, readme files).
    pub other: Vec<PathBuf>,
    /// Rows removed from `tabular` files by the repair pass.
    pub rows_dropped: usize,
}

/// Extracts `archive` into its containing directory and repairs every
/// tabular entry.
///
/// Entry names are joined onto the destination explicitly; the process
/// working directory is never touched. All names are checked before the
/// first byte is written, so an archive with a single escaping entry
/// extracts nothing.
pub fn expand_archive(
    archive: &Path,
    tabular_extensions: &[String],
    policy: RowPolicy,
) -> Result<Expansion> {
    let dest = archive
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let file = File::open(archive).map_err(|source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|source| ArchiveError::Corrupt {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|source| ArchiveError::Corrupt {
            path: archive.to_path_buf(),
            source,
        })?;
        let relative = contained_path(entry.name())
            .filter(|_| entry.enclosed_name().is_some())
            .ok_or_else(|| ArchiveError::UnsafeEntry {
                path: archive.to_path_buf(),
                entry: entry.name().to_string(),
            })?;
        entries.push((index, relative, entry.is_dir()));
    }

    let mut expansion = Expansion::default();
    for (index, relative, is_dir) in entries {
        let target = dest.join(&relative);
        let io_err = |source: io::Error| ArchiveError::Io {
            path: target.clone(),
            source,
        };

        if is_dir {
            fs::create_dir_all(&target).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut entry = zip.by_index(index).map_err(|source| ArchiveError::Corrupt {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut out = File::create(&target).map_err(io_err)?;
        let bytes = io::copy(&mut entry, &mut out).map_err(io_err)?;
        debug!(entry = %relative.display(), bytes, "Extracted archive entry");

        if has_extension(&target, tabular_extensions) {
            expansion.tabular.push(target);
        } else {
            expansion.other.push(target);
        }
    }

    for table in &expansion.tabular {
        expansion.rows_dropped += repair_table(table, policy)?;
    }

    info!(
        archive = %archive.display(),
        tabular = expansion.tabular.len(),
        other = expansion.other.len(),
        rows_dropped = expansion.rows_dropped,
        "Expanded archive"
    );

    Ok(expansion)
}

/// Rewrites `path` without its malformed rows. The file is left untouched
/// when every row is valid. Returns the number of rows dropped.
pub fn repair_table(path: &Path, policy: RowPolicy) -> Result<usize> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut reader = TableReader::open(path)?;
    if reader.header().is_empty() {
        debug!(file = %path.display(), "Empty table, nothing to repair");
        return Ok(0);
    }
    let tmp = NamedTempFile::new_in(dir)?;

    let mut dropped = 0;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file());
        writer.write_record(reader.header())?;
        while let Some(read) = reader.next_row()? {
            match read {
                RowRead::Valid(row) => writer.write_record(&row.fields)?,
                RowRead::Malformed { line, defect } => {
                    policy.handle(path, line, defect)?;
                    dropped += 1;
                }
            }
        }
        writer.flush()?;
    }

    if dropped == 0 {
        return Ok(0);
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!(file = %path.display(), dropped, "Repaired table");
    Ok(dropped)
}

/// Relative path for an entry name, or `None` if any component could leave
/// the destination directory.
fn contained_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
