//! Parquet event files as an [`EventSource`].
//!
//! A sample is a single `.parquet` file or a directory tree of them. The
//! files of a sample are read as one concatenated event sequence; global
//! event indices run across files in sample order. Only the requested
//! fields are decoded (Parquet column projection).
//!
//! Every numeric or boolean column can be read; values are widened to `f64`
//! (booleans as 0/1, nulls as NaN).

use std::cmp::Ordering;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Float64Type};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{HistError, Result};
use crate::fields::FieldSet;
use crate::source::{DEFAULT_BATCH_SIZE, EventBatch, EventSource, check_range};

/// File extension of event files inside a sample directory.
pub const EVENT_FILE_EXTENSION: &str = "parquet";

/// Resolve a sample path into its ordered list of event files.
///
/// A file is returned as-is. A directory is searched recursively for
/// `*.parquet` files, ordered naturally (`f2` before `f10`).
pub fn resolve_sample(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(HistError::Source(format!("sample {} doesn't exist", path.display())));
    }

    let mut files = Vec::new();
    collect_event_files(path, &mut files)?;
    if files.is_empty() {
        return Err(HistError::Source(format!(
            "no .{EVENT_FILE_EXTENSION} files under {}",
            path.display()
        )));
    }
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

fn collect_event_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_event_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(EVENT_FILE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// Compare strings treating embedded digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut da = String::new();
                while let Some(c) = a.next_if(char::is_ascii_digit) {
                    da.push(c);
                }
                let mut db = String::new();
                while let Some(c) = b.next_if(char::is_ascii_digit) {
                    db.push(c);
                }
                let ta = da.trim_start_matches('0');
                let tb = db.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

/// Convert an Arrow column to `f64` values.
fn column_to_f64(name: &str, col: &ArrayRef) -> Result<Vec<f64>> {
    let dt = col.data_type();
    if !(dt.is_numeric() || *dt == DataType::Boolean) {
        return Err(HistError::Source(format!("field '{name}' has unsupported type {dt}")));
    }
    let casted = arrow::compute::cast(col, &DataType::Float64)?;
    let values = casted.as_primitive::<Float64Type>();
    Ok((0..values.len()).map(|i| if values.is_null(i) { f64::NAN } else { values.value(i) }).collect())
}

/// One Parquet file of a chain.
#[derive(Debug, Clone)]
struct ChainFile {
    path: PathBuf,
    entries: u64,
    fields: FieldSet,
}

/// Several Parquet files read as one event sequence.
#[derive(Debug, Clone)]
pub struct ParquetChain {
    files: Vec<ChainFile>,
    batch_size: usize,
}

impl ParquetChain {
    /// Open every file and read its metadata. Any unreadable file is an error.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let files = paths
            .iter()
            .map(|path| {
                let file = File::open(path).map_err(|e| {
                    HistError::Source(format!("failed to open {}: {e}", path.display()))
                })?;
                let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
                    HistError::Source(format!("failed to read {}: {e}", path.display()))
                })?;
                let entries = builder.metadata().file_metadata().num_rows().max(0) as u64;
                let fields = FieldSet::from_names(
                    builder.schema().fields().iter().map(|f| f.name().clone()),
                );
                tracing::debug!(path = %path.display(), entries, "adding event file");
                Ok(ChainFile { path: path.clone(), entries, fields })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files, batch_size: DEFAULT_BATCH_SIZE })
    }

    /// Set the number of events per decoded batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn read_file(
        &self,
        file: &ChainFile,
        fields: &FieldSet,
        local: Range<u64>,
        first_entry: u64,
        visit: &mut dyn FnMut(&EventBatch) -> Result<()>,
    ) -> Result<()> {
        let handle = File::open(&file.path).map_err(|e| {
            HistError::Source(format!("failed to open {}: {e}", file.path.display()))
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(handle)?;

        let roots = fields
            .names()
            .iter()
            .map(|name| {
                builder.schema().index_of(name).map_err(|_| {
                    HistError::MissingField(format!("'{name}' in {}", file.path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);

        let reader = builder
            .with_projection(mask)
            .with_offset(local.start as usize)
            .with_limit((local.end - local.start) as usize)
            .with_batch_size(self.batch_size)
            .build()?;

        let mut entry = first_entry;
        for batch in reader {
            let batch = batch?;
            let columns = fields
                .names()
                .iter()
                .map(|name| {
                    let col = batch
                        .column_by_name(name)
                        .ok_or_else(|| HistError::MissingField(name.clone()))?;
                    column_to_f64(name, col)
                })
                .collect::<Result<Vec<_>>>()?;
            let events = EventBatch::from_parts(fields.clone(), entry, batch.num_rows(), columns)?;
            visit(&events)?;
            entry += batch.num_rows() as u64;
        }

        let expected = first_entry + (local.end - local.start);
        if entry != expected {
            return Err(HistError::Source(format!(
                "{} ended after {} of {} requested events",
                file.path.display(),
                entry - first_entry,
                local.end - local.start
            )));
        }
        Ok(())
    }
}

impl EventSource for ParquetChain {
    fn total_entries(&self) -> u64 {
        self.files.iter().map(|f| f.entries).sum()
    }

    fn has_field(&self, name: &str) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.fields.contains(name))
    }

    fn read_range(
        &mut self,
        fields: &FieldSet,
        range: Range<u64>,
        visit: &mut dyn FnMut(&EventBatch) -> Result<()>,
    ) -> Result<()> {
        check_range(&range, self.total_entries())?;
        let mut offset = 0u64;
        for file in &self.files {
            let file_range = offset..offset + file.entries;
            offset += file.entries;
            let start = range.start.max(file_range.start);
            let end = range.end.min(file_range.end);
            if start >= end {
                continue;
            }
            let local = (start - file_range.start)..(end - file_range.start);
            self.read_file(file, fields, local, start, visit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order() {
        let mut names = vec!["job10.parquet", "job2.parquet", "job1.parquet", "a/job3.parquet"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["a/job3.parquet", "job1.parquet", "job2.parquet", "job10.parquet"]);
        assert_eq!(natural_cmp("x007", "x7"), Ordering::Equal);
        assert_eq!(natural_cmp("x", "x1"), Ordering::Less);
    }

    #[test]
    fn missing_sample_is_an_error() {
        let err = resolve_sample(Path::new("/definitely/not/here")).unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(resolve_sample(dir.path()).is_err());
    }
}
