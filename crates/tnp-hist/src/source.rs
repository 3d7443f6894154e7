//! Event records, columnar batches and the event source abstraction.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{HistError, Result};
use crate::fields::FieldSet;

/// Default number of events per batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// A read-only event with named scalar fields.
pub trait EventRecord {
    /// Value of field `name` (booleans as 0/1), if the field is materialized.
    fn field(&self, name: &str) -> Option<f64>;
}

/// A block of consecutive events with the materialized fields stored column-wise.
///
/// Column `k` holds the values of `fields().names()[k]`.
#[derive(Debug, Clone)]
pub struct EventBatch {
    fields: FieldSet,
    first_entry: u64,
    len: usize,
    columns: Vec<Vec<f64>>,
}

impl EventBatch {
    /// Build a batch from columns in `fields` slot order.
    pub fn new(fields: FieldSet, first_entry: u64, columns: Vec<Vec<f64>>) -> Result<Self> {
        let len = columns.first().map(Vec::len).unwrap_or(0);
        Self::from_parts(fields, first_entry, len, columns)
    }

    /// Build a batch with an explicit event count (needed when no field is materialized).
    pub fn from_parts(
        fields: FieldSet,
        first_entry: u64,
        len: usize,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if columns.len() != fields.len() {
            return Err(HistError::Source(format!(
                "batch has {} columns for {} fields",
                columns.len(),
                fields.len()
            )));
        }
        if let Some((i, _)) = columns.iter().enumerate().find(|(_, c)| c.len() != len) {
            return Err(HistError::Source(format!(
                "column '{}' has {} values, expected {len}",
                fields.names()[i],
                columns[i].len()
            )));
        }
        Ok(Self { fields, first_entry, len, columns })
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Global index of the first event.
    pub fn first_entry(&self) -> u64 {
        self.first_entry
    }

    /// Materialized fields, in column order.
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Row view of event `index` within the batch.
    #[inline]
    pub fn row(&self, index: usize) -> Row<'_> {
        Row { batch: self, index }
    }

    /// Iterate over all rows.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.len).map(move |i| self.row(i))
    }
}

/// One event inside an [`EventBatch`].
#[derive(Debug, Clone, Copy)]
pub struct Row<'b> {
    batch: &'b EventBatch,
    index: usize,
}

impl Row<'_> {
    /// Value in column `slot`.
    #[inline]
    pub fn value(&self, slot: usize) -> f64 {
        self.batch.columns[slot][self.index]
    }

    /// Global event index.
    pub fn entry(&self) -> u64 {
        self.batch.first_entry + self.index as u64
    }
}

impl EventRecord for Row<'_> {
    fn field(&self, name: &str) -> Option<f64> {
        self.batch.fields.position(name).map(|slot| self.value(slot))
    }
}

/// A sequence of events with a known length that can materialize a subset of fields.
pub trait EventSource {
    /// Total number of events.
    fn total_entries(&self) -> u64;

    /// Whether `name` can be materialized.
    fn has_field(&self, name: &str) -> bool;

    /// Visit events `range` in order, materializing only `fields`.
    ///
    /// A range reaching past [`EventSource::total_entries`] is an error.
    fn read_range(
        &mut self,
        fields: &FieldSet,
        range: Range<u64>,
        visit: &mut dyn FnMut(&EventBatch) -> Result<()>,
    ) -> Result<()>;
}

pub(crate) fn check_range(range: &Range<u64>, total: u64) -> Result<()> {
    if range.start > range.end || range.end > total {
        return Err(HistError::Source(format!(
            "event range {}..{} exceeds source of {total} events",
            range.start, range.end
        )));
    }
    Ok(())
}

/// In-memory event source over named columns.
#[derive(Debug, Clone)]
pub struct MemorySource {
    columns: BTreeMap<String, Vec<f64>>,
    entries: u64,
    batch_size: usize,
}

impl MemorySource {
    /// Create a source from named columns of equal length.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let columns: BTreeMap<String, Vec<f64>> =
            columns.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let entries = columns.values().next().map(Vec::len).unwrap_or(0);
        if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != entries) {
            return Err(HistError::Source(format!(
                "column '{name}' has {} values, expected {entries}",
                col.len()
            )));
        }
        Ok(Self { columns, entries: entries as u64, batch_size: DEFAULT_BATCH_SIZE })
    }

    /// Set the number of events per visited batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl EventSource for MemorySource {
    fn total_entries(&self) -> u64 {
        self.entries
    }

    fn has_field(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn read_range(
        &mut self,
        fields: &FieldSet,
        range: Range<u64>,
        visit: &mut dyn FnMut(&EventBatch) -> Result<()>,
    ) -> Result<()> {
        check_range(&range, self.entries)?;
        let source: Vec<&Vec<f64>> = fields
            .names()
            .iter()
            .map(|name| {
                self.columns.get(name).ok_or_else(|| HistError::MissingField(name.clone()))
            })
            .collect::<Result<_>>()?;

        let mut start = range.start as usize;
        let end = range.end as usize;
        while start < end {
            let stop = (start + self.batch_size).min(end);
            let columns = source.iter().map(|c| c[start..stop].to_vec()).collect();
            let batch = EventBatch::from_parts(fields.clone(), start as u64, stop - start, columns)?;
            visit(&batch)?;
            start = stop;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_batches_cover_range() {
        let mut src = MemorySource::new([
            ("x", vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            ("y", vec![10.0, 11.0, 12.0, 13.0, 14.0]),
        ])
        .unwrap()
        .with_batch_size(2);
        let fields = FieldSet::from_names(["y"]);

        let mut seen = Vec::new();
        src.read_range(&fields, 1..5, &mut |batch| {
            assert!(batch.len() <= 2);
            for row in batch.rows() {
                seen.push((row.entry(), row.field("y").unwrap()));
                assert!(row.field("x").is_none());
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(1, 11.0), (2, 12.0), (3, 13.0), (4, 14.0)]);
    }

    #[test]
    fn memory_source_rejects_bad_input() {
        assert!(MemorySource::new([("x", vec![1.0]), ("y", vec![1.0, 2.0])]).is_err());

        let mut src = MemorySource::new([("x", vec![1.0, 2.0])]).unwrap();
        let fields = FieldSet::from_names(["x"]);
        assert!(src.read_range(&fields, 0..3, &mut |_| Ok(())).is_err());

        let fields = FieldSet::from_names(["z"]);
        let err = src.read_range(&fields, 0..2, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, HistError::MissingField(_)));
    }

    #[test]
    fn visitor_error_propagates() {
        let mut src = MemorySource::new([("x", vec![1.0, 2.0])]).unwrap();
        let fields = FieldSet::from_names(["x"]);
        let err = src
            .read_range(&fields, 0..2, &mut |_| Err(HistError::Source("boom".into())))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
