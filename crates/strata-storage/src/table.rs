//! Tables: named column arrays of equal length.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::schema::{DataType, Field, Schema};
use strata_core::types::RowBatch;

use crate::block_store::BlockStore;
use crate::column::{ColumnArray, ColumnReader};
use crate::error::{Error, Result};
use crate::index::{read_index, write_index, TableIndex};
use crate::temp::TempFiles;

#[derive(Clone)]
pub struct Table {
    store: Arc<BlockStore>,
    columns: Vec<ColumnArray>,
    num_rows: u64,
    index_path: Option<PathBuf>,
}

impl Table {
    /// Build a table from columns, renaming them to `names`. All columns must
    /// have the same row and segment count.
    pub fn from_columns(
        store: &Arc<BlockStore>,
        names: Vec<String>,
        columns: Vec<ColumnArray>,
    ) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(Error::Schema(format!(
                "{} names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map(ColumnArray::len).unwrap_or(0);
        let num_segments = columns.first().map(ColumnArray::num_segments).unwrap_or(0);
        for c in &columns {
            if c.len() != num_rows {
                return Err(Error::Schema(format!(
                    "column '{}' has {} rows, expected {num_rows}",
                    c.name(),
                    c.len()
                )));
            }
            if c.num_segments() != num_segments {
                return Err(Error::Schema(format!(
                    "column '{}' has {} segments, expected {num_segments}",
                    c.name(),
                    c.num_segments()
                )));
            }
        }
        let columns = columns
            .into_iter()
            .zip(names)
            .map(|(c, n)| if c.name() == n { c } else { c.renamed(n) })
            .collect();
        Ok(Self {
            store: Arc::clone(store),
            columns,
            num_rows,
            index_path: None,
        })
    }

    /// Zero-row table with the given schema.
    pub fn empty(store: &Arc<BlockStore>, names: Vec<String>, types: Vec<DataType>) -> Result<Self> {
        if names.len() != types.len() {
            return Err(Error::Schema(format!(
                "{} names for {} types",
                names.len(),
                types.len()
            )));
        }
        let columns = names
            .iter()
            .zip(types)
            .map(|(n, t)| ColumnArray::empty(Arc::clone(store), n.clone(), t))
            .collect();
        Table::from_columns(store, names, columns)
    }

    pub fn open(store: &Arc<BlockStore>, index_path: impl AsRef<Path>) -> Result<Self> {
        let index_path = index_path.as_ref();
        let index = read_index(index_path)?;
        let names = index.columns.iter().map(|c| c.name.clone()).collect();
        let columns = index
            .columns
            .into_iter()
            .map(|c| ColumnArray::new(Arc::clone(store), c))
            .collect::<Result<Vec<_>>>()?;
        let mut table = Table::from_columns(store, names, columns)?;
        table.num_rows = index.num_rows;
        table.index_path = Some(index_path.to_path_buf());
        tracing::debug!(path = %index_path.display(), rows = table.num_rows, "table opened");
        Ok(table)
    }

    /// Mark the table's index and segment files for removal once neither this
    /// table nor anything built from its columns is alive.
    pub fn into_temporary(self) -> Table {
        let mut paths: Vec<PathBuf> = self.index_path.iter().cloned().collect();
        for c in &self.columns {
            for seg in &c.get_index_info().segments {
                if !paths.contains(&seg.file) {
                    paths.push(seg.file.clone());
                }
            }
        }
        let files = Arc::new(TempFiles::new(paths));
        let columns = self.columns.into_iter().map(|c| c.with_temp(&files)).collect();
        Table { columns, ..self }
    }

    pub fn is_temporary(&self) -> bool {
        self.columns.iter().any(ColumnArray::is_temporary)
    }

    /// Write an index describing this table at `index_path`. Segment files are
    /// referenced, not copied, so a temporary table stops being temporary.
    pub fn save(&mut self, index_path: impl AsRef<Path>) -> Result<()> {
        let index_path = index_path.as_ref();
        let index = TableIndex::new(
            self.num_rows,
            self.columns
                .iter()
                .map(|c| c.get_index_info().clone())
                .collect(),
        );
        write_index(index_path, &index)?;
        for c in &self.columns {
            c.keep_files();
        }
        self.index_path = Some(index_path.to_path_buf());
        Ok(())
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_segments(&self) -> usize {
        self.columns.first().map(ColumnArray::num_segments).unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(ColumnArray::data_type).collect()
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name(), c.data_type()))
                .collect(),
        )
    }

    pub fn columns(&self) -> &[ColumnArray] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> Option<&ColumnArray> {
        self.columns.get(i)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnArray> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Table holding the columns at `indices`, in that order.
    pub fn select_columns(&self, indices: &[usize]) -> Result<Table> {
        let mut names = Vec::with_capacity(indices.len());
        let mut columns = Vec::with_capacity(indices.len());
        for &i in indices {
            let c = self.columns.get(i).ok_or_else(|| {
                Error::Invalid(format!(
                    "column {i} out of range ({} columns)",
                    self.columns.len()
                ))
            })?;
            names.push(c.name().to_string());
            columns.push(c.clone());
        }
        Table::from_columns(&self.store, names, columns)
    }

    pub fn add_column(&self, column: ColumnArray, name: impl Into<String>) -> Result<Table> {
        let mut names = self.column_names();
        let mut columns = self.columns.clone();
        names.push(name.into());
        columns.push(column);
        Table::from_columns(&self.store, names, columns)
    }

    /// Row-wise concatenation. Column names and count must match; no data is
    /// copied.
    pub fn append(&self, other: &Table) -> Result<Table> {
        if self.column_names() != other.column_names() {
            return Err(Error::Schema(format!(
                "cannot append table with columns {:?} to {:?}",
                other.column_names(),
                self.column_names()
            )));
        }
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| a.append(b))
            .collect::<Result<Vec<_>>>()?;
        Table::from_columns(&self.store, self.column_names(), columns)
    }

    pub fn reader(&self) -> Result<TableReader> {
        let columns = self
            .columns
            .iter()
            .map(ColumnArray::reader)
            .collect::<Result<Vec<_>>>()?;
        Ok(TableReader {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// First `n` rows.
    pub fn head(&self, n: u64) -> Result<RowBatch> {
        self.reader()?.read_rows(0, n)
    }

    pub fn to_batch(&self) -> Result<RowBatch> {
        self.reader()?.read_rows(0, self.num_rows)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.column_names())
            .field("num_rows", &self.num_rows)
            .field("index_path", &self.index_path)
            .finish()
    }
}

/// Row-range reader over every column of a table.
pub struct TableReader {
    columns: Vec<ColumnReader>,
    num_rows: u64,
}

impl TableReader {
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Rows `[begin, end)` clamped to the table length.
    pub fn read_rows(&mut self, begin: u64, end: u64) -> Result<RowBatch> {
        let rows = end.min(self.num_rows).saturating_sub(begin) as usize;
        let mut batch = RowBatch::with_capacity(self.columns.len(), rows);
        self.read_into(begin, end, &mut batch)?;
        Ok(batch)
    }

    /// Append rows `[begin, end)` to `out`, which must be as wide as the table.
    pub fn read_into(&mut self, begin: u64, end: u64, out: &mut RowBatch) -> Result<usize> {
        if out.num_columns() != self.columns.len() {
            return Err(Error::Schema(format!(
                "output batch has {} columns, table has {}",
                out.num_columns(),
                self.columns.len()
            )));
        }
        let mut rows = 0;
        for (reader, col) in self.columns.iter_mut().zip(out.columns.iter_mut()) {
            rows = reader.read_rows(begin, end, col)?;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_writer::TableWriter;
    use strata_core::config::EngineConfig;
    use strata_core::types::Scalar;

    fn sample(store: &Arc<BlockStore>, path: PathBuf) -> Table {
        let mut w = TableWriter::open_for_write(
            store,
            path,
            vec!["id".into(), "name".into()],
            vec![DataType::Int64, DataType::Utf8],
            2,
        )
        .unwrap();
        for (s, mut out) in w.outputs().unwrap().into_iter().enumerate() {
            for i in 0..3 {
                let id = (s * 3 + i) as i64;
                out.write_row(&[Scalar::I64(id), Scalar::Str(format!("n{id}"))])
                    .unwrap();
            }
            out.finish().unwrap();
        }
        w.close().unwrap()
    }

    #[test]
    fn write_open_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(&EngineConfig::default()).unwrap());
        let path = dir.path().join("t.sidx");
        let t = sample(&store, path.clone());
        assert_eq!(t.num_rows(), 6);
        assert_eq!(t.num_segments(), 2);

        let reopened = Table::open(&store, &path).unwrap();
        assert_eq!(reopened.column_names(), vec!["id", "name"]);
        assert_eq!(reopened.column_types(), vec![DataType::Int64, DataType::Utf8]);
        let head = reopened.head(2).unwrap();
        assert_eq!(head.row(1), vec![Scalar::I64(1), Scalar::Str("n1".into())]);
        assert_eq!(reopened.to_batch().unwrap(), t.to_batch().unwrap());
    }

    #[test]
    fn select_add_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(&EngineConfig::default()).unwrap());
        let t = sample(&store, dir.path().join("t.sidx"));

        let names = t.select_columns(&[1]).unwrap();
        assert_eq!(names.column_names(), vec!["name"]);
        assert!(t.select_columns(&[2]).is_err());

        let id = t.column_by_name("id").unwrap().clone();
        let wide = t.add_column(id, "id2").unwrap();
        assert_eq!(wide.num_columns(), 3);

        let twice = t.append(&t).unwrap();
        assert_eq!(twice.num_rows(), 12);
        assert_eq!(twice.num_segments(), 4);
        assert!(t.append(&names).is_err());
    }

    #[test]
    fn saved_copy_of_appended_table_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(&EngineConfig::default()).unwrap());
        let t = sample(&store, dir.path().join("t.sidx"));
        let mut both = t.append(&t).unwrap();
        let path = dir.path().join("both.sidx");
        both.save(&path).unwrap();
        assert_eq!(Table::open(&store, &path).unwrap().num_rows(), 12);
    }

    #[test]
    fn empty_table_has_schema_but_no_rows() {
        let store = Arc::new(BlockStore::new(&EngineConfig::default()).unwrap());
        let t = Table::empty(&store, vec!["a".into()], vec![DataType::Boolean]).unwrap();
        assert_eq!(t.num_rows(), 0);
        assert_eq!(t.schema().names(), vec!["a"]);
        assert!(t.to_batch().unwrap().is_empty());
    }
}
