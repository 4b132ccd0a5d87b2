//! CSV import into a new table.

use std::path::Path;
use std::sync::Arc;

use strata_core::schema::{dedup_names, DataType};
use strata_core::types::RowBatch;
use strata_io::CsvReader;

use crate::block_store::BlockStore;
use crate::error::Result;
use crate::table::Table;
use crate::table_writer::{SegmentOutput, TableWriter};

const IMPORT_BATCH_ROWS: usize = 1024;

/// Load `csv_path` into a table indexed at `index_path`.
///
/// Rows are spread over `num_segments` segments by file position, so each
/// segment holds a contiguous run of the file and row order is kept.
pub fn import_csv(
    store: &Arc<BlockStore>,
    csv_path: &Path,
    index_path: &Path,
    num_segments: usize,
    has_headers: bool,
) -> Result<Table> {
    let mut reader = CsvReader::from_path(csv_path, has_headers)?;
    let first = reader.next_batch(IMPORT_BATCH_ROWS)?;
    let names = dedup_names(reader.headers());
    let types = match reader.schema() {
        Some(schema) => schema.types(),
        None => vec![DataType::Undefined; names.len()],
    };

    let mut writer = TableWriter::open_for_write(store, index_path, names, types, num_segments)?;
    let outputs = writer.outputs()?;
    let n = outputs.len();
    if let Err(e) = fill(&mut reader, first, outputs) {
        writer.abort();
        return Err(e);
    }
    let table = writer.close()?;
    tracing::info!(
        csv = %csv_path.display(),
        index = %index_path.display(),
        rows = table.num_rows(),
        segments = n,
        "csv imported"
    );
    Ok(table)
}

fn fill(
    reader: &mut CsvReader,
    first: Option<RowBatch>,
    mut outputs: Vec<SegmentOutput>,
) -> Result<()> {
    let n = outputs.len();
    let route = |progress: f64| ((progress * n as f64) as usize).min(n - 1);
    let mut current = 0;
    let mut at = 0.0;
    let mut next = first;
    while let Some(batch) = next {
        current = current.max(route(at));
        outputs[current].write_batch(&batch)?;
        at = reader.progress();
        next = reader.next_batch(IMPORT_BATCH_ROWS)?;
    }
    for out in outputs {
        out.finish()?;
    }
    Ok(())
}
