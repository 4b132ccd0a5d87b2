//! Streaming CSV reader producing typed `RowBatch`es.
//!
//! Column types are inferred once from the first batch (int64, then float64,
//! then bool, else utf8; empty fields are null) and then fixed for the rest of
//! the file.

use std::fs::File;
use std::path::Path;

use strata_core::schema::{DataType, Field, Schema};
use strata_core::types::{RowBatch, Scalar};

use crate::error::{Error, Result};

pub struct CsvReader {
    inner: csv::Reader<File>,
    headers: Vec<String>,
    types: Option<Vec<DataType>>,
    record: csv::StringRecord,
    line: u64,
    file_len: u64,
}

impl CsvReader {
    /// Open `path`. Without a header row, columns are named `X1`, `X2`, ...
    pub fn from_path(path: &Path, has_headers: bool) -> Result<Self> {
        let file_len = std::fs::metadata(path)
            .map_err(|e| Error::io(path, e))?
            .len();
        let mut inner = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(false)
            .from_path(path)?;
        // Without headers this peeks at the first record without consuming it.
        let first = inner.headers()?.clone();
        let headers = if has_headers {
            first.iter().map(|h| h.trim().to_string()).collect()
        } else {
            (1..=first.len()).map(|i| format!("X{i}")).collect()
        };
        Ok(Self {
            inner,
            headers,
            types: None,
            record: csv::StringRecord::new(),
            line: 0,
            file_len,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Schema once known (after the first batch has been read).
    pub fn schema(&self) -> Option<Schema> {
        self.types.as_ref().map(|types| {
            Schema::new(
                self.headers
                    .iter()
                    .zip(types)
                    .map(|(n, t)| Field::new(n.clone(), *t))
                    .collect(),
            )
        })
    }

    /// Fraction of the file consumed so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.file_len == 0 {
            return 1.0;
        }
        (self.inner.position().byte() as f64 / self.file_len as f64).min(1.0)
    }

    /// Read up to `max_rows` rows. `None` at end of file.
    pub fn next_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>> {
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); self.headers.len()];
        let mut rows = 0;
        while rows < max_rows && self.inner.read_record(&mut self.record)? {
            self.line += 1;
            if self.record.len() != self.headers.len() {
                return Err(Error::Csv(format!(
                    "record {} has {} fields, expected {}",
                    self.line,
                    self.record.len(),
                    self.headers.len()
                )));
            }
            for (col, field) in raw.iter_mut().zip(self.record.iter()) {
                col.push(field.to_string());
            }
            rows += 1;
        }
        if rows == 0 {
            return Ok(None);
        }

        let types = match &self.types {
            Some(t) => t.clone(),
            None => {
                let t: Vec<DataType> = raw.iter().map(|c| infer_type(c)).collect();
                self.types = Some(t.clone());
                t
            }
        };

        let first_line = self.line - rows as u64 + 1;
        let mut columns = Vec::with_capacity(raw.len());
        for (c, (values, ty)) in raw.into_iter().zip(&types).enumerate() {
            let mut out = Vec::with_capacity(values.len());
            for (r, v) in values.into_iter().enumerate() {
                out.push(parse_field(&v, *ty).ok_or_else(|| {
                    Error::Csv(format!(
                        "record {} column '{}': cannot parse '{v}' as {ty}",
                        first_line + r as u64,
                        self.headers[c]
                    ))
                })?);
            }
            columns.push(out);
        }
        Ok(Some(RowBatch { columns }))
    }
}

fn infer_type(values: &[String]) -> DataType {
    let present: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if present.is_empty() {
        DataType::Undefined
    } else if present.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if present.iter().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if present.iter().all(|v| parse_bool(v).is_some()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_field(v: &str, ty: DataType) -> Option<Scalar> {
    let t = v.trim();
    if t.is_empty() && ty != DataType::Utf8 {
        return Some(Scalar::Null);
    }
    match ty {
        DataType::Int64 => t.parse().ok().map(Scalar::I64),
        DataType::Float64 => t.parse().ok().map(Scalar::F64),
        DataType::Boolean => parse_bool(t).map(Scalar::Bool),
        DataType::Utf8 => Some(Scalar::Str(v.to_string())),
        DataType::Binary => Some(Scalar::Bin(v.as_bytes().to_vec())),
        DataType::Undefined => Some(Scalar::Str(v.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn infers_types_from_first_batch() {
        let (_dir, path) = write("id,score,name,flag\n1,0.5,ann,true\n2,,bob,false\n3,1.5,,true\n");
        let mut r = CsvReader::from_path(&path, true).unwrap();
        let batch = r.next_batch(10).unwrap().unwrap();
        assert_eq!(batch.num_rows(), 3);
        let schema = r.schema().unwrap();
        assert_eq!(
            schema.types(),
            vec![DataType::Int64, DataType::Float64, DataType::Utf8, DataType::Boolean]
        );
        assert_eq!(batch.columns[1][1], Scalar::Null);
        assert_eq!(batch.columns[2][2], Scalar::Str(String::new()));
        assert!(r.next_batch(10).unwrap().is_none());
        assert!(r.progress() > 0.9);
    }

    #[test]
    fn batches_respect_max_rows() {
        let (_dir, path) = write("a\n1\n2\n3\n4\n5\n");
        let mut r = CsvReader::from_path(&path, true).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| r.next_batch(2).unwrap())
            .map(|b| b.num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn later_values_must_match_inferred_type() {
        let (_dir, path) = write("a\n1\n2\nthree\n");
        let mut r = CsvReader::from_path(&path, true).unwrap();
        r.next_batch(2).unwrap();
        let err = r.next_batch(2).unwrap_err();
        assert!(err.to_string().contains("three"));
    }

    #[test]
    fn headerless_files_get_generated_names() {
        let (_dir, path) = write("1,x\n2,y\n");
        let r = CsvReader::from_path(&path, false).unwrap();
        assert_eq!(r.headers(), &["X1".to_string(), "X2".to_string()]);
    }
}
