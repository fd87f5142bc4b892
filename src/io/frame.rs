//! Tabular frame reader over Arrow record batches
//!
//! Rows become raw objects keyed by column name. Supported column types are strings, integers,
//! floats, booleans and lists of strings or floats; null cells are skipped.

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, GenericListArray, Int32Array,
    Int64Array, LargeStringArray, RecordBatch, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::types::RawObject;
use crate::{Error, Result};

use super::Reader;

#[derive(Clone)]
pub struct FrameReader {
    source_name: String,
    batches: Arc<Vec<RecordBatch>>,
    batch: usize,
    row: usize,
}

impl FrameReader {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self {
            source_name: "frame".to_string(),
            batches: Arc::new(batches),
            batch: 0,
            row: 0,
        }
    }

    /// Load every record batch of a Parquet file.
    pub fn from_parquet(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::debug!(path = %path.display(), batches = batches.len(), "Loaded frame");
        Ok(Self {
            source_name: path.display().to_string(),
            ..Self::new(batches)
        })
    }

    fn row_to_object(&self, batch: &RecordBatch, row: usize) -> Result<RawObject> {
        let schema = batch.schema();
        let mut object = RawObject::new();
        for (idx, field) in schema.fields().iter().enumerate() {
            let column = batch.column(idx);
            if column.is_null(row) {
                continue;
            }
            let value = cell_value(column, row).map_err(|message| {
                Error::ingestion(format!(
                    "{} column {}: {}",
                    self.source_name,
                    field.name(),
                    message
                ))
            })?;
            object.insert(field.name().clone(), value);
        }
        Ok(object)
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, expected: &str) -> std::result::Result<&'a T, String> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("{} column type mismatch", expected))
}

fn cell_value(array: &ArrayRef, row: usize) -> std::result::Result<JsonValue, String> {
    Ok(match array.data_type() {
        DataType::Utf8 => JsonValue::from(downcast::<StringArray>(array, "Utf8")?.value(row)),
        DataType::LargeUtf8 => {
            JsonValue::from(downcast::<LargeStringArray>(array, "LargeUtf8")?.value(row))
        }
        DataType::Int64 => JsonValue::from(downcast::<Int64Array>(array, "Int64")?.value(row)),
        DataType::Int32 => JsonValue::from(downcast::<Int32Array>(array, "Int32")?.value(row)),
        DataType::Float64 => {
            JsonValue::from(downcast::<Float64Array>(array, "Float64")?.value(row))
        }
        DataType::Float32 => {
            JsonValue::from(downcast::<Float32Array>(array, "Float32")?.value(row) as f64)
        }
        DataType::Boolean => {
            JsonValue::from(downcast::<BooleanArray>(array, "Boolean")?.value(row))
        }
        DataType::List(_) => {
            let list = downcast::<GenericListArray<i32>>(array, "List")?.value(row);
            let items = (0..list.len())
                .filter(|&i| !list.is_null(i))
                .map(|i| cell_value(&list, i))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            JsonValue::Array(items)
        }
        other => return Err(format!("unsupported type {}", other)),
    })
}

impl Iterator for FrameReader {
    type Item = Result<RawObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let batch = self.batches.get(self.batch)?;
            if self.row >= batch.num_rows() {
                self.batch += 1;
                self.row = 0;
                continue;
            }
            let row = self.row;
            self.row += 1;
            return Some(self.row_to_object(batch, row));
        }
    }
}

impl Reader for FrameReader {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn fork(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(self.clone()))
    }
}
