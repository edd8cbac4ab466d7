//! Parquet encoding via Arrow record batches.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use super::Table;
use crate::error::PipelineError;

/// Column type inferred from the non-null cells of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Utf8,
}

impl ColumnKind {
    fn infer<'a>(cells: impl Iterator<Item = &'a Value>) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for cell in cells {
            let cell_kind = match cell {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Number(n) if n.is_i64() => ColumnKind::Int,
                Value::Number(_) => ColumnKind::Float,
                _ => ColumnKind::Utf8,
            };
            kind = Some(match (kind, cell_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Utf8,
            });
        }
        kind.unwrap_or(ColumnKind::Utf8)
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Bool => DataType::Boolean,
            ColumnKind::Utf8 => DataType::Utf8,
        }
    }
}

pub(super) fn encode_parquet(table: &Table) -> Result<Vec<u8>, PipelineError> {
    let mut fields = Vec::with_capacity(table.column_count());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.column_count());

    for (idx, name) in table.columns().iter().enumerate() {
        let cells = || table.rows().iter().map(move |row| &row[idx]);
        let kind = ColumnKind::infer(cells());

        let array: ArrayRef = match kind {
            ColumnKind::Int => Arc::new(Int64Array::from(
                cells().map(Value::as_i64).collect::<Vec<_>>(),
            )),
            ColumnKind::Float => Arc::new(Float64Array::from(
                cells().map(Value::as_f64).collect::<Vec<_>>(),
            )),
            ColumnKind::Bool => Arc::new(BooleanArray::from(
                cells().map(Value::as_bool).collect::<Vec<_>>(),
            )),
            ColumnKind::Utf8 => Arc::new(StringArray::from(
                cells().map(cell_string).collect::<Vec<_>>(),
            )),
        };

        fields.push(Field::new(name, kind.data_type(), true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| PipelineError::serialization(format!("building record batch: {e}")))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))
        .map_err(|e| PipelineError::serialization(format!("creating parquet writer: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| PipelineError::serialization(format!("writing parquet batch: {e}")))?;

    writer
        .into_inner()
        .map_err(|e| PipelineError::serialization(format!("finishing parquet file: {e}")))
}

fn cell_string(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
