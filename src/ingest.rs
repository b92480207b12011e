use crate::error::{PipelineError, Result};
use crate::transform::REQUIRED_COLUMNS;
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{fs::File, path::Path, sync::Arc};

/// Reads raw transaction data, choosing the reader by file extension.
///
/// `.parquet` files are read as-is; anything else is treated as CSV.
///
/// # Errors
/// Returns error if the file cannot be opened or is not valid CSV/Parquet.
pub fn read_raw(path: &Path) -> Result<Vec<RecordBatch>> {
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
    if is_parquet {
        read_parquet(path)
    } else {
        read_csv(path).map(|batch| vec![batch])
    }
}

/// Reads a CSV file with a header row into a single batch of nullable text
/// columns.
///
/// Every column is kept as `Utf8`; typing happens in the transform. Blank
/// cells and short rows become nulls.
///
/// # Errors
/// Returns error if the file cannot be read or is not valid CSV, and
/// `PipelineError::MissingColumn` if it has no header row at all.
pub fn read_csv(path: &Path) -> Result<RecordBatch> {
    debug!("Reading CSV file: {}", path.display());
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(PipelineError::MissingColumn(REQUIRED_COLUMNS[0].to_string()));
    }
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for (idx, column) in columns.iter_mut().enumerate() {
            let cell = record
                .get(idx)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string);
            column.push(cell);
        }
    }

    let rows = columns.first().map_or(0, Vec::len);
    debug!("Read {} rows across {} columns", rows, headers.len());
    text_batch(&headers, columns)
}

/// Reads every record batch from a Parquet file.
///
/// # Errors
/// Returns error if the file cannot be opened or the Parquet data is malformed.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    debug!("Reading Parquet file: {}", path.display());
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(PipelineError::Arrow)?;
    Ok(batches)
}

/// Builds a batch of nullable `Utf8` columns from column-major cells.
pub fn text_batch(headers: &[String], columns: Vec<Vec<Option<String>>>) -> Result<RecordBatch> {
    if headers.len() != columns.len() {
        return Err(PipelineError::Data(format!(
            "{} headers but {} columns",
            headers.len(),
            columns.len()
        )));
    }
    let schema = Arc::new(Schema::new(
        headers
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|column| {
            let array: StringArray = column.iter().map(|cell| cell.as_deref()).collect();
            Arc::new(array) as ArrayRef
        })
        .collect();
    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use std::io::Write;

    #[test]
    fn read_csv_keeps_blank_cells_as_nulls() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "TransactionID,Date,Product,Quantity,Price,Status").unwrap();
        writeln!(file, "1001,2023-10-01,Widget A,5,100.0,Complete").unwrap();
        writeln!(file, "1002,2023-10-01,Widget B,,200.0,completed").unwrap();
        file.flush().unwrap();

        let batches = read_raw(file.path()).unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 6);

        let quantity = batch
            .column_by_name("Quantity")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(quantity.value(0), "5");
        assert!(quantity.is_null(1));
    }

    #[test]
    fn read_csv_without_header_is_a_missing_column() {
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

        let err = read_raw(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(ref c) if c == "TransactionID"));
    }

    #[test]
    fn text_batch_rejects_mismatched_shapes() {
        let headers = vec!["TransactionID".to_string()];
        let err = text_batch(&headers, vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}
