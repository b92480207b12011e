use crate::error::{PipelineError, Result};
use crate::query::TableSource;
use crate::structs::{Status, Transaction};
use arrow_array::{Array, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{Datelike, NaiveDate};
use csv::Writer;
use log::{debug, info};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, fs::File, sync::Arc};

/// Days between 0001-01-01 (day 1 of the common era) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const CSV_HEADER: [&str; 7] = [
    "TransactionID",
    "Date",
    "Product",
    "Quantity",
    "Price",
    "TotalAmount",
    "Status",
];

/// The validated transaction table persisted as a single Parquet file.
///
/// [`ParquetStore::replace`] swaps the whole table in one rename, so readers
/// see either the previous table or the new one. Concurrent writers are not
/// coordinated and must be serialized by the caller.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    path: PathBuf,
}

impl ParquetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the stored table with `rows`, preserving their order.
    ///
    /// # Errors
    /// Returns error if the file cannot be written or renamed into place.
    pub fn replace(&self, rows: &[Transaction]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("parquet.tmp");
        debug!("Writing {} rows to {}", rows.len(), staging.display());

        let batch = to_batch(rows)?;
        let file = File::create(&staging)?;
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        fs::rename(&staging, &self.path)?;
        info!("Stored {} transactions at {}", rows.len(), self.path.display());
        Ok(())
    }

    /// Reads the stored table back in stored order.
    ///
    /// # Errors
    /// Returns error if the file is missing, unreadable, or does not hold a
    /// transaction table.
    pub fn read(&self) -> Result<Vec<Transaction>> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(PipelineError::Arrow)?;
            rows.extend(from_batch(&batch)?);
        }
        debug!("Read {} transactions from {}", rows.len(), self.path.display());
        Ok(rows)
    }
}

impl TableSource for ParquetStore {
    fn load(&self) -> Result<Vec<Transaction>> {
        self.read()
    }
}

fn transactions_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("TransactionID", DataType::Int64, false),
        Field::new("Date", DataType::Date32, false),
        Field::new("Product", DataType::Utf8, true),
        Field::new("Quantity", DataType::Int64, false),
        Field::new("Price", DataType::Float64, false),
        Field::new("TotalAmount", DataType::Float64, false),
        Field::new("Status", DataType::Utf8, true),
    ]))
}

fn to_batch(rows: &[Transaction]) -> Result<RecordBatch> {
    let ids: Int64Array = rows.iter().map(|r| r.transaction_id).collect::<Vec<_>>().into();
    let dates: Date32Array = rows
        .iter()
        .map(|r| r.date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .collect::<Vec<_>>()
        .into();
    let products: StringArray = rows.iter().map(|r| r.product.as_deref()).collect();
    let quantities: Int64Array = rows.iter().map(|r| r.quantity).collect::<Vec<_>>().into();
    let prices: Float64Array = rows.iter().map(|r| r.price).collect::<Vec<_>>().into();
    let totals: Float64Array = rows.iter().map(|r| r.total_amount).collect::<Vec<_>>().into();
    let statuses: StringArray = rows
        .iter()
        .map(|r| r.status.as_ref().map(Status::as_str))
        .collect();

    let batch = RecordBatch::try_new(
        transactions_schema(),
        vec![
            Arc::new(ids),
            Arc::new(dates),
            Arc::new(products),
            Arc::new(quantities),
            Arc::new(prices),
            Arc::new(totals),
            Arc::new(statuses),
        ],
    )?;
    Ok(batch)
}

fn from_batch(batch: &RecordBatch) -> Result<Vec<Transaction>> {
    let ids = typed_column::<Int64Array>(batch, "TransactionID")?;
    let dates = typed_column::<Date32Array>(batch, "Date")?;
    let products = typed_column::<StringArray>(batch, "Product")?;
    let quantities = typed_column::<Int64Array>(batch, "Quantity")?;
    let prices = typed_column::<Float64Array>(batch, "Price")?;
    let totals = typed_column::<Float64Array>(batch, "TotalAmount")?;
    let statuses = typed_column::<StringArray>(batch, "Status")?;

    let required: [(&str, &dyn Array); 5] = [
        ("TransactionID", ids),
        ("Date", dates),
        ("Quantity", quantities),
        ("Price", prices),
        ("TotalAmount", totals),
    ];
    for (name, array) in required {
        if array.null_count() > 0 {
            return Err(PipelineError::Data(format!(
                "Stored column {} contains nulls",
                name
            )));
        }
    }

    (0..batch.num_rows())
        .map(|i| {
            let days = dates.value(i);
            let date = NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .ok_or_else(|| PipelineError::Data(format!("Stored date out of range: {}", days)))?;
            Ok(Transaction {
                transaction_id: ids.value(i),
                date,
                product: products.is_valid(i).then(|| products.value(i).to_string()),
                quantity: quantities.value(i),
                price: prices.value(i),
                total_amount: totals.value(i),
                status: statuses
                    .is_valid(i)
                    .then(|| Status::canonicalize(statuses.value(i))),
            })
        })
        .collect()
}

/// Extracts a typed column from an Arrow RecordBatch by name.
///
/// # Errors
/// Returns `PipelineError::Data` if the column is missing or has another type.
fn typed_column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::Data(format!("Column not found: {}", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::Data(format!("Column {} has an unexpected type", name)))
}

/// Writes transactions as CSV with a header row.
///
/// # Errors
/// Returns error if writing to `output` fails.
pub fn write_csv<W: Write>(results: &[Transaction], output: W) -> Result<()> {
    let mut writer = Writer::from_writer(output);
    writer.write_record(CSV_HEADER)?;

    for row in results {
        writer.write_record(&[
            row.transaction_id.to_string(),
            row.date.format("%Y-%m-%d").to_string(),
            row.product.clone().unwrap_or_default(),
            row.quantity.to_string(),
            format!("{:.2}", row.price),
            format!("{:.2}", row.total_amount),
            row.status.as_ref().map(|s| s.to_string()).unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes transactions as a pretty-formatted JSON array of records.
///
/// # Errors
/// Returns error if serialization or writing fails.
pub fn write_json<W: Write>(results: &[Transaction], mut output: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut output, results)?;
    writeln!(output)?;
    Ok(())
}
