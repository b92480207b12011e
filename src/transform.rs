use crate::error::{PipelineError, Result};
use crate::structs::{ImputeStrategy, Status, Transaction, TransformConfig, TransformReport};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, LargeStringArray, RecordBatch, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt8Array, UInt16Array, UInt32Array, UInt64Array,
};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{DataType, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

/// Columns the raw table must provide.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "TransactionID",
    "Date",
    "Product",
    "Quantity",
    "Price",
    "Status",
];

/// Date layouts accepted in raw data, tried in order.
const RAW_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const RAW_DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// 2^63; every f64 in `-I64_BOUND..I64_BOUND` converts to i64 without saturating.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// A loosely typed raw cell as it arrived from ingestion.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

/// Numeric reading of a raw cell. `Invalid` means a value was present but
/// could not be read as a number.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Missing,
    Value(f64),
    Invalid,
}

impl Numeric {
    fn from_cell(cell: &Cell) -> Numeric {
        match cell {
            Cell::Null => Numeric::Missing,
            Cell::Int(v) => Numeric::Value(*v as f64),
            Cell::Float(v) if v.is_nan() => Numeric::Missing,
            Cell::Float(v) => Numeric::Value(*v),
            Cell::Date(_) => Numeric::Invalid,
            Cell::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Numeric::Missing;
                }
                match text.parse::<f64>() {
                    Ok(v) if v.is_nan() => Numeric::Missing,
                    Ok(v) => Numeric::Value(v),
                    Err(_) => Numeric::Invalid,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct WorkingRow {
    id: Cell,
    date: Cell,
    product: Option<String>,
    quantity: Numeric,
    price: Numeric,
    status: Cell,
    total: Option<f64>,
}

/// Cleans a raw transaction table into validated rows.
///
/// See [`transform_with_report`] for the rules applied.
///
/// # Errors
/// Returns `PipelineError::MissingColumn` if a required column is absent.
pub fn transform(batches: &[RecordBatch], config: &TransformConfig) -> Result<Vec<Transaction>> {
    transform_with_report(batches, config).map(|(rows, _)| rows)
}

/// Cleans a raw transaction table and reports how many rows each rule removed.
///
/// Steps, each applied to the output of the previous one:
///
/// 1. Missing `Quantity`/`Price` are filled per `Product` group using the
///    configured aggregate (median and mean by default).
/// 2. `TotalAmount` is computed where both values are present.
/// 3. Rows with an unparseable `Date` are dropped.
/// 4. Rows are deduplicated on `TransactionID`, keeping the first occurrence.
/// 5. `Quantity` is coerced to an integer and `Price` to a real; rows whose
///    `Price` cannot be read are dropped.
/// 6. Rows with an unreadable or negative `Quantity`, or a negative `Price`,
///    are dropped.
/// 7. `Status` is lowercased, trimmed and mapped through the synonym table.
///
/// Malformed rows never produce an error; they are excluded and counted.
///
/// # Errors
/// Returns `PipelineError::MissingColumn` if a required column is absent.
pub fn transform_with_report(
    batches: &[RecordBatch],
    config: &TransformConfig,
) -> Result<(Vec<Transaction>, TransformReport)> {
    let mut rows = extract_rows(batches)?;
    let mut report = TransformReport {
        input_rows: rows.len(),
        ..Default::default()
    };
    debug!("Extracted {} raw rows", rows.len());

    // 1. Grouped imputation
    report.imputed_quantity = impute_by_group(
        &mut rows,
        |row| &mut row.quantity,
        config.quantity_strategy,
    );
    report.imputed_price = impute_by_group(&mut rows, |row| &mut row.price, config.price_strategy);
    debug!(
        "Imputed {} quantities and {} prices",
        report.imputed_quantity, report.imputed_price
    );

    // 2. Derived total
    for row in rows.iter_mut() {
        if let (Numeric::Value(quantity), Numeric::Value(price)) = (row.quantity, row.price) {
            row.total = Some(quantity * price);
        }
    }

    // 3. Date normalization
    let mut dated = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_raw_date(&row.date) {
            Some(date) => dated.push((date, row)),
            None => report.dropped_invalid_date += 1,
        }
    }
    debug!("Dropped {} rows with invalid dates", report.dropped_invalid_date);

    // 4. Deduplication, first occurrence wins
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(dated.len());
    for (date, row) in dated {
        let Some(id) = parse_id(&row.id) else {
            report.dropped_missing_id += 1;
            continue;
        };
        if seen.insert(id) {
            unique.push((id, date, row));
        } else {
            report.dropped_duplicate += 1;
        }
    }
    debug!(
        "Dropped {} duplicate rows and {} rows without a usable id",
        report.dropped_duplicate, report.dropped_missing_id
    );

    let mut results = Vec::with_capacity(unique.len());
    for (transaction_id, date, row) in unique {
        // 5. Type coercion
        let quantity = coerce_quantity(row.quantity);
        let price = match row.price {
            Numeric::Value(price) if price.is_finite() => price,
            _ => {
                report.dropped_invalid_price += 1;
                continue;
            }
        };

        // 6. Domain filtering
        let Some(quantity) = quantity else {
            report.dropped_invalid_quantity += 1;
            continue;
        };
        if quantity < 0 || price < 0.0 {
            report.dropped_negative += 1;
            continue;
        }

        // 7. Status normalization
        let status = status_text(&row.status).map(|text| Status::canonicalize(&text));
        if config.drop_unrecognized_status {
            if let Some(Status::Other(value)) = &status {
                warn!(
                    "Dropping transaction {} with unrecognized status '{}'",
                    transaction_id, value
                );
                report.dropped_unrecognized_status += 1;
                continue;
            }
        }

        results.push(Transaction {
            transaction_id,
            date,
            product: row.product,
            quantity,
            price,
            total_amount: row.total.unwrap_or(quantity as f64 * price),
            status,
        });
    }

    report.output_rows = results.len();
    info!(
        "Transformed {} raw rows into {} validated rows ({} dropped)",
        report.input_rows,
        report.output_rows,
        report.dropped()
    );
    Ok((results, report))
}

/// Pulls the required columns out of every batch, in order, as working rows.
fn extract_rows(batches: &[RecordBatch]) -> Result<Vec<WorkingRow>> {
    let mut rows = Vec::new();
    for batch in batches {
        let ids = column_cells(batch, "TransactionID")?;
        let dates = column_cells(batch, "Date")?;
        let products = column_cells(batch, "Product")?;
        let quantities = column_cells(batch, "Quantity")?;
        let prices = column_cells(batch, "Price")?;
        let statuses = column_cells(batch, "Status")?;

        for i in 0..batch.num_rows() {
            rows.push(WorkingRow {
                id: ids[i].clone(),
                date: dates[i].clone(),
                product: cell_text(&products[i]),
                quantity: Numeric::from_cell(&quantities[i]),
                price: Numeric::from_cell(&prices[i]),
                status: statuses[i].clone(),
                total: None,
            });
        }
    }
    Ok(rows)
}

/// Extracts a named column from an Arrow RecordBatch as raw cells.
///
/// Raw data may be loosely typed: text, integer, floating point, boolean,
/// date and timestamp columns map to their natural cell, and anything else is
/// read through its display form.
///
/// # Errors
///
/// Returns `PipelineError::MissingColumn` if the column doesn't exist.
fn column_cells(batch: &RecordBatch, name: &str) -> Result<Vec<Cell>> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;

    let cells = match column.data_type() {
        DataType::Utf8 => {
            let array = downcast::<StringArray>(column, name)?;
            collect_cells(array, |i| Cell::Text(array.value(i).to_string()))
        }
        DataType::LargeUtf8 => {
            let array = downcast::<LargeStringArray>(column, name)?;
            collect_cells(array, |i| Cell::Text(array.value(i).to_string()))
        }
        DataType::Int64 => {
            let array = downcast::<Int64Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(array.value(i)))
        }
        DataType::Int32 => {
            let array = downcast::<Int32Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::Int16 => {
            let array = downcast::<Int16Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::Int8 => {
            let array = downcast::<Int8Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::UInt64 => {
            let array = downcast::<UInt64Array>(column, name)?;
            collect_cells(array, |i| {
                let value = array.value(i);
                i64::try_from(value).map_or(Cell::Float(value as f64), Cell::Int)
            })
        }
        DataType::UInt32 => {
            let array = downcast::<UInt32Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::UInt16 => {
            let array = downcast::<UInt16Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::UInt8 => {
            let array = downcast::<UInt8Array>(column, name)?;
            collect_cells(array, |i| Cell::Int(i64::from(array.value(i))))
        }
        DataType::Float64 => {
            let array = downcast::<Float64Array>(column, name)?;
            collect_cells(array, |i| Cell::Float(array.value(i)))
        }
        DataType::Float32 => {
            let array = downcast::<Float32Array>(column, name)?;
            collect_cells(array, |i| Cell::Float(f64::from(array.value(i))))
        }
        DataType::Boolean => {
            let array = downcast::<BooleanArray>(column, name)?;
            collect_cells(array, |i| Cell::Text(array.value(i).to_string()))
        }
        DataType::Date32 => {
            let array = downcast::<Date32Array>(column, name)?;
            collect_cells(array, |i| array.value_as_date(i).map_or(Cell::Null, Cell::Date))
        }
        DataType::Date64 => {
            let array = downcast::<Date64Array>(column, name)?;
            collect_cells(array, |i| array.value_as_date(i).map_or(Cell::Null, Cell::Date))
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            let array = downcast::<TimestampSecondArray>(column, name)?;
            collect_cells(array, |i| timestamp_cell(array.value_as_datetime(i)))
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let array = downcast::<TimestampMillisecondArray>(column, name)?;
            collect_cells(array, |i| timestamp_cell(array.value_as_datetime(i)))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let array = downcast::<TimestampMicrosecondArray>(column, name)?;
            collect_cells(array, |i| timestamp_cell(array.value_as_datetime(i)))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            let array = downcast::<TimestampNanosecondArray>(column, name)?;
            collect_cells(array, |i| timestamp_cell(array.value_as_datetime(i)))
        }
        DataType::Null => vec![Cell::Null; column.len()],
        other => display_cells(column, name, other),
    };
    Ok(cells)
}

/// Timestamps are kept as the UTC calendar date.
fn timestamp_cell(value: Option<NaiveDateTime>) -> Cell {
    value.map_or(Cell::Null, |dt| Cell::Date(dt.date()))
}

/// Reads a column of any other type as text. A type arrow cannot display
/// yields nulls, so its rows fall to the usual row-level rules.
fn display_cells(column: &ArrayRef, name: &str, data_type: &DataType) -> Vec<Cell> {
    let options = FormatOptions::default();
    match ArrayFormatter::try_new(column.as_ref(), &options) {
        Ok(formatter) => {
            collect_cells(column.as_ref(), |i| Cell::Text(formatter.value(i).to_string()))
        }
        Err(e) => {
            warn!(
                "Column {} of type {:?} cannot be read, treating it as empty: {}",
                name, data_type, e
            );
            vec![Cell::Null; column.len()]
        }
    }
}

fn downcast<'a, T: 'static>(column: &'a ArrayRef, name: &str) -> Result<&'a T> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::Data(format!("Column {} does not match its type", name)))
}

fn collect_cells<A: Array + ?Sized>(array: &A, value: impl Fn(usize) -> Cell) -> Vec<Cell> {
    (0..array.len())
        .map(|i| if array.is_null(i) { Cell::Null } else { value(i) })
        .collect()
}

/// Fills missing values of one numeric field from its `Product` group.
///
/// Two passes: collect the present values per product, then write the group
/// aggregate into the missing cells. Rows without a product, and groups with
/// no present values, are left missing. Returns how many cells were filled.
fn impute_by_group(
    rows: &mut [WorkingRow],
    field: impl Fn(&mut WorkingRow) -> &mut Numeric,
    strategy: ImputeStrategy,
) -> usize {
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for row in rows.iter_mut() {
        let Some(product) = row.product.clone() else {
            continue;
        };
        if let Numeric::Value(value) = *field(row) {
            groups.entry(product).or_default().push(value);
        }
    }

    let fills: HashMap<String, f64> = groups
        .into_iter()
        .filter_map(|(product, values)| aggregate(&values, strategy).map(|v| (product, v)))
        .collect();

    let mut filled = 0;
    for row in rows.iter_mut() {
        let fill = row.product.as_ref().and_then(|product| fills.get(product)).copied();
        let cell = field(row);
        if let (Numeric::Missing, Some(value)) = (*cell, fill) {
            *cell = Numeric::Value(value);
            filled += 1;
        }
    }
    filled
}

fn aggregate(values: &[f64], strategy: ImputeStrategy) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match strategy {
        ImputeStrategy::Median => Some(calculate_median(values)),
        ImputeStrategy::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
    }
}

/// Calculates the median of a non-empty slice.
fn calculate_median(data: &[f64]) -> f64 {
    let mut sorted_data = data.to_vec();
    sorted_data.sort_by(|a, b| a.total_cmp(b));

    let len = sorted_data.len();
    if len.is_multiple_of(2) {
        (sorted_data[len / 2 - 1] + sorted_data[len / 2]) / 2.0
    } else {
        sorted_data[len / 2]
    }
}

/// Parses a raw date cell into a calendar date.
///
/// Accepts plain dates in the layouts of [`RAW_DATE_FORMATS`], date-times
/// (time discarded) and RFC 3339 timestamps. Numbers are never dates.
fn parse_raw_date(cell: &Cell) -> Option<NaiveDate> {
    let text = match cell {
        Cell::Date(date) => return Some(*date),
        Cell::Text(text) => text.trim(),
        _ => return None,
    };

    RAW_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            RAW_DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Reads a transaction id; floats are accepted only when integral.
fn parse_id(cell: &Cell) -> Option<i64> {
    match cell {
        Cell::Int(v) => Some(*v),
        Cell::Float(v) => integral(*v),
        Cell::Text(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(integral))
        }
        Cell::Null | Cell::Date(_) => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    if value.fract() != 0.0 {
        return None;
    }
    to_i64(value)
}

/// Converts without saturating; `None` for non-finite or out-of-range values.
fn to_i64(value: f64) -> Option<i64> {
    (-I64_BOUND..I64_BOUND)
        .contains(&value)
        .then(|| value as i64)
}

/// Coerces a quantity to an integer, truncating any fraction left by
/// imputation. `None` is the failure sentinel for missing, unreadable or
/// out-of-range values.
fn coerce_quantity(quantity: Numeric) -> Option<i64> {
    match quantity {
        Numeric::Value(v) => to_i64(v.trunc()),
        _ => None,
    }
}

fn cell_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Null => None,
        Cell::Int(v) => Some(v.to_string()),
        Cell::Float(v) => Some(v.to_string()),
        Cell::Date(date) => Some(date.format("%Y-%m-%d").to_string()),
        Cell::Text(text) => Some(text.clone()),
    }
}

fn status_text(cell: &Cell) -> Option<String> {
    cell_text(cell).filter(|text| !text.trim().is_empty())
}
