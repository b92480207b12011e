use chrono::NaiveDate;
use log::{Log, Metadata, Record as LogRecord};
use serde::{Deserialize, Serialize};

/// Simple logger implementation.
///
/// Writes to stderr so stdout stays free for query results.
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &LogRecord) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// One row of the validated transaction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "TransactionID")]
    pub transaction_id: i64,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Product")]
    pub product: Option<String>,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "TotalAmount")]
    pub total_amount: f64,
    #[serde(rename = "Status")]
    pub status: Option<Status>,
}

/// Normalized transaction status.
///
/// Anything outside the known vocabulary is kept verbatim (lowercased and
/// trimmed) as [`Status::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Status {
    Complete,
    Pending,
    Cancelled,
    Failed,
    Refunded,
    Other(String),
}

/// Lowercased spellings and the status each one collapses to.
const STATUS_SYNONYMS: &[(&str, Status)] = &[
    ("complete", Status::Complete),
    ("completed", Status::Complete),
    ("done", Status::Complete),
    ("pending", Status::Pending),
    ("in progress", Status::Pending),
    ("processing", Status::Pending),
    ("cancelled", Status::Cancelled),
    ("canceled", Status::Cancelled),
    ("failed", Status::Failed),
    ("refunded", Status::Refunded),
];

impl Status {
    /// Lowercases and trims `raw`, then maps it through the synonym table.
    pub fn canonicalize(raw: &str) -> Status {
        let normalized = raw.trim().to_lowercase();
        STATUS_SYNONYMS
            .iter()
            .find(|(synonym, _)| *synonym == normalized)
            .map(|(_, status)| status.clone())
            .unwrap_or(Status::Other(normalized))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Complete => "complete",
            Status::Pending => "pending",
            Status::Cancelled => "cancelled",
            Status::Failed => "failed",
            Status::Refunded => "refunded",
            Status::Other(value) => value,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Status::Other(_))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Status::canonicalize(&value)
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}

/// Aggregate used to fill missing numeric cells within a product group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImputeStrategy {
    Median,
    Mean,
}

/// Configuration for data transformation
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub quantity_strategy: ImputeStrategy,
    pub price_strategy: ImputeStrategy,
    /// Drop rows whose status is outside the known vocabulary instead of
    /// passing them through.
    pub drop_unrecognized_status: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            quantity_strategy: ImputeStrategy::Median,
            price_strategy: ImputeStrategy::Mean,
            drop_unrecognized_status: false,
        }
    }
}

/// Row counts gathered during a transform run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub input_rows: usize,
    pub imputed_quantity: usize,
    pub imputed_price: usize,
    pub dropped_invalid_date: usize,
    pub dropped_missing_id: usize,
    pub dropped_duplicate: usize,
    pub dropped_invalid_price: usize,
    pub dropped_invalid_quantity: usize,
    pub dropped_negative: usize,
    pub dropped_unrecognized_status: usize,
    pub output_rows: usize,
}

impl TransformReport {
    pub fn dropped(&self) -> usize {
        self.input_rows - self.output_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_collapses_synonyms() {
        assert_eq!(Status::canonicalize("Completed"), Status::Complete);
        assert_eq!(Status::canonicalize("  COMPLETE "), Status::Complete);
        assert_eq!(Status::canonicalize("Canceled"), Status::Cancelled);
        assert_eq!(Status::canonicalize("In Progress"), Status::Pending);
    }

    #[test]
    fn canonicalize_passes_unknown_values_through() {
        let status = Status::canonicalize("  On Hold ");
        assert_eq!(status, Status::Other("on hold".to_string()));
        assert_eq!(status.as_str(), "on hold");
        assert!(!status.is_recognized());
    }

    #[test]
    fn status_serializes_as_canonical_string() {
        let json = serde_json::to_string(&Status::canonicalize("completed")).unwrap();
        assert_eq!(json, "\"complete\"");
        let parsed: Status = serde_json::from_str("\"Pending\"").unwrap();
        assert_eq!(parsed, Status::Pending);
    }
}
