use arrow_schema::ArrowError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Data Error: {0}")]
    Data(String),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification of a [`QueryError`], for callers that map errors to
/// their own status signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Validation,
    Infrastructure,
}

/// Errors surfaced by the query engine.
///
/// Validation errors describe the offending parameter. Infrastructure errors
/// carry only a generic description; the underlying cause is logged.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid {parameter}: {reason}")]
    Validation {
        parameter: &'static str,
        reason: String,
    },
    #[error("Could not read transaction data")]
    Infrastructure,
}

impl QueryError {
    pub fn kind(&self) -> QueryErrorKind {
        match self {
            QueryError::Validation { .. } => QueryErrorKind::Validation,
            QueryError::Infrastructure => QueryErrorKind::Infrastructure,
        }
    }

    /// True when the caller's request was at fault rather than the service.
    pub fn is_client_error(&self) -> bool {
        self.kind() == QueryErrorKind::Validation
    }
}
