pub mod error;
pub mod ingest;
pub mod load;
pub mod query;
pub mod structs;
pub mod transform;

// Re-export public API
pub use error::{PipelineError, QueryError, QueryErrorKind, Result};
pub use ingest::{read_csv, read_parquet, read_raw};
pub use load::{ParquetStore, write_csv, write_json};
pub use query::{Predicate, QueryParams, TableSource, query, run_query};
pub use structs::{
    ImputeStrategy, SimpleLogger, Status, Transaction, TransformConfig, TransformReport,
};
pub use transform::{REQUIRED_COLUMNS, transform, transform_with_report};
