use crate::error::{QueryError, Result};
use crate::structs::Transaction;
use chrono::NaiveDate;
use log::{debug, error};
use rayon::prelude::*;
use serde::Deserialize;

/// Textual layout required for date parameters.
pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%d";

/// Supplies the validated table to the query engine.
pub trait TableSource {
    /// Returns every stored row, in stored order.
    fn load(&self) -> Result<Vec<Transaction>>;
}

/// Filter options exactly as a caller supplied them.
///
/// Empty strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
}

/// Validated filter options. Every supplied option must hold for a row to
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<String>,
}

impl Predicate {
    /// Validates caller input.
    ///
    /// # Errors
    /// Returns `QueryError::Validation` naming the parameter when a date is not
    /// a real calendar date in `YYYY-MM-DD` form.
    pub fn parse(params: &QueryParams) -> std::result::Result<Self, QueryError> {
        Ok(Self {
            start_date: parse_date_param("start_date", params.start_date.as_deref())?,
            end_date: parse_date_param("end_date", params.end_date.as_deref())?,
            status: present(params.status.as_deref()).map(str::to_string),
        })
    }

    pub fn matches(&self, row: &Transaction) -> bool {
        self.start_date.is_none_or(|start| row.date >= start)
            && self.end_date.is_none_or(|end| row.date <= end)
            && self.status.as_deref().is_none_or(|status| {
                row.status.as_ref().is_some_and(|s| s.as_str() == status)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none() && self.status.is_none()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn parse_date_param(
    parameter: &'static str,
    value: Option<&str>,
) -> std::result::Result<Option<NaiveDate>, QueryError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let invalid = |detail: &str| QueryError::Validation {
        parameter,
        reason: format!("'{}' {}. Use YYYY-MM-DD.", value, detail),
    };

    // chrono accepts single-digit fields, so check the layout first.
    let bytes = value.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(invalid("is not in the required format"));
    }
    NaiveDate::parse_from_str(value, QUERY_DATE_FORMAT)
        .map(Some)
        .map_err(|_| invalid("is not a valid calendar date"))
}

/// Returns the rows of `table` matching `predicate`, in table order.
pub fn query(table: &[Transaction], predicate: &Predicate) -> Vec<Transaction> {
    if predicate.is_empty() {
        return table.to_vec();
    }
    table
        .par_iter()
        .filter(|row| predicate.matches(row))
        .cloned()
        .collect()
}

/// Validates `params`, loads the table from `source` and filters it.
///
/// The predicate is checked before the table is touched, so a malformed
/// request never reaches storage.
///
/// # Errors
/// Returns `QueryError::Validation` for malformed parameters and
/// `QueryError::Infrastructure` when the table cannot be read.
pub fn run_query<S: TableSource + ?Sized>(
    source: &S,
    params: &QueryParams,
) -> std::result::Result<Vec<Transaction>, QueryError> {
    let predicate = Predicate::parse(params)?;
    debug!("Running query with {:?}", predicate);

    let table = source.load().map_err(|e| {
        error!("Failed to load transaction table: {}", e);
        QueryError::Infrastructure
    })?;

    let rows = query(&table, &predicate);
    debug!("Query matched {} of {} rows", rows.len(), table.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, QueryErrorKind};
    use crate::structs::Status;
    use std::cell::Cell;

    fn row(id: i64, date: &str, status: &str) -> Transaction {
        Transaction {
            transaction_id: id,
            date: NaiveDate::parse_from_str(date, QUERY_DATE_FORMAT).unwrap(),
            product: Some("Widget A".to_string()),
            quantity: 1,
            price: 10.0,
            total_amount: 10.0,
            status: Some(Status::canonicalize(status)),
        }
    }

    fn table() -> Vec<Transaction> {
        vec![
            row(1, "2023-10-05", "complete"),
            row(2, "2023-09-30", "complete"),
            row(3, "2023-10-01", "pending"),
            row(4, "2023-10-31", "complete"),
            row(5, "2023-11-01", "complete"),
            row(6, "2023-10-01", "complete"),
        ]
    }

    fn params(start: Option<&str>, end: Option<&str>, status: Option<&str>) -> QueryParams {
        QueryParams {
            start_date: start.map(str::to_string),
            end_date: end.map(str::to_string),
            status: status.map(str::to_string),
        }
    }

    struct FixedSource(Vec<Transaction>);

    impl TableSource for FixedSource {
        fn load(&self) -> Result<Vec<Transaction>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource {
        loads: Cell<usize>,
    }

    impl TableSource for BrokenSource {
        fn load(&self) -> Result<Vec<Transaction>> {
            self.loads.set(self.loads.get() + 1);
            Err(PipelineError::Data("corrupt footer at /var/data".to_string()))
        }
    }

    fn ids(rows: &[Transaction]) -> Vec<i64> {
        rows.iter().map(|r| r.transaction_id).collect()
    }

    #[test]
    fn empty_predicate_returns_full_table_in_order() {
        let rows = query(&table(), &Predicate::default());
        assert_eq!(rows, table());
    }

    #[test]
    fn filters_compose_conjunctively() {
        let predicate =
            Predicate::parse(&params(Some("2023-10-01"), Some("2023-10-31"), Some("complete")))
                .unwrap();
        let rows = query(&table(), &predicate);
        assert_eq!(ids(&rows), vec![1, 4, 6]);
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let predicate = Predicate::parse(&params(Some("2023-10-01"), Some("2023-10-01"), None))
            .unwrap();
        assert_eq!(ids(&query(&table(), &predicate)), vec![3, 6]);
    }

    #[test]
    fn status_match_is_exact() {
        let predicate = Predicate::parse(&params(None, None, Some("Complete"))).unwrap();
        assert!(query(&table(), &predicate).is_empty());
    }

    #[test]
    fn start_after_every_row_yields_empty_result() {
        let rows = run_query(
            &FixedSource(table()),
            &params(Some("2030-01-01"), None, None),
        )
        .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn empty_strings_impose_no_constraint() {
        let predicate = Predicate::parse(&params(Some(""), Some(""), Some(""))).unwrap();
        assert!(predicate.is_empty());
    }

    #[test]
    fn malformed_dates_are_validation_errors() {
        for bad in ["invalid-date", "2023-1-05", "2023/10/01", "01-10-2023", "2023-02-30", "2023-10-01 "] {
            let err = Predicate::parse(&params(Some(bad), None, None)).unwrap_err();
            assert_eq!(err.kind(), QueryErrorKind::Validation, "{bad}");
        }
        let err = Predicate::parse(&params(None, Some("tomorrow"), None)).unwrap_err();
        assert!(err.to_string().contains("end_date"));
        assert!(err.is_client_error());
    }

    #[test]
    fn validation_happens_before_table_access() {
        let source = BrokenSource { loads: Cell::new(0) };
        let err = run_query(&source, &params(Some("invalid-date"), None, None)).unwrap_err();
        assert!(err.to_string().contains("start_date"));
        assert_eq!(source.loads.get(), 0);
    }

    #[test]
    fn unreadable_table_is_an_infrastructure_error() {
        let source = BrokenSource { loads: Cell::new(0) };
        let err = run_query(&source, &QueryParams::default()).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::Infrastructure);
        assert!(!err.is_client_error());
        assert!(!err.to_string().contains("/var/data"));
        assert_eq!(source.loads.get(), 1);
    }
}
