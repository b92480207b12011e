use std::fs;
use txn_pipeline::{
    ParquetStore, QueryErrorKind, QueryParams, Status, TransformConfig, read_raw, run_query,
    transform,
};

const SAMPLE_CSV: &str = "\
TransactionID,Date,Product,Quantity,Price,Status
1001,2023-10-01,Widget A,5,100.0,Complete
1002,2023-10-01,Widget B,,200.0,completed
1003,invalid_date,Widget A,10,,Pending
1004,2023-10-15,Widget B,8,200.0, pending
1001,2023-10-02,Widget A,5,100.0,Complete
1005,2023-11-02,Widget A,3,,complete
1006,2023-09-28,Widget C,-1,50.0,complete
1007,2023-10-20,Widget C,2,abc,complete
";

fn params(start: Option<&str>, end: Option<&str>, status: Option<&str>) -> QueryParams {
    QueryParams {
        start_date: start.map(str::to_string),
        end_date: end.map(str::to_string),
        status: status.map(str::to_string),
    }
}

#[test]
fn csv_to_store_to_query() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(&input, SAMPLE_CSV).unwrap();

    let batches = read_raw(&input).unwrap();
    let rows = transform(&batches, &TransformConfig::default()).unwrap();

    let ids: Vec<i64> = rows.iter().map(|r| r.transaction_id).collect();
    assert_eq!(ids, vec![1001, 1002, 1004, 1005]);
    assert!(rows.iter().all(|r| r.quantity >= 0 && r.price >= 0.0));
    assert!(rows.iter().all(|r| r.status.as_ref().is_some_and(Status::is_recognized)));

    let widget_b = &rows[1];
    assert_eq!(widget_b.quantity, 8);
    assert_eq!(widget_b.status, Some(Status::Complete));
    assert_eq!(widget_b.total_amount, 1600.0);

    // Widget A prices seen: 100.0 (twice, including the later duplicate)
    assert_eq!(rows[3].price, 100.0);

    let store = ParquetStore::new(dir.path().join("out").join("transactions.parquet"));
    store.replace(&rows).unwrap();

    let all = run_query(&store, &QueryParams::default()).unwrap();
    assert_eq!(all, rows);

    let october_complete = run_query(
        &store,
        &params(Some("2023-10-01"), Some("2023-10-31"), Some("complete")),
    )
    .unwrap();
    let ids: Vec<i64> = october_complete.iter().map(|r| r.transaction_id).collect();
    assert_eq!(ids, vec![1001, 1002]);

    let none = run_query(&store, &params(Some("2024-01-01"), None, None)).unwrap();
    assert!(none.is_empty());

    let err = run_query(&store, &params(Some("invalid-date"), None, None)).unwrap_err();
    assert_eq!(err.kind(), QueryErrorKind::Validation);
}

#[test]
fn transform_rerun_produces_identical_table() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(&input, SAMPLE_CSV).unwrap();
    let store = ParquetStore::new(dir.path().join("transactions.parquet"));

    let batches = read_raw(&input).unwrap();
    store
        .replace(&transform(&batches, &TransformConfig::default()).unwrap())
        .unwrap();
    let first = store.read().unwrap();
    store
        .replace(&transform(&batches, &TransformConfig::default()).unwrap())
        .unwrap();
    assert_eq!(store.read().unwrap(), first);
}

#[test]
fn missing_store_is_an_infrastructure_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ParquetStore::new(dir.path().join("never-written.parquet"));
    let err = run_query(&store, &params(None, None, Some("complete"))).unwrap_err();
    assert_eq!(err.kind(), QueryErrorKind::Infrastructure);
}

#[test]
fn input_without_required_column_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.csv");
    fs::write(&input, "TransactionID,Date,Product,Quantity,Status\n1,2023-10-01,A,1,complete\n")
        .unwrap();

    let batches = read_raw(&input).unwrap();
    let err = transform(&batches, &TransformConfig::default()).unwrap_err();
    assert!(err.to_string().contains("Price"));
}

#[test]
fn stored_table_reads_back_as_raw_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("transactions.csv");
    fs::write(&input, SAMPLE_CSV).unwrap();
    let store = ParquetStore::new(dir.path().join("transactions.parquet"));

    let rows = transform(&read_raw(&input).unwrap(), &TransformConfig::default()).unwrap();
    store.replace(&rows).unwrap();

    let reloaded = read_raw(store.path()).unwrap();
    let again = transform(&reloaded, &TransformConfig::default()).unwrap();
    assert_eq!(again, rows);
}
