use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use common::testing::TestConfigBuilder;
use warehouse::catalog::{
    Compression, DatasetRef, DestinationFormat, InMemoryCatalog, TableMetadata, TerminalStatus,
};
use warehouse::export::{
    ExportDestination, ExportError, ExportLimits, ExportOptions, ExportRequest,
    ShardedTableExporter, ShardedTableTarget,
};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn setup(shards: &[(&str, u64)]) -> (Arc<InMemoryCatalog>, DatasetRef) {
    let catalog = Arc::new(InMemoryCatalog::new().with_page_size(2));
    let dataset = DatasetRef::new("proj", "logs");
    catalog.add_dataset(&dataset, None);
    for (table_id, bytes) in shards {
        catalog.add_table(
            &dataset,
            TableMetadata::regular(*table_id, at(2023, 1, 1)).with_num_bytes(*bytes),
        );
    }
    (catalog, dataset)
}

fn request(dataset: &DatasetRef, limits: ExportLimits, options: ExportOptions) -> ExportRequest {
    ExportRequest {
        dataset: dataset.clone(),
        target: ShardedTableTarget::new("events_", 3),
        destination: ExportDestination {
            uri_template: "gs://archive/{{TABLE_ID}}/*.parquet".to_string(),
            format: DestinationFormat::Parquet,
            compression: Compression::Snappy,
        },
        limits,
        options,
    }
}

fn exporter(catalog: &Arc<InMemoryCatalog>) -> ShardedTableExporter {
    ShardedTableExporter::new(catalog.clone(), catalog.clone())
}

#[tokio::test]
async fn test_exports_only_expired_shards() {
    let (catalog, dataset) = setup(&[
        ("events_20230101", 10),
        ("events_20230102", 10),
        ("events_20230110", 10),
        ("users", 10),
    ]);

    let submitted = Arc::new(Mutex::new(Vec::new()));
    let sink = submitted.clone();
    let exporter = exporter(&catalog).with_job_callback(Arc::new(move |job_id: &str| {
        sink.lock().unwrap().push(job_id.to_string());
    }));

    let exported = exporter
        .export_at(
            &request(&dataset, ExportLimits::default(), ExportOptions::default()),
            at(2023, 1, 6),
        )
        .await
        .unwrap();

    assert_eq!(exported, vec!["events_20230101", "events_20230102"]);

    let exports = catalog.exports();
    assert_eq!(exports.len(), 2);
    assert_eq!(
        exports[0].request.destination_uri,
        "gs://archive/events_20230101/*.parquet"
    );
    assert_eq!(exports[0].request.format, DestinationFormat::Parquet);
    assert_eq!(exports[0].request.compression, Compression::Snappy);

    let job_ids: Vec<String> = exports.iter().map(|e| e.job_id.clone()).collect();
    assert_eq!(*submitted.lock().unwrap(), job_ids);
}

#[tokio::test]
async fn test_table_count_limit_stops_after_limit() {
    let (catalog, dataset) = setup(&[
        ("events_20230101", 1),
        ("events_20230102", 1),
        ("events_20230103", 1),
    ]);

    let config = TestConfigBuilder::new().with_export_limits(0, 2).build();
    let limits = ExportLimits::from(&config.export);

    let failure = exporter(&catalog)
        .export_at(
            &request(&dataset, limits, ExportOptions::default()),
            at(2023, 2, 1),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.exported, vec!["events_20230101", "events_20230102"]);
    assert!(matches!(
        failure.source,
        ExportError::TableCountLimit { limit: 2, .. }
    ));
    assert!(failure.source.is_limit());
    assert_eq!(catalog.exports().len(), 2);
}

#[tokio::test]
async fn test_table_size_limit_is_cumulative() {
    let (catalog, dataset) = setup(&[
        ("events_20230101", 40),
        ("events_20230102", 50),
        ("events_20230103", 20),
    ]);

    let failure = exporter(&catalog)
        .export_at(
            &request(&dataset, ExportLimits::new(100, 0), ExportOptions::default()),
            at(2023, 2, 1),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.exported, vec!["events_20230101", "events_20230102"]);
    match failure.source {
        ExportError::TableSizeLimit {
            table_id,
            limit,
            attempted,
        } => {
            assert_eq!(table_id, "events_20230103");
            assert_eq!(limit, 100);
            assert_eq!(attempted, 110);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let (catalog, dataset) = setup(&[("events_20230101", 10), ("events_20230102", 10)]);

    let options = ExportOptions {
        dry_run: true,
        wait: true,
    };
    let exported = exporter(&catalog)
        .export_at(
            &request(&dataset, ExportLimits::default(), options),
            at(2023, 2, 1),
        )
        .await
        .unwrap();

    assert_eq!(exported.len(), 2);
    assert!(catalog.exports().is_empty());
}

#[tokio::test]
async fn test_failed_job_stops_run_when_waiting() {
    let (catalog, dataset) = setup(&[
        ("events_20230101", 1),
        ("events_20230102", 1),
        ("events_20230103", 1),
    ]);
    catalog.fail_exports_for(
        "events_20230102",
        TerminalStatus::Failed("access denied".to_string()),
    );

    let options = ExportOptions {
        dry_run: false,
        wait: true,
    };
    let failure = exporter(&catalog)
        .export_at(
            &request(&dataset, ExportLimits::default(), options),
            at(2023, 2, 1),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.exported, vec!["events_20230101"]);
    match failure.source {
        ExportError::JobFailed {
            table_id, status, ..
        } => {
            assert_eq!(table_id, "events_20230102");
            assert_eq!(status, TerminalStatus::Failed("access denied".to_string()));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(catalog.exports().len(), 2);
}

#[tokio::test]
async fn test_failed_job_is_not_noticed_without_waiting() {
    let (catalog, dataset) = setup(&[("events_20230101", 1)]);
    catalog.fail_exports_for("events_20230101", TerminalStatus::Cancelled);

    let exported = exporter(&catalog)
        .export_at(
            &request(&dataset, ExportLimits::default(), ExportOptions::default()),
            at(2023, 2, 1),
        )
        .await
        .unwrap();

    assert_eq!(exported, vec!["events_20230101"]);
}

#[tokio::test]
async fn test_unparsable_shard_name_aborts() {
    let (catalog, dataset) = setup(&[("events_20230101", 1), ("events_latest", 1)]);

    let failure = exporter(&catalog)
        .export_at(
            &request(&dataset, ExportLimits::default(), ExportOptions::default()),
            at(2023, 2, 1),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.exported, vec!["events_20230101"]);
    assert!(matches!(
        failure.source,
        ExportError::InvalidTableName { .. }
    ));
}
