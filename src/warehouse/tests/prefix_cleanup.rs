use std::sync::Arc;

use chrono::Utc;
use warehouse::catalog::{DatasetRef, InMemoryCatalog, TableMetadata};
use warehouse::cleanup::{CleanupError, TableJanitor};

fn setup() -> (Arc<InMemoryCatalog>, DatasetRef) {
    let catalog = Arc::new(InMemoryCatalog::new().with_page_size(1));
    let dataset = DatasetRef::new("proj", "scratch");
    catalog.add_dataset(&dataset, None);
    for id in ["tmp_a", "tmp_b", "keep"] {
        catalog.add_table(&dataset, TableMetadata::regular(id, Utc::now()));
    }
    (catalog, dataset)
}

#[tokio::test]
async fn test_deletes_matching_tables() {
    let (catalog, dataset) = setup();
    catalog.add_stale_listing_entry(&dataset, "tmp_gone");

    let deleted = TableJanitor::new(catalog.clone())
        .delete_tables_by_prefix(&dataset, "tmp_", false)
        .await
        .unwrap();

    assert_eq!(deleted, vec!["tmp_a", "tmp_b"]);
    assert_eq!(catalog.table_ids(&dataset), vec!["keep"]);
}

#[tokio::test]
async fn test_dry_run_keeps_tables() {
    let (catalog, dataset) = setup();

    let deleted = TableJanitor::new(catalog.clone())
        .delete_tables_by_prefix(&dataset, "tmp_", true)
        .await
        .unwrap();

    assert_eq!(deleted, vec!["tmp_a", "tmp_b"]);
    assert!(catalog.deleted().is_empty());
    assert_eq!(catalog.table_ids(&dataset).len(), 3);
}

#[tokio::test]
async fn test_empty_prefix_is_rejected() {
    let (catalog, dataset) = setup();

    let result = TableJanitor::new(catalog.clone())
        .delete_tables_by_prefix(&dataset, "", false)
        .await;

    assert!(matches!(result, Err(CleanupError::EmptyPrefix)));
    assert_eq!(catalog.list_calls(), 0);
}
