//! Sync Run Integration Tests
//!
//! Drives full runs against the in-memory store with scripted order pages and
//! checks what ends up in the log and the watermark.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use ordersync::adapters::storage::StoreOp;
use ordersync::adapters::{BlobError, BlobStore, MemoryBlobStore, OrderSource, SourceError};
use ordersync::core::{RowEncoder, SyncOrchestrator};
use ordersync::domain::{Order, RunOutcome, SyncStage, SyncTarget, Watermark};

const CONTAINER: &str = "orders";
const WATERMARK: &str = "status.txt";
const LOG: &str = "orders.csv";
const SENTINEL: &str = "1980-01-01T00:00:00.000Z";

/// State of the store as seen by the source when a page was requested
#[derive(Debug, Clone)]
struct FetchObservation {
    created_at_min: String,
    page: u32,
    watermark: Option<String>,
    log: Option<String>,
}

/// Order source serving fixed pages, optionally failing one of them
struct PagedSource {
    pages: Vec<Vec<Order>>,
    fail_on_page: Option<u32>,
    store: MemoryBlobStore,
    seen: Mutex<Vec<FetchObservation>>,
}

impl PagedSource {
    fn new(store: &MemoryBlobStore, page_sizes: &[usize]) -> Self {
        let mut next_id = 1000u64;
        let pages = page_sizes
            .iter()
            .map(|&size| {
                (0..size)
                    .map(|_| {
                        next_id += 1;
                        order(next_id)
                    })
                    .collect()
            })
            .collect();

        Self {
            pages,
            fail_on_page: None,
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, page: u32) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    fn observations(&self) -> Vec<FetchObservation> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSource for PagedSource {
    fn name(&self) -> &str {
        "paged"
    }

    async fn fetch_page(
        &self,
        created_at_min: &Watermark,
        page: u32,
    ) -> Result<Vec<Order>, SourceError> {
        self.seen.lock().unwrap().push(FetchObservation {
            created_at_min: created_at_min.to_iso_string(),
            page,
            watermark: self.store.get(CONTAINER, WATERMARK),
            log: self.store.get(CONTAINER, LOG),
        });

        if self.fail_on_page == Some(page) {
            // Any decode error stands in for a broken response
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(SourceError::Decode(err));
        }

        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }
}

/// Memory store whose n-th append (1-based) fails
struct FailingAppendStore {
    inner: MemoryBlobStore,
    fail_on_append: usize,
    appends: AtomicUsize,
}

#[async_trait]
impl BlobStore for FailingAppendStore {
    fn name(&self) -> &str {
        "failing-append"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError> {
        self.inner.create_container_if_not_exists(container).await
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError> {
        self.inner.blob_exists(container, blob).await
    }

    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError> {
        self.inner.blob_size(container, blob).await
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError> {
        self.inner.create_append_blob(container, blob, initial).await
    }

    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_append {
            return Err(BlobError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "append rejected",
            )));
        }
        self.inner.append_text(container, blob, text).await
    }

    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        self.inner.write_text(container, blob, text).await
    }

    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError> {
        self.inner.read_text(container, blob).await
    }
}

fn order(id: u64) -> Order {
    serde_json::from_value(json!({
        "id": id,
        "email": format!("customer{}@example.com", id),
        "created_at": "2024-05-01T09:15:00-04:00",
        "total_price": "10.00",
        "billing_address": { "province_code": "ON" },
        "customer": { "first_name": "Ada", "last_name": "Lovelace", "orders_count": 1 }
    }))
    .unwrap()
}

fn target() -> SyncTarget {
    SyncTarget {
        container: CONTAINER.to_string(),
        watermark_blob: WATERMARK.to_string(),
        orders_blob: LOG.to_string(),
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

fn data_rows(log: &str) -> Vec<&str> {
    log.split_terminator("\r\n").skip(1).collect()
}

#[tokio::test]
async fn test_pages_are_appended_then_watermark_written_once() {
    let store = MemoryBlobStore::new();
    let source = PagedSource::new(&store, &[250, 10, 0]);
    let orchestrator = SyncOrchestrator::new(store.clone(), source, target());

    let report = orchestrator.run(at(12)).await;
    assert_eq!(report.outcome, RunOutcome::Completed { orders: 260, pages: 2 });

    let log = store.get(CONTAINER, LOG).unwrap();
    assert_eq!(data_rows(&log).len(), 260);

    let ops = store.operations();
    let appends = ops
        .iter()
        .filter(|op| matches!(op, StoreOp::Append { .. }))
        .count();
    assert_eq!(appends, 2);

    // The only watermark write after data was appended is the final one
    let last_append = ops
        .iter()
        .rposition(|op| matches!(op, StoreOp::Append { .. }))
        .unwrap();
    let updates: Vec<_> = ops[last_append..]
        .iter()
        .filter(|op| matches!(op, StoreOp::Write { blob, .. } if blob == WATERMARK))
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        store.get(CONTAINER, WATERMARK).unwrap(),
        "2024-06-01T12:00:00.000Z"
    );
}

#[tokio::test]
async fn test_failed_append_keeps_earlier_pages_and_watermark() {
    let memory = MemoryBlobStore::new();
    memory.insert(CONTAINER, WATERMARK, "2024-05-01T00:00:00.000Z");
    let store = FailingAppendStore {
        inner: memory.clone(),
        fail_on_append: 2,
        appends: AtomicUsize::new(0),
    };
    let source = PagedSource::new(&memory, &[250, 10, 0]);
    let orchestrator = SyncOrchestrator::new(store, source, target());

    let report = orchestrator.run(at(12)).await;
    match &report.outcome {
        RunOutcome::Failed { stage, error } => {
            assert_eq!(*stage, SyncStage::Append);
            assert!(error.contains("page 2"), "unexpected error: {error}");
        }
        other => panic!("expected append failure, got {other:?}"),
    }

    let log = memory.get(CONTAINER, LOG).unwrap();
    assert_eq!(data_rows(&log).len(), 250);
    assert_eq!(
        memory.get(CONTAINER, WATERMARK).unwrap(),
        "2024-05-01T00:00:00.000Z"
    );

    // Nothing was fetched after the failed append
    let pages: Vec<u32> = orchestrator
        .source()
        .observations()
        .iter()
        .map(|o| o.page)
        .collect();
    assert_eq!(pages, vec![1, 2]);
}

#[tokio::test]
async fn test_sentinel_and_header_exist_before_first_fetch() {
    let store = MemoryBlobStore::new();
    let source = PagedSource::new(&store, &[1]);
    let orchestrator = SyncOrchestrator::new(store.clone(), source, target());

    orchestrator.run(at(12)).await;

    let first = orchestrator.source().observations()[0].clone();
    assert_eq!(first.page, 1);
    assert_eq!(first.created_at_min, SENTINEL);
    assert_eq!(first.watermark.as_deref(), Some(SENTINEL));
    assert_eq!(first.log, Some(RowEncoder::new().header()));

    let log = store.get(CONTAINER, LOG).unwrap();
    assert!(log.starts_with("billingState,cancel_reason,closed_at,created_at,firstname,"));
    assert_eq!(log.matches("billingState").count(), 1);
}

#[tokio::test]
async fn test_existing_log_is_never_rewritten() {
    let store = MemoryBlobStore::new();
    let existing = "billingState,legacy\r\nKY,1\r\n";
    store.insert(CONTAINER, LOG, existing);
    store.insert(CONTAINER, WATERMARK, "2024-05-01T00:00:00.000Z");

    let source = PagedSource::new(&store, &[2]);
    let orchestrator = SyncOrchestrator::new(store.clone(), source, target());
    let report = orchestrator.run(at(12)).await;
    assert!(report.is_success());

    let log = store.get(CONTAINER, LOG).unwrap();
    assert!(log.starts_with(existing));
    assert_eq!(log.matches("\r\n").count(), 4);

    let ops = store.operations();
    assert!(!ops
        .iter()
        .any(|op| matches!(op, StoreOp::CreateAppendBlob { .. })));
    assert!(!ops
        .iter()
        .any(|op| matches!(op, StoreOp::CreateContainer { .. })));
}

#[tokio::test]
async fn test_log_left_empty_by_failed_header_append_is_repaired() {
    let memory = MemoryBlobStore::new();
    let store = FailingAppendStore {
        inner: memory.clone(),
        fail_on_append: 1,
        appends: AtomicUsize::new(0),
    };
    // The blob is created empty, then the header append is rejected
    store.inner.create_append_blob(CONTAINER, LOG, "").await.unwrap();
    assert!(store.append_text(CONTAINER, LOG, "header").await.is_err());
    assert_eq!(memory.get(CONTAINER, LOG).as_deref(), Some(""));

    let source = PagedSource::new(&memory, &[2]);
    let orchestrator = SyncOrchestrator::new(store, source, target());
    let report = orchestrator.run(at(12)).await;
    assert_eq!(report.outcome, RunOutcome::Completed { orders: 2, pages: 1 });

    let header = RowEncoder::new().header();
    let first = orchestrator.source().observations()[0].clone();
    assert_eq!(first.log.as_deref(), Some(header.as_str()));

    let log = memory.get(CONTAINER, LOG).unwrap();
    assert!(log.starts_with(&header));
    assert_eq!(log.matches("billingState").count(), 1);
    assert_eq!(data_rows(&log).len(), 2);
}

#[tokio::test]
async fn test_fetch_error_leaves_watermark_unchanged() {
    let store = MemoryBlobStore::new();
    store.insert(CONTAINER, WATERMARK, "2024-05-01T00:00:00.000Z");
    let source = PagedSource::new(&store, &[3, 3, 0]).failing_on(2);
    let orchestrator = SyncOrchestrator::new(store.clone(), source, target());

    let report = orchestrator.run(at(12)).await;
    match &report.outcome {
        RunOutcome::Failed { stage, .. } => assert_eq!(*stage, SyncStage::Fetch),
        other => panic!("expected fetch failure, got {other:?}"),
    }

    assert_eq!(
        store.get(CONTAINER, WATERMARK).unwrap(),
        "2024-05-01T00:00:00.000Z"
    );
    let log = store.get(CONTAINER, LOG).unwrap();
    assert_eq!(data_rows(&log).len(), 3);
}

#[tokio::test]
async fn test_second_run_starts_from_first_run_start() {
    let store = MemoryBlobStore::new();

    let first = SyncOrchestrator::new(store.clone(), PagedSource::new(&store, &[2]), target());
    assert!(first.run(at(12)).await.is_success());

    let second = SyncOrchestrator::new(store.clone(), PagedSource::new(&store, &[]), target());
    assert!(second.run(at(13)).await.is_success());

    let requests = second.source().observations();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].created_at_min, "2024-06-01T12:00:00.000Z");
    assert_eq!(
        store.get(CONTAINER, WATERMARK).unwrap(),
        "2024-06-01T13:00:00.000Z"
    );

    // Only the header and the first run's rows
    let log = store.get(CONTAINER, LOG).unwrap();
    assert_eq!(data_rows(&log).len(), 2);
}

#[tokio::test]
async fn test_rows_match_encoder_output() {
    let store = MemoryBlobStore::new();
    let source = PagedSource::new(&store, &[2]);
    let expected_rows = RowEncoder::new().encode_page(&source.pages[0]);
    let orchestrator = SyncOrchestrator::new(store.clone(), source, target());

    orchestrator.run(at(12)).await;

    let log = store.get(CONTAINER, LOG).unwrap();
    assert_eq!(log, format!("{}{}", RowEncoder::new().header(), expected_rows));
    assert!(log.contains("ON,,,2024-05-01T09:15:00-04:00,Ada,Lovelace,,1,customer1001@example.com"));
}
