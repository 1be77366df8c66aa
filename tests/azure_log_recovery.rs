//! Order log recovery against a mocked Azure account.
//!
//! Creating an append blob with a header is two requests. When the header
//! append fails the blob stays behind empty, and the next run must write the
//! header before any rows.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ordersync::adapters::{AzureBlobStore, AzureConfig, ShopifyClient, ShopifyConfig};
use ordersync::core::{RowEncoder, SyncOrchestrator};
use ordersync::domain::{RunOutcome, SyncStage, SyncTarget};

// base64("ordersync-shared-key-for-tests")
const TEST_KEY: &str = "b3JkZXJzeW5jLXNoYXJlZC1rZXktZm9yLXRlc3Rz";
const SENTINEL: &str = "1980-01-01T00:00:00.000Z";

fn target() -> SyncTarget {
    SyncTarget {
        container: "orders".to_string(),
        watermark_blob: "status.txt".to_string(),
        orders_blob: "orders.csv".to_string(),
    }
}

fn orchestrator(server: &MockServer) -> SyncOrchestrator<AzureBlobStore, ShopifyClient> {
    let store = AzureBlobStore::new(AzureConfig {
        account: "acct".to_string(),
        key: TEST_KEY.to_string(),
        endpoint: Some(server.uri()),
        timeout_secs: 5,
    })
    .unwrap();
    let source = ShopifyClient::new(ShopifyConfig {
        base_url: server.uri(),
        username: "api-user".to_string(),
        password: "secret".to_string(),
        page_size: 50,
        timeout_secs: 5,
    })
    .unwrap();
    SyncOrchestrator::new(store, source, target())
}

async fn mount_account(server: &MockServer, header_text: &str) {
    Mock::given(method("PUT"))
        .and(path("/orders"))
        .and(query_param("restype", "container"))
        .respond_with(ResponseTemplate::new(409))
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/orders/status.txt"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/status.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SENTINEL))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/status.txt"))
        .and(header("x-ms-blob-type", "BlockBlob"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(server)
        .await;

    // The log is missing for the first run, then left empty
    Mock::given(method("HEAD"))
        .and(path("/orders/orders.csv"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/orders/orders.csv"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/orders.csv"))
        .and(header("x-ms-blob-type", "AppendBlob"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(server)
        .await;

    // The first append block is rejected
    Mock::given(method("PUT"))
        .and(path("/orders/orders.csv"))
        .and(query_param("comp", "appendblock"))
        .respond_with(ResponseTemplate::new(503).set_body_string("ServerBusy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/orders.csv"))
        .and(query_param("comp", "appendblock"))
        .and(body_string(header_text))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/orders.csv"))
        .and(query_param("comp", "appendblock"))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

async fn mount_shop(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/admin/orders.json"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [{ "id": 7, "email": "a@example.com", "total_price": "3.50" }]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/orders.json"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orders": [] })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_header_is_written_after_failed_initial_append() {
    let server = MockServer::start().await;
    let header_text = RowEncoder::new().header();
    mount_account(&server, &header_text).await;
    mount_shop(&server).await;

    let orchestrator = orchestrator(&server);

    let first = orchestrator
        .run(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
        .await;
    match &first.outcome {
        RunOutcome::Failed { stage, error } => {
            assert_eq!(*stage, SyncStage::StorageInit);
            assert!(error.contains("503"), "unexpected error: {error}");
        }
        other => panic!("expected storage init failure, got {other:?}"),
    }

    let second = orchestrator
        .run(Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap())
        .await;
    assert_eq!(second.outcome, RunOutcome::Completed { orders: 1, pages: 1 });

    // Failed header, repaired header, then the data row
    let requests = server.received_requests().await.unwrap();
    let appended: Vec<String> = requests
        .iter()
        .filter(|r| r.url.query().is_some_and(|q| q.contains("comp=appendblock")))
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect();
    assert_eq!(appended.len(), 3);
    assert_eq!(appended[0], header_text);
    assert_eq!(appended[1], header_text);
    assert_ne!(appended[2], header_text);
    assert!(appended[2].contains("a@example.com"));
    assert!(appended[2].ends_with("\r\n"));
}
