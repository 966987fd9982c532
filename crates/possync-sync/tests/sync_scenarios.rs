//! End-to-end sync scenarios
//!
//! Each test wires the real HTTP client (against a wiremock server) and the
//! real SQLite store (in memory) into a [`SyncOrchestrator`], then checks
//! what landed in the store, the checkpoint and the run log.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use possync_api::auth::{TokenCredentials, TokenManager};
use possync_api::client::{LoyaltyClient, RetryPolicy};
use possync_api::provider::LoyaltyApiProvider;
use possync_core::domain::{
    FailureKind, RemoteCustomerId, RunCounts, RunStatus, SyncMode, SyncType,
};
use possync_core::ports::{ICheckpointStore, IRecordStore, IRunLog, RunStart};
use possync_store::{DatabasePool, SqliteSyncStore};
use possync_sync::engine::{SyncOrchestrator, SyncSettings};
use possync_sync::SyncError;

// ============================================================================
// Test helpers
// ============================================================================

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Every membership lookup answers Silver unless a more specific mock wins
async fn mount_default_membership(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/customers/\d+/membership\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "membership": {"level_name": "Silver", "used_points": 3, "total_points": 40}
        })))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, resource: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{resource}.json")))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn customer(id: i64, updated_at: &str) -> Value {
    json!({"customer": {
        "id": id,
        "first_name": format!("First{id}"),
        "last_name": "Le",
        "phone": format!("09100000{id:02}"),
        "points": 12,
        "total_points": 99,
        "updated_at": updated_at
    }})
}

async fn setup(server: &MockServer) -> (SyncOrchestrator, Arc<SqliteSyncStore>) {
    let credentials = TokenCredentials {
        token_url: format!("{}/oauth/token", server.uri()),
        client_id: "test-client".into(),
        client_secret: None,
        username: "ops@example.test".into(),
        password: "hunter2".into(),
        scopes: vec![],
        max_lifetime: chrono::Duration::days(30),
        request_timeout: Duration::from_secs(5),
    };
    let tokens = Arc::new(TokenManager::new(credentials).expect("token manager"));
    let client = LoyaltyClient::new(server.uri(), tokens, Duration::from_secs(5))
        .expect("client")
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
    let api = Arc::new(LoyaltyApiProvider::new(client, 100));

    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let store = Arc::new(SqliteSyncStore::new(pool.pool().clone()));

    let settings = SyncSettings {
        page_size: 2,
        max_pages_per_run: 50,
        batch_size: 10,
        membership_concurrency: 2,
        stale_run_timeout: chrono::Duration::hours(2),
        error_summary_limit: 10,
    };
    let orchestrator = SyncOrchestrator::new(
        api,
        store.clone(),
        store.clone(),
        store.clone(),
        settings,
    );
    (orchestrator, store)
}

// ============================================================================
// Customers
// ============================================================================

#[tokio::test]
async fn test_two_pages_with_missing_membership() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_default_membership(&server).await;
    Mock::given(method("GET"))
        .and(path("/customers/3/membership.json"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "customers",
        1,
        json!({"customers": [customer(1, "2026-10-01T08:00:00Z"), customer(2, "2026-10-02T08:00:00Z")]}),
    )
    .await;
    mount_page(
        &server,
        "customers",
        2,
        json!({"customers": [customer(3, "2026-10-04T08:00:00Z"), customer(4, "2026-10-03T08:00:00Z")]}),
    )
    .await;
    mount_page(&server, "customers", 3, json!({"customers": []})).await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.counts.seen, 4);
    assert_eq!(outcome.counts.created, 4);
    assert_eq!(outcome.counts.failed, 1);
    assert!(outcome.errors[0].starts_with("3 [membership]"), "{:?}", outcome.errors);

    let resume =
        Utc.with_ymd_and_hms(2026, 10, 4, 8, 0, 0).unwrap() + chrono::Duration::microseconds(1);
    assert_eq!(outcome.checkpoint_after, Some(resume));
    let checkpoint = store.get_checkpoint(SyncType::Customers).await.unwrap().unwrap();
    assert_eq!(checkpoint.updated_since, resume);
    assert_eq!(checkpoint.run_id, Some(outcome.run_id));

    assert_eq!(store.count_customers().await.unwrap(), 4);
    let enriched = store
        .get_customer(RemoteCustomerId::new(1).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enriched.record.tier_label, "Silver");
    assert_eq!(enriched.record.total_points, 40.0);
    let bare = store
        .get_customer(RemoteCustomerId::new(3).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bare.record.tier_label, "");
    assert_eq!(bare.record.total_points, 99.0);

    let run = store.get_run(outcome.run_id).await.unwrap().unwrap();
    assert_eq!(run.status(), RunStatus::Completed);
    assert_eq!(run.failures().len(), 1);
}

#[tokio::test]
async fn test_remote_outage_on_second_page_keeps_checkpoint() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_default_membership(&server).await;
    mount_page(
        &server,
        "customers",
        1,
        json!({"customers": [customer(1, "2026-10-01T08:00:00Z"), customer(2, "2026-10-02T08:00:00Z")]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind, Some(FailureKind::RemoteUnavailable));
    assert_eq!(outcome.counts.created, 2);
    assert_eq!(outcome.checkpoint_after, None);

    // Page 1 stays written; the checkpoint did not move
    assert_eq!(store.count_customers().await.unwrap(), 2);
    assert!(store.get_checkpoint(SyncType::Customers).await.unwrap().is_none());
    assert!(store.last_completed(SyncType::Customers).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rerun_without_new_data_has_zero_counts() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_default_membership(&server).await;
    mount_page(
        &server,
        "customers",
        1,
        json!({"customers": [customer(1, "2026-10-02T10:00:00Z")]}),
    )
    .await;
    // the platform filters inclusively on updated_at_from
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(query_param("updated_at_from", "2026-10-02T10:00:00.000001Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .with_priority(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = setup(&server).await;
    let first = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();
    let second = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(first.counts.created, 1);
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.counts, RunCounts::default());
    assert_eq!(second.checkpoint_before, first.checkpoint_after);
    assert_eq!(second.checkpoint_after, first.checkpoint_after);
    assert_eq!(store.count_customers().await.unwrap(), 1);

    let requests = server.received_requests().await.unwrap();
    let filters: Vec<Option<String>> = requests
        .iter()
        .filter(|r| r.url.path() == "/customers.json")
        .map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "updated_at_from")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(
        filters,
        vec![None, Some("2026-10-02T10:00:00.000001Z".to_string())]
    );
}

#[tokio::test]
async fn test_membership_outage_is_a_record_failure() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/customers/1/membership.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "customers",
        1,
        json!({"customers": [customer(1, "2026-10-03T08:00:00Z")]}),
    )
    .await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.counts.created, 1);
    assert_eq!(outcome.counts.failed, 1);
    assert!(outcome.errors[0].starts_with("1 [membership]"), "{:?}", outcome.errors);

    let stored = store
        .get_customer(RemoteCustomerId::new(1).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.record.tier_label, "");
    assert_eq!(stored.record.used_points, 0.0);
    assert_eq!(stored.record.total_points, 99.0);
}

#[tokio::test]
async fn test_unknown_birthdate_parts_are_stored_as_absent() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_default_membership(&server).await;
    mount_page(
        &server,
        "customers",
        1,
        json!({"customers": [{"customer": {
            "id": 7,
            "birthday_day": 0,
            "birthday_month": 0,
            "birthday_year": 0,
            "updated_at": "2026-10-03T08:00:00Z"
        }}]}),
    )
    .await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.counts.created, 1);
    assert_eq!(outcome.counts.failed, 0);
    let stored = store
        .get_customer(RemoteCustomerId::new(7).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.record.birthday_day, None);
    assert_eq!(stored.record.birthday_month, None);
    assert_eq!(stored.record.birthday_year, None);
}

#[tokio::test]
async fn test_full_mode_ignores_checkpoint() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_default_membership(&server).await;
    mount_page(&server, "customers", 1, json!({"customers": []})).await;

    let (orchestrator, store) = setup(&server).await;
    let at = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    let mut seed = match store
        .begin_run(SyncType::Customers, SyncMode::Full, None, Utc::now())
        .await
        .unwrap()
    {
        RunStart::Started { run, .. } => run,
        other => panic!("unexpected {other:?}"),
    };
    store
        .advance_checkpoint(SyncType::Customers, at, seed.id())
        .await
        .unwrap();
    seed.complete(Some(at), Utc::now()).unwrap();
    store.save_run(&seed).await.unwrap();

    let outcome = orchestrator
        .run(SyncType::Customers, SyncMode::Full)
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.checkpoint_before, Some(at));
    assert_eq!(outcome.checkpoint_after, Some(at));

    let requests = server.received_requests().await.unwrap();
    let listing = requests
        .iter()
        .find(|r| r.url.path() == "/customers.json")
        .unwrap();
    assert!(!listing.url.query_pairs().any(|(k, _)| k == "updated_at_from"));
}

#[tokio::test]
async fn test_second_run_while_first_active_is_rejected() {
    let server = MockServer::start().await;
    let (orchestrator, store) = setup(&server).await;

    let active = match store
        .begin_run(
            SyncType::Customers,
            SyncMode::Incremental,
            None,
            Utc::now() - chrono::Duration::hours(2),
        )
        .await
        .unwrap()
    {
        RunStart::Started { run, .. } => run,
        other => panic!("unexpected {other:?}"),
    };

    let err = orchestrator
        .run(SyncType::Customers, SyncMode::Incremental)
        .await
        .unwrap_err();
    match err {
        SyncError::AlreadyRunning { run_id, sync_type, .. } => {
            assert_eq!(run_id, active.id());
            assert_eq!(sync_type, SyncType::Customers);
        }
        other => panic!("unexpected {other:?}"),
    }
    // nothing reached the remote
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_credentials_fail_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "bad password"
        })))
        .mount(&server)
        .await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Orders, SyncMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.failure_kind, Some(FailureKind::AuthRejected));
    assert_eq!(outcome.pages_fetched, 0);
    assert_eq!(store.count_orders().await.unwrap(), 0);
}

// ============================================================================
// Orders
// ============================================================================

#[tokio::test]
async fn test_orders_are_keyed_by_code() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_page(
        &server,
        "orders",
        1,
        json!({"orders": [
            {"order": {
                "id": 1001,
                "name": "#1001",
                "customer": {"id": 1, "first_name": "An", "last_name": "Le", "phone": "0910000001"},
                "financial_status": "paid",
                "total_price": "150000",
                "line_items": [{"sku": "TS-01", "title": "T-shirt", "quantity": 2, "price": 75000}],
                "updated_at": "2026-10-05T09:30:00Z"
            }},
            {"order": {"id": "not-a-number", "name": "#1002"}}
        ]}),
    )
    .await;
    mount_page(&server, "orders", 2, json!({"orders": []})).await;

    let (orchestrator, store) = setup(&server).await;
    let outcome = orchestrator
        .run(SyncType::Orders, SyncMode::Incremental)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.counts.seen, 2);
    assert_eq!(outcome.counts.created, 1);
    assert_eq!(outcome.counts.failed, 1);

    let order = store.get_order("#1001").await.unwrap().unwrap();
    assert_eq!(order.customer_phone, "0910000001");
    assert_eq!(order.total, 150000.0);
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].name, "T-shirt");

    let checkpoint = store.get_checkpoint(SyncType::Orders).await.unwrap().unwrap();
    assert_eq!(
        checkpoint.updated_since,
        Utc.with_ymd_and_hms(2026, 10, 5, 9, 30, 0).unwrap() + chrono::Duration::microseconds(1)
    );
    // the customer checkpoint is independent
    assert!(store.get_checkpoint(SyncType::Customers).await.unwrap().is_none());
}
