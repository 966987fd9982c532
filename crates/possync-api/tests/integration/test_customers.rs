//! Customer listing, membership lookups and the retry policy

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use possync_api::provider::LoyaltyApiProvider;
use possync_api::ApiError;
use possync_core::domain::RemoteCustomerId;
use possync_core::ports::{ILoyaltyApi, RemoteError};

use crate::common::{client_for, customer_json, fast_retry, mount_token};

#[tokio::test]
async fn test_list_customers_sends_paging_params() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(query_param("page", "2"))
        .and(query_param("per_page", "2"))
        .and(query_param("limit", "2"))
        .and(query_param("order", "updated_at_asc"))
        .and(query_param_is_missing("updated_at_from"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "customers": [
                customer_json(3, "2026-10-01T08:00:00Z"),
                customer_json(4, "2026-10-02T08:00:00Z")
            ],
            "pagination": {"has_more": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client_for(&server).list_customers(2, 2, None).await.unwrap();
    assert_eq!(page.items.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3, 4]);
    assert!(page.has_next);
    assert_eq!(page.items[0].first_name.as_deref(), Some("First3"));
}

#[tokio::test]
async fn test_updated_since_filter_is_formatted() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(query_param("updated_at_from", "2026-10-01T08:00:00.250000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .expect(1)
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap()
        + chrono::Duration::milliseconds(250);
    let page = client_for(&server)
        .list_customers(1, 100, Some(since))
        .await
        .unwrap();
    assert_eq!(page.raw_len(), 0);
}

#[tokio::test]
async fn test_malformed_item_does_not_fail_page() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "customers": [
                customer_json(1, "2026-10-01T08:00:00Z"),
                {"customer": {"id": "abc"}}
            ]
        })))
        .mount(&server)
        .await;

    let page = client_for(&server).list_customers(1, 2, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.malformed.len(), 1);
    assert_eq!(page.malformed[0].key, "abc");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "customers": [customer_json(1, "2026-10-01T08:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client_for(&server).list_customers(1, 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_too_many_requests_honors_retry_after() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let page = client_for(&server).list_customers(1, 10, None).await.unwrap();
    assert!(page.items.is_empty());
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn test_retries_exhausted_after_attempt_ceiling() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .list_customers(1, 10, None)
        .await
        .unwrap_err();
    match err {
        ApiError::RetriesExhausted {
            path,
            attempts,
            last,
        } => {
            assert_eq!(path, "/customers.json");
            assert_eq!(attempts, 3);
            assert!(last.contains("503"), "last error: {last}");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad filter"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .with_retry_policy(fast_retry(5))
        .list_customers(1, 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ClientError { status: 422, .. }));
}

#[tokio::test]
async fn test_membership_lookup() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers/42/membership.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "membership": {"level_name": "Gold", "used_points": 120, "total_points": 980, "points": 860}
        })))
        .mount(&server)
        .await;

    let id = RemoteCustomerId::new(42).unwrap();
    let membership = client_for(&server).get_membership(id).await.unwrap();
    assert_eq!(membership.level_name.as_deref(), Some("Gold"));
    assert_eq!(membership.used_points, Some(120.0));
    assert_eq!(membership.total_points, Some(980.0));
}

#[tokio::test]
async fn test_membership_not_found() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers/7/membership.json"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers/8/membership.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let missing = client.get_membership(RemoteCustomerId::new(7).unwrap()).await;
    assert!(matches!(missing, Err(ApiError::NotFound(_))));
    let empty = client.get_membership(RemoteCustomerId::new(8).unwrap()).await;
    assert!(matches!(empty, Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn test_provider_translates_errors_and_clamps_page_size() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers/9/membership.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider = LoyaltyApiProvider::new(client_for(&server), 100);
    let page = provider.list_customers(1, 5_000, None).await.unwrap();
    assert_eq!(page.raw_len(), 0);

    let err = provider
        .get_membership(RemoteCustomerId::new(9).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}
