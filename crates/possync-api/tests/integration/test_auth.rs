//! Token acquisition, caching and 401 handling

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use possync_api::auth::TokenManager;
use possync_api::ApiError;

use crate::common::{client_for, credentials, mount_token, token_response, TOKEN_PATH};

#[tokio::test]
async fn test_token_request_uses_password_grant_and_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=ops%40example.test"))
        .and(body_string_contains("client_secret=test-secret"))
        .respond_with(token_response("tok-1"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = TokenManager::new(credentials(&server)).unwrap();
    let first = manager.token().await.unwrap();
    let second = manager.token().await.unwrap();

    assert_eq!(first.secret(), "tok-1");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_token_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-shared"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = std::sync::Arc::new(TokenManager::new(credentials(&server)).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.token().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().secret(), "tok-shared");
    }
}

#[tokio::test]
async fn test_requests_carry_token_scheme_header() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(header("Authorization", "TOKEN tok-1"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client.list_customers(1, 10, None).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-old"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-new"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(header("Authorization", "TOKEN tok-old"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .and(header("Authorization", "TOKEN tok-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "customers": [{"customer": {"id": 1}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client.list_customers(1, 10, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_second_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("tok-any"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.list_customers(1, 10, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)), "got {err:?}");
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "bad password"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.list_customers(1, 10, None).await.unwrap_err();
    assert!(matches!(err, ApiError::AuthFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_token_endpoint_outage_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/customers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customers": []})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.list_customers(1, 10, None).await.is_ok());
}
