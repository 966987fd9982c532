//! Shared helpers for loyalty platform integration tests

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use possync_api::auth::{TokenCredentials, TokenManager};
use possync_api::client::{LoyaltyClient, RetryPolicy};

pub const TOKEN_PATH: &str = "/oauth/token";

pub fn credentials(server: &MockServer) -> TokenCredentials {
    TokenCredentials {
        token_url: format!("{}{}", server.uri(), TOKEN_PATH),
        client_id: "test-client".into(),
        client_secret: Some("test-secret".into()),
        username: "ops@example.test".into(),
        password: "hunter2".into(),
        scopes: vec![],
        max_lifetime: chrono::Duration::days(30),
        request_timeout: Duration::from_secs(5),
    }
}

/// Fast retry policy so failure tests finish in milliseconds
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// A client pointed at the mock server, without rate limiting
pub fn client_for(server: &MockServer) -> LoyaltyClient {
    let tokens = Arc::new(TokenManager::new(credentials(server)).expect("token manager"));
    LoyaltyClient::new(server.uri(), tokens, Duration::from_secs(5))
        .expect("client")
        .with_retry_policy(fast_retry(3))
}

pub fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600
    }))
}

/// Mounts a token endpoint that always issues `token`
pub async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .respond_with(token_response(token))
        .mount(server)
        .await;
}

pub fn customer_json(id: i64, updated_at: &str) -> Value {
    json!({
        "customer": {
            "id": id,
            "first_name": format!("First{id}"),
            "last_name": "Nguyen",
            "phone": format!("09000000{id:02}"),
            "points": 10,
            "total_points": 100,
            "updated_at": updated_at
        }
    })
}
