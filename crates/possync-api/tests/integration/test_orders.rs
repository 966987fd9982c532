//! Order listing

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use possync_api::provider::LoyaltyApiProvider;
use possync_core::ports::{ILoyaltyApi, RemoteError};

use crate::common::{client_for, mount_token};

#[tokio::test]
async fn test_list_orders_decodes_envelopes() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/orders.json"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [
                {"order": {
                    "id": 501,
                    "name": "#103295",
                    "customer": {"id": 42, "first_name": "An", "last_name": "Le", "phone": "0901"},
                    "location_id": 3,
                    "financial_status": "paid",
                    "subtotal_price": "300000",
                    "total_discounts": "50000",
                    "total_price": "250000",
                    "line_items": [
                        {"sku": "A1", "name": "Shirt", "quantity": 1, "price": 200000},
                        {"sku": "B2", "name": "Socks", "quantity": "2", "price": "50000"}
                    ],
                    "created_at": "2026-10-01T08:00:00Z",
                    "updated_at": "2026-10-01T09:00:00Z"
                }},
                {"order": {"id": 502}}
            ],
            "pagination": {"has_more": false}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client_for(&server).list_orders(1, 50, None).await.unwrap();
    assert!(!page.has_next);
    assert_eq!(page.items.len(), 2);

    let order = &page.items[0];
    assert_eq!(order.id, 501);
    assert_eq!(order.name.as_deref(), Some("#103295"));
    assert_eq!(order.subtotal_price, Some(300_000.0));
    assert_eq!(order.line_items.len(), 2);
    assert_eq!(order.line_items[1].quantity, Some(2.0));
    assert!(order.updated_at > order.created_at);

    assert_eq!(page.items[1].name, None);
}

#[tokio::test]
async fn test_orders_exhaustion_maps_to_port_error() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/orders.json"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let provider = LoyaltyApiProvider::new(client_for(&server), 100);
    let err = provider.list_orders(1, 50, None).await.unwrap_err();
    assert!(
        matches!(err, RemoteError::RetriesExhausted { attempts: 3, .. }),
        "got {err:?}"
    );
}
