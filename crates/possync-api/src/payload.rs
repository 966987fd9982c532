//! Wire-format decoding for loyalty platform responses
//!
//! The platform is loose about its JSON: numbers arrive as strings, list
//! items may or may not be wrapped in a `{"customer": {...}}` envelope, and
//! pagination hints use several spellings. Decoding here is lenient about
//! representation but strict about identity: an item without a usable `id`
//! (or with an unreadable timestamp) is reported as a [`MalformedRecord`]
//! instead of failing the whole page.

use chrono::{DateTime, Utc};
use possync_core::domain::parse_timestamp;
use possync_core::ports::{
    MalformedRecord, Page, RemoteCustomer, RemoteLineItem, RemoteMembership, RemoteOrder,
    RemoteOrderCustomer,
};
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

use crate::ApiError;

/// Keys under which customer list responses carry their items
const CUSTOMER_LIST_KEYS: &[&str] = &["customers", "data", "items"];
/// Keys under which order list responses carry their items
const ORDER_LIST_KEYS: &[&str] = &["orders", "data", "items"];
/// Spellings of the "more pages follow" flag
const HAS_NEXT_KEYS: &[&str] = &["has_more", "hasMore", "has_next", "hasNext"];

// ============================================================================
// Lenient field decoders
// ============================================================================

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_i64(d)?.and_then(|n| u32::try_from(n).ok()))
}

fn lenient_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    Ok(lenient_i64(d)?.and_then(|n| i32::try_from(n).ok()))
}

fn required_id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_i64(d)?.ok_or_else(|| de::Error::custom("id is not an integer"))
}

/// Empty strings count as absent; anything else must parse
fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(s) if !s.trim().is_empty() => parse_timestamp(&s).map(Some).map_err(de::Error::custom),
        _ => Ok(None),
    }
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireCustomer {
    #[serde(deserialize_with = "required_id")]
    id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    gender: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    birthday_day: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    birthday_month: Option<u32>,
    #[serde(default, deserialize_with = "lenient_i32")]
    birthday_year: Option<i32>,
    #[serde(default, deserialize_with = "lenient_string")]
    tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    physical_card_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    points: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    exp_points: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_spending: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_points: Option<f64>,
    #[serde(default, deserialize_with = "timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

impl From<WireCustomer> for RemoteCustomer {
    fn from(w: WireCustomer) -> Self {
        Self {
            id: w.id,
            first_name: w.first_name,
            last_name: w.last_name,
            phone: w.phone,
            email: w.email,
            gender: w.gender,
            birthday_day: w.birthday_day,
            birthday_month: w.birthday_month,
            birthday_year: w.birthday_year,
            tags: w.tags,
            physical_card_code: w.physical_card_code,
            points: w.points,
            exp_points: w.exp_points,
            total_spending: w.total_spending,
            total_points: w.total_points,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMembership {
    #[serde(default, deserialize_with = "lenient_string")]
    level_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    used_points: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_points: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireOrderCustomer {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLineItem {
    #[serde(default, deserialize_with = "lenient_string")]
    sku: Option<String>,
    #[serde(default, alias = "title", deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    #[serde(deserialize_with = "required_id")]
    id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default)]
    customer: Option<WireOrderCustomer>,
    #[serde(default, deserialize_with = "lenient_i64")]
    location_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    financial_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    subtotal_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_discounts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    shipment_fee: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    note: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    line_items: Vec<WireLineItem>,
    #[serde(default, deserialize_with = "timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

impl From<WireOrder> for RemoteOrder {
    fn from(w: WireOrder) -> Self {
        Self {
            id: w.id,
            name: w.name,
            customer: w.customer.map(|c| RemoteOrderCustomer {
                id: c.id,
                first_name: c.first_name,
                last_name: c.last_name,
                phone: c.phone,
            }),
            location_id: w.location_id,
            financial_status: w.financial_status,
            subtotal_price: w.subtotal_price,
            total_discounts: w.total_discounts,
            shipment_fee: w.shipment_fee,
            total_price: w.total_price,
            note: w.note,
            line_items: w
                .line_items
                .into_iter()
                .map(|l| RemoteLineItem {
                    sku: l.sku,
                    name: l.name,
                    quantity: l.quantity,
                    price: l.price,
                })
                .collect(),
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

// ============================================================================
// Page decoding
// ============================================================================

/// Decodes one page of `GET /customers.json`
pub fn parse_customer_page(body: Value) -> Result<Page<RemoteCustomer>, ApiError> {
    parse_page::<WireCustomer, _>(body, CUSTOMER_LIST_KEYS, "customer")
}

/// Decodes one page of `GET /orders.json`
pub fn parse_order_page(body: Value) -> Result<Page<RemoteOrder>, ApiError> {
    parse_page::<WireOrder, _>(body, ORDER_LIST_KEYS, "order")
}

/// Decodes `GET /customers/{id}/membership.json`
///
/// Returns `None` when the body carries no membership object.
pub fn parse_membership(body: Value) -> Result<Option<RemoteMembership>, ApiError> {
    let membership = match body {
        Value::Object(mut map) => map.remove("membership"),
        _ => {
            return Err(ApiError::InvalidResponse(
                "membership response is not a JSON object".into(),
            ))
        }
    };

    match membership {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let wire: WireMembership = serde_json::from_value(value)
                .map_err(|e| ApiError::InvalidResponse(format!("membership: {e}")))?;
            Ok(Some(RemoteMembership {
                level_name: wire.level_name,
                used_points: wire.used_points,
                total_points: wire.total_points,
            }))
        }
    }
}

fn parse_page<W, T>(body: Value, list_keys: &[&str], envelope: &str) -> Result<Page<T>, ApiError>
where
    W: DeserializeOwned + Into<T>,
{
    let has_next = has_next(&body);
    let raw_items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let found = list_keys.iter().find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            });
            found.ok_or_else(|| {
                ApiError::InvalidResponse(format!(
                    "response has no item list (expected one of: {})",
                    list_keys.join(", ")
                ))
            })?
        }
        _ => {
            return Err(ApiError::InvalidResponse(
                "list response is neither an object nor an array".into(),
            ))
        }
    };

    let mut page = Page {
        items: Vec::with_capacity(raw_items.len()),
        malformed: Vec::new(),
        has_next,
    };

    for (index, raw) in raw_items.into_iter().enumerate() {
        let item = unwrap_envelope(raw, envelope);
        let key = item_key(&item, index);
        match serde_json::from_value::<W>(item) {
            Ok(wire) => page.items.push(wire.into()),
            Err(e) => page.malformed.push(MalformedRecord {
                key,
                reason: e.to_string(),
            }),
        }
    }

    Ok(page)
}

/// `{"customer": {...}}` becomes `{...}`; anything else is left as is
fn unwrap_envelope(item: Value, envelope: &str) -> Value {
    match item {
        Value::Object(mut map)
            if map.len() == 1 && map.get(envelope).is_some_and(Value::is_object) =>
        {
            map.remove(envelope).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn item_key(item: &Value, index: usize) -> String {
    match item.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => format!("item#{}", index + 1),
    }
}

/// Reads the pagination hint from `pagination`, `meta` or the top level
///
/// Besides the boolean flags, a `current_page`/`total_pages` pair is honored.
/// Absent hints mean "no more pages"; the caller still checks page fullness.
fn has_next(body: &Value) -> bool {
    let scopes = [body.get("pagination"), body.get("meta"), Some(body)];
    for scope in scopes.into_iter().flatten() {
        for key in HAS_NEXT_KEYS {
            if let Some(flag) = scope.get(*key).and_then(Value::as_bool) {
                return flag;
            }
        }
        let current = scope
            .get("current_page")
            .or_else(|| scope.get("page"))
            .and_then(Value::as_u64);
        let total = scope.get("total_pages").and_then(Value::as_u64);
        if let (Some(current), Some(total)) = (current, total) {
            return current < total;
        }
    }
    false
}
