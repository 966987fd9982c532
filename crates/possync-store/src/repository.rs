//! SQLite implementation of IRecordStore
//!
//! Customers and orders are upserted on their natural key (remote id and
//! order code). Each batch is one transaction; each record inside it runs
//! under its own SAVEPOINT so a constraint violation rejects that record
//! alone while the rest of the batch commits.
//!
//! ## Type Mapping
//!
//! | Domain Type       | SQL Type | Strategy                                   |
//! |-------------------|----------|--------------------------------------------|
//! | RemoteCustomerId  | INTEGER  | `.get()` / `RemoteCustomerId::new()`       |
//! | DateTime<Utc>     | TEXT     | fixed-width `format_timestamp()`           |
//! | tier label        | TEXT     | NULL when empty                            |
//! | OrderLine[]       | TEXT     | serde_json array                           |
//! | amounts, points   | REAL     | f64                                        |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use possync_core::domain::{
    format_timestamp, parse_timestamp, LocalCustomerRecord, LocalOrderRecord, OrderLine,
    RemoteCustomerId, StoredCustomer, SyncRecord,
};
use possync_core::ports::{BatchResult, IRecordStore, WriteFailure};

use crate::StoreError;

/// SQLite-based implementation of the storage ports
///
/// One struct backs `IRecordStore`, `ICheckpointStore` and `IRunLog`; the
/// latter two live in [`crate::run_log`].
#[derive(Clone)]
pub struct SqliteSyncStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteSyncStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_batch<R: UpsertRow>(&self, batch: &[R]) -> Result<BatchResult<R>, StoreError> {
        let mut result = BatchResult::default();
        if batch.is_empty() {
            return Ok(result);
        }

        let now = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for record in batch {
            sqlx::query("SAVEPOINT record_write").execute(&mut *tx).await?;
            match record.upsert(&mut *tx, &now).await {
                Ok(created) => {
                    sqlx::query("RELEASE SAVEPOINT record_write")
                        .execute(&mut *tx)
                        .await?;
                    if created {
                        result.created += 1;
                    } else {
                        result.updated += 1;
                    }
                }
                Err(WriteError::Rejected(reason)) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT record_write")
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("RELEASE SAVEPOINT record_write")
                        .execute(&mut *tx)
                        .await?;
                    tracing::warn!(key = %record.key(), %reason, "Record rejected by store");
                    result.failures.push(WriteFailure {
                        record: record.clone(),
                        reason,
                    });
                }
                // Dropping the transaction rolls the whole batch back
                Err(WriteError::Fatal(e)) => return Err(e.into()),
            }
        }

        tx.commit().await?;

        tracing::debug!(
            created = result.created,
            updated = result.updated,
            failed = result.failures.len(),
            "Committed batch"
        );
        Ok(result)
    }
}

// ============================================================================
// Per-record writes
// ============================================================================

/// Outcome of writing a single record
enum WriteError {
    /// The record itself is unacceptable; siblings are unaffected
    Rejected(String),
    /// The database is unusable; the batch must be abandoned
    Fatal(sqlx::Error),
}

impl From<sqlx::Error> for WriteError {
    fn from(e: sqlx::Error) -> Self {
        let record_level = match &e {
            sqlx::Error::Database(db) => matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ),
            _ => false,
        };
        if record_level {
            WriteError::Rejected(e.to_string())
        } else {
            WriteError::Fatal(e)
        }
    }
}

/// A record type that knows how to upsert itself; returns true when created
#[async_trait]
trait UpsertRow: SyncRecord {
    async fn upsert(&self, conn: &mut SqliteConnection, now: &str) -> Result<bool, WriteError>;
}

fn optional_timestamp(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(format_timestamp)
}

#[async_trait]
impl UpsertRow for LocalCustomerRecord {
    async fn upsert(&self, conn: &mut SqliteConnection, now: &str) -> Result<bool, WriteError> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM customers WHERE remote_id = ?")
                .bind(self.remote_id.get())
                .fetch_optional(&mut *conn)
                .await?;

        let tier_label = (!self.tier_label.is_empty()).then(|| self.tier_label.clone());

        sqlx::query(
            "INSERT INTO customers \
             (remote_id, last_name, first_name, phone, email, gender, \
              birthday_day, birthday_month, birthday_year, tags, physical_card_code, \
              points, exp_points, total_spending, total_points, tier_label, used_points, \
              remote_created_at, remote_updated_at, first_synced_at, last_synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(remote_id) DO UPDATE SET \
              last_name = excluded.last_name, \
              first_name = excluded.first_name, \
              phone = excluded.phone, \
              email = excluded.email, \
              gender = excluded.gender, \
              birthday_day = excluded.birthday_day, \
              birthday_month = excluded.birthday_month, \
              birthday_year = excluded.birthday_year, \
              tags = excluded.tags, \
              physical_card_code = excluded.physical_card_code, \
              points = excluded.points, \
              exp_points = excluded.exp_points, \
              total_spending = excluded.total_spending, \
              total_points = excluded.total_points, \
              tier_label = excluded.tier_label, \
              used_points = excluded.used_points, \
              remote_created_at = excluded.remote_created_at, \
              remote_updated_at = excluded.remote_updated_at, \
              last_synced_at = excluded.last_synced_at",
        )
        .bind(self.remote_id.get())
        .bind(&self.last_name)
        .bind(&self.first_name)
        .bind(&self.phone)
        .bind(&self.email)
        .bind(&self.gender)
        .bind(self.birthday_day.map(i64::from))
        .bind(self.birthday_month.map(i64::from))
        .bind(self.birthday_year.map(i64::from))
        .bind(&self.tags)
        .bind(&self.physical_card_code)
        .bind(self.points)
        .bind(self.exp_points)
        .bind(self.total_spending)
        .bind(self.total_points)
        .bind(tier_label)
        .bind(self.used_points)
        .bind(optional_timestamp(self.remote_created_at))
        .bind(optional_timestamp(self.remote_updated_at))
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(existing.is_none())
    }
}

#[async_trait]
impl UpsertRow for LocalOrderRecord {
    async fn upsert(&self, conn: &mut SqliteConnection, now: &str) -> Result<bool, WriteError> {
        let lines = serde_json::to_string(&self.lines)
            .map_err(|e| WriteError::Rejected(format!("Failed to serialize lines: {e}")))?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE code = ?")
            .bind(&self.code)
            .fetch_optional(&mut *conn)
            .await?;

        sqlx::query(
            "INSERT INTO orders \
             (code, remote_id, customer_remote_id, customer_phone, customer_name, \
              location_id, financial_status, subtotal, discount, shipment_fee, total, \
              note, lines, remote_created_at, remote_updated_at, first_synced_at, last_synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(code) DO UPDATE SET \
              remote_id = excluded.remote_id, \
              customer_remote_id = excluded.customer_remote_id, \
              customer_phone = excluded.customer_phone, \
              customer_name = excluded.customer_name, \
              location_id = excluded.location_id, \
              financial_status = excluded.financial_status, \
              subtotal = excluded.subtotal, \
              discount = excluded.discount, \
              shipment_fee = excluded.shipment_fee, \
              total = excluded.total, \
              note = excluded.note, \
              lines = excluded.lines, \
              remote_created_at = excluded.remote_created_at, \
              remote_updated_at = excluded.remote_updated_at, \
              last_synced_at = excluded.last_synced_at",
        )
        .bind(&self.code)
        .bind(self.remote_id)
        .bind(self.customer_remote_id.map(|id| id.get()))
        .bind(&self.customer_phone)
        .bind(&self.customer_name)
        .bind(self.location_id)
        .bind(&self.financial_status)
        .bind(self.subtotal)
        .bind(self.discount)
        .bind(self.shipment_fee)
        .bind(self.total)
        .bind(&self.note)
        .bind(&lines)
        .bind(optional_timestamp(self.remote_created_at))
        .bind(optional_timestamp(self.remote_updated_at))
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(existing.is_none())
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp(s).map_err(|e| StoreError::SerializationError(e.to_string()))
}

pub(crate) fn parse_optional_datetime(
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn customer_from_row(row: &SqliteRow) -> Result<StoredCustomer, StoreError> {
    let remote_id: i64 = row.try_get("remote_id")?;
    let remote_id = RemoteCustomerId::new(remote_id)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    let small = |col: &str| -> Result<Option<u32>, StoreError> {
        let v: Option<i64> = row.try_get(col)?;
        Ok(v.and_then(|v| u32::try_from(v).ok()))
    };
    let birthday_year: Option<i64> = row.try_get("birthday_year")?;

    let record = LocalCustomerRecord {
        remote_id,
        last_name: row.try_get("last_name")?,
        first_name: row.try_get("first_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        gender: row.try_get("gender")?,
        birthday_day: small("birthday_day")?,
        birthday_month: small("birthday_month")?,
        birthday_year: birthday_year.and_then(|y| i32::try_from(y).ok()),
        tags: row.try_get("tags")?,
        physical_card_code: row.try_get("physical_card_code")?,
        points: row.try_get("points")?,
        exp_points: row.try_get("exp_points")?,
        total_spending: row.try_get("total_spending")?,
        total_points: row.try_get("total_points")?,
        tier_label: row
            .try_get::<Option<String>, _>("tier_label")?
            .unwrap_or_default(),
        used_points: row.try_get("used_points")?,
        remote_created_at: parse_optional_datetime(row.try_get("remote_created_at")?)?,
        remote_updated_at: parse_optional_datetime(row.try_get("remote_updated_at")?)?,
    };

    Ok(StoredCustomer {
        id: row.try_get("id")?,
        record,
        first_synced_at: parse_datetime(&row.try_get::<String, _>("first_synced_at")?)?,
        last_synced_at: parse_datetime(&row.try_get::<String, _>("last_synced_at")?)?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<LocalOrderRecord, StoreError> {
    let lines_json: String = row.try_get("lines")?;
    let lines: Vec<OrderLine> = serde_json::from_str(&lines_json).map_err(|e| {
        StoreError::SerializationError(format!("Invalid order lines JSON: {e}"))
    })?;
    let customer_remote_id: Option<i64> = row.try_get("customer_remote_id")?;

    Ok(LocalOrderRecord {
        code: row.try_get("code")?,
        remote_id: row.try_get("remote_id")?,
        customer_remote_id: customer_remote_id.and_then(|id| RemoteCustomerId::new(id).ok()),
        customer_phone: row.try_get("customer_phone")?,
        customer_name: row.try_get("customer_name")?,
        location_id: row.try_get("location_id")?,
        financial_status: row.try_get("financial_status")?,
        subtotal: row.try_get("subtotal")?,
        discount: row.try_get("discount")?,
        shipment_fee: row.try_get("shipment_fee")?,
        total: row.try_get("total")?,
        note: row.try_get("note")?,
        lines,
        remote_created_at: parse_optional_datetime(row.try_get("remote_created_at")?)?,
        remote_updated_at: parse_optional_datetime(row.try_get("remote_updated_at")?)?,
    })
}

// ============================================================================
// IRecordStore implementation
// ============================================================================

#[async_trait]
impl IRecordStore for SqliteSyncStore {
    async fn upsert_customers(
        &self,
        batch: &[LocalCustomerRecord],
    ) -> anyhow::Result<BatchResult<LocalCustomerRecord>> {
        Ok(self.upsert_batch(batch).await?)
    }

    async fn upsert_orders(
        &self,
        batch: &[LocalOrderRecord],
    ) -> anyhow::Result<BatchResult<LocalOrderRecord>> {
        Ok(self.upsert_batch(batch).await?)
    }

    async fn get_customer(
        &self,
        remote_id: RemoteCustomerId,
    ) -> anyhow::Result<Option<StoredCustomer>> {
        let row = sqlx::query("SELECT * FROM customers WHERE remote_id = ?")
            .bind(remote_id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(customer_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn find_customers_by_phone(&self, phone: &str) -> anyhow::Result<Vec<StoredCustomer>> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT * FROM customers WHERE phone = ? ORDER BY remote_id")
            .bind(phone)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| customer_from_row(r).map_err(anyhow::Error::from))
            .collect()
    }

    async fn get_order(&self, code: &str) -> anyhow::Result<Option<LocalOrderRecord>> {
        let row = sqlx::query("SELECT * FROM orders WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(order_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn count_customers(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_orders(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
