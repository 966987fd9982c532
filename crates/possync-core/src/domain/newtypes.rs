//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for identifiers and small enumerations shared by
//! every layer. Each newtype ensures data validity at construction time and
//! round-trips through the string form stored in SQLite.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Timestamps
// ============================================================================

/// Fixed-width UTC format used for stored timestamps and the remote
/// `updated_at_from` filter. Lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp in the canonical storage/filter form
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp produced by [`format_timestamp`] or any RFC 3339 value
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DomainError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| DomainError::InvalidTimestamp(format!("{s}: {e}")))
}

// ============================================================================
// RemoteCustomerId
// ============================================================================

/// Identifier assigned to a customer by the remote loyalty platform
///
/// Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RemoteCustomerId(i64);

impl RemoteCustomerId {
    /// Creates a new RemoteCustomerId, rejecting zero and negative values
    pub fn new(id: i64) -> Result<Self, DomainError> {
        if id <= 0 {
            return Err(DomainError::InvalidRemoteId(id.to_string()));
        }
        Ok(Self(id))
    }

    /// Returns the raw numeric identifier
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl Display for RemoteCustomerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteCustomerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<i64>()
            .map_err(|_| DomainError::InvalidRemoteId(s.to_string()))?;
        Self::new(id)
    }
}

impl TryFrom<i64> for RemoteCustomerId {
    type Error = DomainError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<RemoteCustomerId> for i64 {
    fn from(id: RemoteCustomerId) -> Self {
        id.0
    }
}

// ============================================================================
// RunId
// ============================================================================

/// Identifier of a sync run, allocated monotonically by the run log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Wraps an identifier allocated by the run log
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric identifier
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// SyncType
// ============================================================================

/// The kind of entity a sync run pulls from the remote platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Customer profiles enriched with membership data
    Customers,
    /// Sales orders with line items
    Orders,
}

impl SyncType {
    /// All sync types, in the order the scheduler starts them
    pub const ALL: [SyncType; 2] = [SyncType::Customers, SyncType::Orders];

    /// Returns the stable string form used in storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncType::Customers => "customers",
            SyncType::Orders => "orders",
        }
    }
}

impl Display for SyncType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customers" | "customer" => Ok(SyncType::Customers),
            "orders" | "order" => Ok(SyncType::Orders),
            other => Err(DomainError::UnknownSyncType(other.to_string())),
        }
    }
}

// ============================================================================
// SyncMode
// ============================================================================

/// Whether a run honours the stored checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fetch only records updated since the checkpoint (full scan if none)
    #[default]
    Incremental,
    /// Ignore the checkpoint and rescan everything
    Full,
}

impl SyncMode {
    /// Returns the stable string form used in storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::Full => "full",
        }
    }
}

impl Display for SyncMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(SyncMode::Incremental),
            "full" => Ok(SyncMode::Full),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown sync mode: {other}"
            ))),
        }
    }
}
