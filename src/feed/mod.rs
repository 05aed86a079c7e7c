// ABOUTME: Remote change feed abstractions: change types, pages, records, watermarks
// ABOUTME: Defines the ChangeFeedClient and TableCatalog seams the engine consumes

pub mod client;
pub mod models;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub use client::HttpChangeFeed;
pub use models::{ChangeRecord, Page, PageStatus};

/// Kind of change a phase pulls from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

impl ChangeType {
    /// Phase order within a table.
    pub const ALL: [ChangeType; 3] = [ChangeType::Added, ChangeType::Updated, ChangeType::Deleted];

    /// Web service end point serving this kind of change.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ChangeType::Added => "added_rows",
            ChangeType::Updated => "updated_rows",
            ChangeType::Deleted => "deleted_rows",
        }
    }

    /// Progress text shown while the phase is running.
    pub fn description(&self) -> &'static str {
        match self {
            ChangeType::Added => "retrieving new records...",
            ChangeType::Updated => "retrieving updated records...",
            ChangeType::Deleted => "retrieving deleted rows...",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point in time below which remote changes are assumed to be applied locally.
///
/// The server only understands whole seconds; millisecond precision is kept
/// so the persisted value round-trips exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Nothing has been synchronised yet: ask for everything.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::default())
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Milliseconds since the Unix epoch. Out-of-range values clamp to the epoch.
    pub fn from_millis(millis: i64) -> Self {
        match Utc.timestamp_millis_opt(millis).single() {
            Some(at) => Self(at),
            None => Self::epoch(),
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Value sent to the server as the `time` parameter.
    pub fn as_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_epoch(&self) -> bool {
        self.as_millis() == 0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// Source of paged change sets.
///
/// `Ok(None)` means the feed wants the whole run abandoned; a page with
/// `PageStatus::Failure` only ends the current phase. Errors are reserved
/// for transport and decoding problems.
#[async_trait]
pub trait ChangeFeedClient: Send + Sync {
    async fn fetch_page(
        &self,
        change_type: ChangeType,
        table: &str,
        since: Watermark,
        offset: usize,
    ) -> Result<Option<Page>, SyncError>;
}

/// Source of the ordered list of tables to synchronise.
///
/// Never fails: an unreachable or confused catalog yields an empty list and
/// the caller decides what zero tables means.
#[async_trait]
pub trait TableCatalog: Send + Sync {
    async fn list_tables(&self) -> Vec<String>;
}

#[async_trait]
impl<T: ChangeFeedClient + ?Sized> ChangeFeedClient for std::sync::Arc<T> {
    async fn fetch_page(
        &self,
        change_type: ChangeType,
        table: &str,
        since: Watermark,
        offset: usize,
    ) -> Result<Option<Page>, SyncError> {
        (**self).fetch_page(change_type, table, since, offset).await
    }
}

#[async_trait]
impl<T: TableCatalog + ?Sized> TableCatalog for std::sync::Arc<T> {
    async fn list_tables(&self) -> Vec<String> {
        (**self).list_tables().await
    }
}
