//! Trait seams over the document store. The engine only ever sees these
//! two surfaces; everything else on `SqliteStore` belongs to the dashboard
//! side.
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::{EntityKind, Notification, NotificationDraft, NotificationPatch, PrimaryRecord};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Read/write surface the reconciliation engine needs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Active primary records whose expiration date falls on or before
    /// `horizon`. Overdue records satisfy this predicate too, so one query
    /// covers both. Empty result is not an error.
    async fn expiring_records(
        &self,
        kind: EntityKind,
        horizon: NaiveDate,
    ) -> Result<Vec<PrimaryRecord>>;

    /// Live notifications referencing one source record, oldest first.
    async fn notifications_for_source(
        &self,
        kind: EntityKind,
        source_id: &str,
    ) -> Result<Vec<Notification>>;

    /// Every live notification of one kind, regardless of horizon.
    async fn notifications(&self, kind: EntityKind) -> Result<Vec<Notification>>;

    async fn insert_notification(&self, draft: &NotificationDraft) -> Result<String>;

    async fn update_notification(&self, id: &str, patch: &NotificationPatch) -> Result<()>;

    async fn delete_notification(&self, id: &str) -> Result<()>;
}

/// Persisted last-run marker, date-granular, keyed by a fixed name.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn marker(&self, key: &str) -> Result<Option<String>>;

    async fn set_marker(&self, key: &str, value: &str) -> Result<()>;

    async fn clear_marker(&self, key: &str) -> Result<()>;
}
