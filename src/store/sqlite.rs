//! SQLite realization of the store traits, plus the dashboard-side
//! surface (list/flag notifications) and the seeding helpers tests use to
//! mutate source data between passes.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::model::{
    EntityKind, Notification, NotificationDraft, NotificationPatch, PrimaryRecord, RecordDetails,
    SaleDetails, ServiceDetails,
};
use crate::priority::Priority;
use crate::store::{MarkerStore, RecordStore};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Sale => "sales",
        EntityKind::Service => "service_subscriptions",
    }
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    let details: RecordDetails = serde_json::from_str(&row.get::<String, _>("details"))?;
    Ok(Notification {
        id: row.get("id"),
        kind: EntityKind::from_str_value(&row.get::<String, _>("entity_kind")),
        source_id: row.get("source_id"),
        days_remaining: row.get("days_remaining"),
        priority: Priority::from_str_value(&row.get::<String, _>("priority")),
        read: row.get("is_read"),
        highlighted: row.get("is_highlighted"),
        details,
        updated_at: row.get("updated_at"),
    })
}

fn sale_from_row(row: &SqliteRow) -> PrimaryRecord {
    PrimaryRecord {
        id: row.get("id"),
        expires_at: row.get("expires_at"),
        active: row.get("active"),
        details: RecordDetails::Sale(SaleDetails {
            customer_name: row.get("customer_name"),
            service_name: row.get("service_name"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            payment_method: row.get("payment_method"),
        }),
    }
}

fn service_from_row(row: &SqliteRow) -> PrimaryRecord {
    PrimaryRecord {
        id: row.get("id"),
        expires_at: row.get("expires_at"),
        active: row.get("active"),
        details: RecordDetails::Service(ServiceDetails {
            customer_name: row.get("customer_name"),
            service_name: row.get("service_name"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            billing_cycle: row.get("billing_cycle"),
            credentials: row.get("credentials"),
        }),
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    // --- dashboard side: read and flag notifications ---------------------

    /// Notifications ordered by urgency: severity first, then soonest
    /// expiration.
    pub async fn list_notifications(&self, unread_only: bool) -> Result<Vec<Notification>> {
        let filter = if unread_only { "WHERE is_read = 0" } else { "" };
        let sql = format!(
            "SELECT * FROM notifications {filter} \
             ORDER BY CASE priority \
                WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END, \
             days_remaining ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(notification_from_row).collect()
    }

    pub async fn count_unread(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE is_read = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[instrument(skip_all)]
    pub async fn mark_read(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn mark_all_read(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE is_read = 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip_all)]
    pub async fn set_highlighted(&self, id: &str, highlighted: bool) -> Result<()> {
        sqlx::query("UPDATE notifications SET is_highlighted = ? WHERE id = ?")
            .bind(highlighted)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- seeding surface: the primary CRUD side, reduced to what tests
    // --- and the demo need ----------------------------------------------

    #[instrument(skip_all)]
    pub async fn insert_sale(
        &self,
        id: &str,
        details: &SaleDetails,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sales (id, customer_name, service_name, amount, currency, payment_method, expires_at, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(id)
        .bind(&details.customer_name)
        .bind(&details.service_name)
        .bind(details.amount)
        .bind(&details.currency)
        .bind(&details.payment_method)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn insert_service(
        &self,
        id: &str,
        details: &ServiceDetails,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO service_subscriptions (id, customer_name, service_name, amount, currency, billing_cycle, credentials, expires_at, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(id)
        .bind(&details.customer_name)
        .bind(&details.service_name)
        .bind(details.amount)
        .bind(&details.currency)
        .bind(&details.billing_cycle)
        .bind(&details.credentials)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn set_active(&self, kind: EntityKind, id: &str, active: bool) -> Result<()> {
        let sql = format!("UPDATE {} SET active = ? WHERE id = ?", table(kind));
        sqlx::query(&sql).bind(active).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn set_expiration(
        &self,
        kind: EntityKind,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sql = format!("UPDATE {} SET expires_at = ? WHERE id = ?", table(kind));
        sqlx::query(&sql).bind(expires_at).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn delete_record(&self, kind: EntityKind, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table(kind));
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn expiring_records(
        &self,
        kind: EntityKind,
        horizon: NaiveDate,
    ) -> Result<Vec<PrimaryRecord>> {
        let sql = format!(
            "SELECT * FROM {} \
             WHERE active = 1 AND expires_at IS NOT NULL AND date(expires_at) <= date(?) \
             ORDER BY date(expires_at) ASC",
            table(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(horizon.to_string())
            .fetch_all(&self.pool)
            .await?;
        let from_row: fn(&SqliteRow) -> PrimaryRecord = match kind {
            EntityKind::Sale => sale_from_row,
            EntityKind::Service => service_from_row,
        };
        Ok(rows.iter().map(from_row).collect())
    }

    async fn notifications_for_source(
        &self,
        kind: EntityKind,
        source_id: &str,
    ) -> Result<Vec<Notification>> {
        // rowid order: the oldest entry stays canonical under duplicate
        // collapse.
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE entity_kind = ? AND source_id = ? ORDER BY rowid ASC",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn notifications(&self, kind: EntityKind) -> Result<Vec<Notification>> {
        let rows = sqlx::query("SELECT * FROM notifications WHERE entity_kind = ? ORDER BY rowid ASC")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    #[instrument(skip_all)]
    async fn insert_notification(&self, draft: &NotificationDraft) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO notifications \
             (id, entity_kind, source_id, days_remaining, priority, is_read, is_highlighted, details, updated_at) \
             VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(&id)
        .bind(draft.kind.as_str())
        .bind(&draft.source_id)
        .bind(draft.days_remaining)
        .bind(draft.priority.as_str())
        .bind(serde_json::to_string(&draft.details)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip_all)]
    async fn update_notification(&self, id: &str, patch: &NotificationPatch) -> Result<()> {
        sqlx::query(
            "UPDATE notifications \
             SET days_remaining = ?, priority = ?, is_read = ?, details = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(patch.days_remaining)
        .bind(patch.priority.as_str())
        .bind(patch.read)
        .bind(serde_json::to_string(&patch.details)?)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn delete_notification(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for SqliteStore {
    async fn marker(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM sync_markers WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    #[instrument(skip_all)]
    async fn set_marker(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_markers (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn clear_marker(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_markers WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn sale_details() -> SaleDetails {
        SaleDetails {
            customer_name: "Ana".into(),
            service_name: "Netflix Premium".into(),
            amount: 15.99,
            currency: "USD".into(),
            payment_method: Some("Zelle".into()),
        }
    }

    fn draft(source_id: &str) -> NotificationDraft {
        NotificationDraft {
            kind: EntityKind::Sale,
            source_id: source_id.into(),
            days_remaining: 5,
            priority: Priority::Medium,
            details: RecordDetails::Sale(sale_details()),
        }
    }

    #[tokio::test]
    async fn patch_never_touches_highlighted() {
        let store = setup_store().await;
        let id = store.insert_notification(&draft("s1")).await.unwrap();
        store.set_highlighted(&id, true).await.unwrap();
        store.mark_read(&id).await.unwrap();

        let patch = NotificationPatch {
            days_remaining: 2,
            priority: Priority::High,
            read: false,
            details: RecordDetails::Sale(sale_details()),
        };
        store.update_notification(&id, &patch).await.unwrap();

        let found = store
            .notifications_for_source(EntityKind::Sale, "s1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].highlighted);
        assert!(!found[0].read);
        assert_eq!(found[0].days_remaining, 2);
        assert_eq!(found[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn duplicates_are_seedable_and_ordered_oldest_first() {
        let store = setup_store().await;
        let first = store.insert_notification(&draft("s1")).await.unwrap();
        let second = store.insert_notification(&draft("s1")).await.unwrap();

        let found = store
            .notifications_for_source(EntityKind::Sale, "s1")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, first);
        assert_eq!(found[1].id, second);
    }

    #[tokio::test]
    async fn expiring_query_filters_by_horizon_and_activity() {
        let store = setup_store().await;
        let now = Utc::now();
        store
            .insert_sale("due", &sale_details(), Some(now + Duration::days(2)))
            .await
            .unwrap();
        store
            .insert_sale("overdue", &sale_details(), Some(now - Duration::days(3)))
            .await
            .unwrap();
        store
            .insert_sale("far", &sale_details(), Some(now + Duration::days(30)))
            .await
            .unwrap();
        store
            .insert_sale("dateless", &sale_details(), None)
            .await
            .unwrap();
        store
            .insert_sale("inactive", &sale_details(), Some(now + Duration::days(1)))
            .await
            .unwrap();
        store
            .set_active(EntityKind::Sale, "inactive", false)
            .await
            .unwrap();

        let horizon = chrono::Local::now().date_naive() + Duration::days(7);
        let records = store
            .expiring_records(EntityKind::Sale, horizon)
            .await
            .unwrap();
        let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["due", "overdue"]);
    }

    #[tokio::test]
    async fn read_flags_and_unread_count() {
        let store = setup_store().await;
        let a = store.insert_notification(&draft("s1")).await.unwrap();
        let _b = store.insert_notification(&draft("s2")).await.unwrap();
        assert_eq!(store.count_unread().await.unwrap(), 2);

        store.mark_read(&a).await.unwrap();
        assert_eq!(store.count_unread().await.unwrap(), 1);
        assert_eq!(store.list_notifications(true).await.unwrap().len(), 1);

        let marked = store.mark_all_read().await.unwrap();
        assert_eq!(marked, 1);
        assert_eq!(store.count_unread().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn marker_round_trip() {
        let store = setup_store().await;
        assert_eq!(store.marker("k").await.unwrap(), None);
        store.set_marker("k", "2026-08-27").await.unwrap();
        assert_eq!(store.marker("k").await.unwrap().as_deref(), Some("2026-08-27"));
        store.set_marker("k", "2026-08-28").await.unwrap();
        assert_eq!(store.marker("k").await.unwrap().as_deref(), Some("2026-08-28"));
        store.clear_marker("k").await.unwrap();
        assert_eq!(store.marker("k").await.unwrap(), None);
    }
}
