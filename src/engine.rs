//! Reconciliation engine: one pass derives the expiration-notification
//! collection from the primary records, heals duplicates, and collects
//! orphans. Per-record work runs sequentially so write ordering stays
//! deterministic for duplicate detection.
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, instrument, warn};

use crate::gate::SchedulerGate;
use crate::model::{EntityKind, Notification, NotificationDraft, NotificationPatch, PrimaryRecord};
use crate::priority::Priority;
use crate::store::RecordStore;

/// How a `sync` call terminated.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The daily marker says a pass already ran today.
    AlreadySynced,
    /// Another pass holds the single-flight lock.
    InFlight,
    Completed(SyncReport),
}

/// Counters for one completed pass. Observability signals, not errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub skipped_no_expiry: u32,
    pub failed: u32,
    pub orphans_removed: u32,
    /// True when per-record failures caused the daily marker to be
    /// cleared so the next trigger retries the whole pass.
    pub marker_rolled_back: bool,
}

enum RecordOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    gate: SchedulerGate,
    horizon_days: i64,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, gate: SchedulerGate, horizon_days: i64) -> Self {
        Self {
            store,
            gate,
            horizon_days,
        }
    }

    /// One reconciliation pass. Idempotent and safe to call redundantly:
    /// the daily marker and the single-flight lock drop duplicate
    /// triggers. The only fatal path is the fetch stage; everything after
    /// it degrades per record.
    #[instrument(skip(self))]
    pub async fn sync(&self, force: bool) -> Result<SyncOutcome> {
        if !force && !self.gate.should_run().await? {
            return Ok(SyncOutcome::AlreadySynced);
        }
        let Some(_permit) = self.gate.try_acquire() else {
            return Ok(SyncOutcome::InFlight);
        };
        // Marked before fetching so late overlapping triggers short-circuit
        // while this pass is in flight; rolled back on failure.
        self.gate.mark_run().await?;

        let today = Local::now().date_naive();
        let horizon = today + Duration::days(self.horizon_days);
        let (sales, services) = match self.fetch_working_set(horizon).await {
            Ok(sets) => sets,
            Err(err) => {
                if let Err(roll) = self.gate.clear_run().await {
                    warn!(?roll, "failed to roll back sync marker after fetch error");
                }
                return Err(err);
            }
        };
        info!(
            sales = sales.len(),
            services = services.len(),
            "fetched working set"
        );

        let (collapse_tx, mut collapse_rx) = mpsc::unbounded_channel();
        let mut report = SyncReport::default();
        for record in sales.iter().chain(services.iter()) {
            match self.reconcile(record, force, today, &collapse_tx).await {
                Ok(RecordOutcome::Created) => report.created += 1,
                Ok(RecordOutcome::Updated) => report.updated += 1,
                Ok(RecordOutcome::Unchanged) => report.unchanged += 1,
                Ok(RecordOutcome::Skipped) => report.skipped_no_expiry += 1,
                Err(err) => {
                    warn!(
                        ?err,
                        kind = record.kind().as_str(),
                        id = %record.id,
                        "record reconciliation failed; continuing"
                    );
                    report.failed += 1;
                }
            }
        }

        self.collect_orphans(EntityKind::Sale, &sales, &mut report).await;
        self.collect_orphans(EntityKind::Service, &services, &mut report)
            .await;

        // Collapse tasks run detached; the channel closes once they all
        // finish, so draining here never races a late delete.
        drop(collapse_tx);
        while let Some(err) = collapse_rx.recv().await {
            warn!(?err, "duplicate collapse failed");
        }

        if report.failed > 0 {
            match self.gate.clear_run().await {
                Ok(()) => report.marker_rolled_back = true,
                Err(err) => {
                    warn!(?err, "failed to roll back sync marker after partial failures")
                }
            }
        }
        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped_no_expiry,
            failed = report.failed,
            orphans_removed = report.orphans_removed,
            rolled_back = report.marker_rolled_back,
            "reconciliation pass finished"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Clears the daily marker and the single-flight flag, then runs a
    /// forced pass. The manual "refresh" entry point.
    pub async fn force_sync(&self) -> Result<SyncOutcome> {
        self.gate.clear_run().await?;
        self.gate.force_release();
        self.sync(true).await
    }

    async fn fetch_working_set(
        &self,
        horizon: NaiveDate,
    ) -> Result<(Vec<PrimaryRecord>, Vec<PrimaryRecord>)> {
        let sales = self
            .store
            .expiring_records(EntityKind::Sale, horizon)
            .await
            .context("fetching expiring sales")?;
        let services = self
            .store
            .expiring_records(EntityKind::Service, horizon)
            .await
            .context("fetching expiring service subscriptions")?;
        Ok((sales, services))
    }

    async fn reconcile(
        &self,
        record: &PrimaryRecord,
        force: bool,
        today: NaiveDate,
        collapse_errors: &UnboundedSender<anyhow::Error>,
    ) -> Result<RecordOutcome> {
        let kind = record.kind();
        let Some(expires_at) = record.expires_at else {
            warn!(
                kind = kind.as_str(),
                id = %record.id,
                "record has no expiration date; skipping"
            );
            return Ok(RecordOutcome::Skipped);
        };
        let days_remaining = (expires_at.with_timezone(&Local).date_naive() - today).num_days();
        let priority = Priority::for_days(days_remaining);

        let mut matches = self.store.notifications_for_source(kind, &record.id).await?;
        if matches.len() > 1 {
            let extras = matches.split_off(1);
            self.spawn_collapse(kind, record.id.clone(), extras, collapse_errors.clone());
        }

        match matches.into_iter().next() {
            None => {
                let draft = NotificationDraft {
                    kind,
                    source_id: record.id.clone(),
                    days_remaining,
                    priority,
                    details: record.details.clone(),
                };
                self.store.insert_notification(&draft).await?;
                Ok(RecordOutcome::Created)
            }
            Some(existing) => {
                if !force && existing.days_remaining == days_remaining {
                    return Ok(RecordOutcome::Unchanged);
                }
                // Escalation claws the read flag back; anything else keeps
                // the user's choice.
                let read = !Priority::escalated(existing.priority, priority) && existing.read;
                let patch = NotificationPatch {
                    days_remaining,
                    priority,
                    read,
                    details: record.details.clone(),
                };
                self.store.update_notification(&existing.id, &patch).await?;
                Ok(RecordOutcome::Updated)
            }
        }
    }

    /// Deletes redundant notifications for one source off the critical
    /// path. The oldest entry stays canonical; failures only surface on
    /// the error channel.
    fn spawn_collapse(
        &self,
        kind: EntityKind,
        source_id: String,
        extras: Vec<Notification>,
        errors: UnboundedSender<anyhow::Error>,
    ) {
        warn!(
            kind = kind.as_str(),
            source_id = %source_id,
            extras = extras.len(),
            "duplicate notifications detected; collapsing"
        );
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for dup in extras {
                if let Err(err) = store.delete_notification(&dup.id).await {
                    let _ = errors.send(err.context(format!(
                        "deleting duplicate notification {} for {} {}",
                        dup.id,
                        kind.as_str(),
                        source_id
                    )));
                }
            }
        });
    }

    /// Deletes notifications whose source left the working set
    /// (deactivated, deleted, or past the horizon). Best-effort: a stale
    /// entry surviving one extra day is cosmetic, so every error here is
    /// logged and swallowed.
    async fn collect_orphans(
        &self,
        kind: EntityKind,
        working_set: &[PrimaryRecord],
        report: &mut SyncReport,
    ) {
        let existing = match self.store.notifications(kind).await {
            Ok(list) => list,
            Err(err) => {
                warn!(?err, kind = kind.as_str(), "orphan scan failed; skipping");
                return;
            }
        };
        let live: HashSet<&str> = working_set.iter().map(|r| r.id.as_str()).collect();
        for notification in existing {
            if live.contains(notification.source_id.as_str()) {
                continue;
            }
            match self.store.delete_notification(&notification.id).await {
                Ok(()) => report.orphans_removed += 1,
                Err(err) => warn!(?err, id = %notification.id, "orphan delete failed"),
            }
        }
    }
}
