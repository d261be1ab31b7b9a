//! Scheduler gate: one reconciliation pass per calendar day, one in flight
//! at a time.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;

use crate::store::MarkerStore;

/// Owns the persisted "last run" day-marker and the in-process
/// single-flight flag. These are the only shared mutable state in the
/// engine.
#[derive(Clone)]
pub struct SchedulerGate {
    markers: Arc<dyn MarkerStore>,
    key: String,
    in_flight: Arc<AtomicBool>,
}

/// Holding this permit means the caller owns the current pass. The flag
/// clears when the permit drops, so no exit path can leave it wedged.
pub struct RunPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl SchedulerGate {
    pub fn new(markers: Arc<dyn MarkerStore>, key: impl Into<String>) -> Self {
        Self {
            markers,
            key: key.into(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn today() -> String {
        Local::now().date_naive().to_string()
    }

    /// False iff the persisted marker already names today's local date.
    pub async fn should_run(&self) -> Result<bool> {
        let marker = self.markers.marker(&self.key).await?;
        Ok(marker.as_deref() != Some(Self::today().as_str()))
    }

    /// Writes today into the marker. Called before fetching, so late
    /// overlapping triggers short-circuit while the pass is in flight.
    pub async fn mark_run(&self) -> Result<()> {
        self.markers.set_marker(&self.key, &Self::today()).await
    }

    /// Removes the marker so the next trigger retries the pass.
    pub async fn clear_run(&self) -> Result<()> {
        self.markers.clear_marker(&self.key).await
    }

    /// Checks and sets the in-process flag atomically. A second caller
    /// gets `None` and must perform no side effects.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| RunPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    /// Manual recovery for a wedged flag; used by forced runs before they
    /// re-enter `try_acquire`.
    pub fn force_release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryMarkers {
        map: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl MarkerStore for MemoryMarkers {
        async fn marker(&self, key: &str) -> Result<Option<String>> {
            Ok(self.map.lock().await.get(key).cloned())
        }

        async fn set_marker(&self, key: &str, value: &str) -> Result<()> {
            self.map.lock().await.insert(key.into(), value.into());
            Ok(())
        }

        async fn clear_marker(&self, key: &str) -> Result<()> {
            self.map.lock().await.remove(key);
            Ok(())
        }
    }

    fn gate() -> SchedulerGate {
        SchedulerGate::new(Arc::new(MemoryMarkers::default()), "test_sync_date")
    }

    #[tokio::test]
    async fn marker_gates_same_day_reruns() {
        let gate = gate();
        assert!(gate.should_run().await.unwrap());
        gate.mark_run().await.unwrap();
        assert!(!gate.should_run().await.unwrap());
        gate.clear_run().await.unwrap();
        assert!(gate.should_run().await.unwrap());
    }

    #[tokio::test]
    async fn second_acquire_fails_until_permit_drops() {
        let gate = gate();
        let permit = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn force_release_unwedges_the_flag() {
        let gate = gate();
        let permit = gate.try_acquire().unwrap();
        std::mem::forget(permit);
        assert!(gate.try_acquire().is_none());
        gate.force_release();
        assert!(gate.try_acquire().is_some());
    }
}
