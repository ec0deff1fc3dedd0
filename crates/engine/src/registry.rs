//! Cloneable handle owning the driver loop.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use airtime_core::config::DriverConfig;
use airtime_core::{EntityId, TrackedItem};
use airtime_notify::Notifier;
use airtime_store::Storage;

use crate::driver::{Command, RecurrenceDriver};

const CHANNEL_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The driver loop is no longer running.
    #[error("scheduling engine is not running")]
    Stopped,
}

/// Handle to the scheduling engine.
///
/// `start` spawns the driver loop; the handle can be cloned freely and every
/// clone talks to the same loop. `shutdown` stops the loop, discards pending
/// timers, and waits for the task. Dropping every handle closes the command
/// channel, which also stops the loop.
#[derive(Clone)]
pub struct ScheduleRegistry {
    cmd_tx: mpsc::Sender<Command>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScheduleRegistry {
    pub fn start(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        config: DriverConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (done_tx, done_rx) = mpsc::channel(CHANNEL_DEPTH);
        let driver = RecurrenceDriver::new(storage, notifier, config, cmd_rx, done_tx, done_rx);
        let task = tokio::spawn(driver.run());
        Self {
            cmd_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Install (or replace) the timer for an entity.
    pub async fn schedule_entity(&self, item: TrackedItem) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::Schedule(item))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Drop an entity's timer. A fire cycle already in flight finishes on its
    /// own, but its completion is discarded.
    pub async fn cancel_entity(&self, id: EntityId) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::Cancel(id))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Reconcile the driver against the storage listing: register unknown
    /// items, re-attempt suspended entities, and drop timers for items that
    /// no longer exist. Returns how many entities were (re)registered.
    pub async fn run_startup_sweep(&self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Sweep(reply_tx))
            .await
            .map_err(|_| EngineError::Stopped)?;
        reply_rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "driver task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Timelike, Utc};

    use airtime_core::{RecipientId, WeeklySchedule};
    use airtime_notify::{NotifyError, OccurrencePayload};
    use airtime_store::{MemoryStore, StoreError};

    use super::*;

    struct CountingNotifier {
        sends: AtomicUsize,
        delay: StdDuration,
    }

    impl CountingNotifier {
        fn new() -> Self {
            Self::delayed(StdDuration::ZERO)
        }

        fn delayed(delay: StdDuration) -> Self {
            Self {
                sends: AtomicUsize::new(0),
                delay,
            }
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(
            &self,
            _recipient: &RecipientId,
            _payload: &OccurrencePayload,
        ) -> Result<(), NotifyError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    struct FailingReadsStore {
        inner: MemoryStore,
        fail_next_reads: AtomicUsize,
        reads: AtomicUsize,
    }

    impl FailingReadsStore {
        fn wrapping(inner: MemoryStore, fail_next_reads: usize) -> Self {
            Self {
                inner,
                fail_next_reads: AtomicUsize::new(fail_next_reads),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Storage for FailingReadsStore {
        async fn find_tracked_item(
            &self,
            id: EntityId,
        ) -> Result<Option<TrackedItem>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_next_reads.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_reads.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Io(std::io::Error::other("read failed")));
            }
            self.inner.find_tracked_item(id).await
        }

        async fn list_all_tracked_items(&self) -> Result<Vec<TrackedItem>, StoreError> {
            self.inner.list_all_tracked_items().await
        }

        async fn update_last_fired(
            &self,
            id: EntityId,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.update_last_fired(id, at).await
        }

        async fn remove_tracked_item(&self, id: EntityId) -> Result<bool, StoreError> {
            self.inner.remove_tracked_item(id).await
        }
    }

    fn quick_config() -> DriverConfig {
        DriverConfig {
            catch_up_window_hours: 72,
            reschedule_floor_secs: 60,
            suspend_cooldown_secs: 3600,
            fire_max_attempts: 3,
            fire_retry_backoff_secs: 0,
            sweep_interval_secs: 0,
        }
    }

    fn tracked(id: EntityId, schedule: WeeklySchedule, subscribers: &[&str]) -> TrackedItem {
        TrackedItem {
            id,
            title: format!("Entity {id}"),
            image_url: None,
            schedule,
            last_fired_at: Some(Utc::now() - Duration::days(3)),
            subscribers: subscribers.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// An item whose slot passed two hours ago on the clock of a fixed-offset
    /// zone where it is currently around noon, so no cycle straddles a local
    /// midnight while a test runs. The fired marker is three days old, which
    /// makes the missed slot surface immediately on registration.
    fn fireable_item(id: EntityId, subscribers: &[&str]) -> TrackedItem {
        let now = Utc::now();
        let offset = 12 - i64::from(now.hour());
        let timezone = if offset == 0 {
            "Etc/GMT".to_string()
        } else if offset > 0 {
            format!("Etc/GMT-{offset}")
        } else {
            format!("Etc/GMT+{}", -offset)
        };
        let slot_local = now + Duration::hours(offset) - Duration::hours(2);
        tracked(
            id,
            WeeklySchedule {
                day: slot_local.format("%A").to_string(),
                time: slot_local.format("%H:%M").to_string(),
                timezone,
            },
            subscribers,
        )
    }

    fn future_item(id: EntityId, subscribers: &[&str]) -> TrackedItem {
        let slot = Utc::now() + Duration::days(3);
        let mut item = tracked(
            id,
            WeeklySchedule {
                day: slot.format("%A").to_string(),
                time: slot.format("%H:%M").to_string(),
                timezone: "UTC".to_string(),
            },
            subscribers,
        );
        item.last_fired_at = None;
        item
    }

    fn bad_item(id: EntityId) -> TrackedItem {
        tracked(
            id,
            WeeklySchedule {
                day: "Blursday".to_string(),
                time: "18:00".to_string(),
                timezone: "UTC".to_string(),
            },
            &["alice"],
        )
    }

    async fn wait_for_sends(notifier: &CountingNotifier, expected: usize) {
        for _ in 0..100 {
            if notifier.sends() >= expected {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
        panic!(
            "timed out waiting for {expected} deliveries, saw {}",
            notifier.sends()
        );
    }

    #[tokio::test]
    async fn missed_occurrence_fires_immediately_on_registration() {
        let item = fireable_item(1, &["alice", "bob"]);
        let store = Arc::new(MemoryStore::with_items([item.clone()]));
        let notifier = Arc::new(CountingNotifier::new());
        let registry =
            ScheduleRegistry::start(store.clone(), notifier.clone(), quick_config());

        registry.schedule_entity(item).await.unwrap();

        wait_for_sends(&notifier, 2).await;
        for _ in 0..100 {
            let marker = store.find_tracked_item(1).await.unwrap().unwrap().last_fired_at;
            if marker.map(|m| m > Utc::now() - Duration::minutes(5)).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
        let stored = store.find_tracked_item(1).await.unwrap().unwrap();
        assert!(stored.last_fired_at.unwrap() > Utc::now() - Duration::minutes(5));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn double_schedule_delivers_once() {
        let item = fireable_item(1, &["alice"]);
        let store = Arc::new(MemoryStore::with_items([item.clone()]));
        let notifier = Arc::new(CountingNotifier::new());
        let registry =
            ScheduleRegistry::start(store.clone(), notifier.clone(), quick_config());

        registry.schedule_entity(item.clone()).await.unwrap();
        registry.schedule_entity(item).await.unwrap();

        wait_for_sends(&notifier, 1).await;
        tokio::time::sleep(StdDuration::from_millis(600)).await;
        assert_eq!(notifier.sends(), 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_discards_the_inflight_completion() {
        let item = fireable_item(1, &["alice"]);
        let store = Arc::new(MemoryStore::with_items([item.clone()]));
        let notifier = Arc::new(CountingNotifier::delayed(StdDuration::from_millis(250)));
        let registry =
            ScheduleRegistry::start(store.clone(), notifier.clone(), quick_config());

        registry.schedule_entity(item).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        registry.cancel_entity(1).await.unwrap();

        // The cycle that was already running still delivers, but nothing
        // gets rescheduled and nothing fires again.
        wait_for_sends(&notifier, 1).await;
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(notifier.sends(), 1);
        // Cancelling a timer never touches the stored item.
        assert!(store.find_tracked_item(1).await.unwrap().is_some());

        let second = fireable_item(2, &["carol"]);
        store.insert(second.clone()).await;
        registry.schedule_entity(second).await.unwrap();
        wait_for_sends(&notifier, 2).await;
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn suspended_entity_recovers_once_storage_is_fixed() {
        // Storage already holds a valid item; the registration carries a
        // stale broken schedule and gets suspended. The cooldown re-read
        // picks up the good data.
        let store = Arc::new(MemoryStore::with_items([fireable_item(1, &["alice"])]));
        let notifier = Arc::new(CountingNotifier::new());
        let config = DriverConfig {
            suspend_cooldown_secs: 1,
            ..quick_config()
        };
        let registry = ScheduleRegistry::start(store.clone(), notifier.clone(), config);

        registry.schedule_entity(bad_item(1)).await.unwrap();

        wait_for_sends(&notifier, 1).await;
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried_within_budget() {
        let item = fireable_item(1, &["alice"]);
        let store = Arc::new(FailingReadsStore::wrapping(
            MemoryStore::with_items([item.clone()]),
            2,
        ));
        let notifier = Arc::new(CountingNotifier::new());
        let registry =
            ScheduleRegistry::start(store.clone(), notifier.clone(), quick_config());

        registry.schedule_entity(item).await.unwrap();

        wait_for_sends(&notifier, 1).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_retries_skip_to_the_next_slot() {
        let item = fireable_item(1, &["alice"]);
        let store = Arc::new(FailingReadsStore::wrapping(
            MemoryStore::with_items([item.clone()]),
            usize::MAX,
        ));
        let notifier = Arc::new(CountingNotifier::new());
        let config = DriverConfig {
            fire_max_attempts: 2,
            ..quick_config()
        };
        let registry = ScheduleRegistry::start(store.clone(), notifier.clone(), config);

        registry.schedule_entity(item).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(notifier.sends(), 0);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn startup_sweep_registers_everything_and_isolates_failures() {
        let store = Arc::new(MemoryStore::with_items([
            fireable_item(1, &["alice"]),
            bad_item(2),
            future_item(3, &["bob"]),
        ]));
        let notifier = Arc::new(CountingNotifier::new());
        let registry =
            ScheduleRegistry::start(store.clone(), notifier.clone(), quick_config());

        let registered = registry.run_startup_sweep().await.unwrap();
        assert_eq!(registered, 3);

        wait_for_sends(&notifier, 1).await;
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        // Only the overdue entity fired; the broken one sat suspended and
        // the future one stayed armed.
        assert_eq!(notifier.sends(), 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_sweep_picks_up_items_added_behind_the_drivers_back() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::new());
        let config = DriverConfig {
            sweep_interval_secs: 1,
            ..quick_config()
        };
        let registry = ScheduleRegistry::start(store.clone(), notifier.clone(), config);

        assert_eq!(registry.run_startup_sweep().await.unwrap(), 0);
        store.insert(fireable_item(7, &["alice"])).await;

        wait_for_sends(&notifier, 1).await;
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_commands() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::new());
        let registry = ScheduleRegistry::start(store, notifier, quick_config());

        registry.shutdown().await;

        let result = registry.schedule_entity(future_item(1, &["alice"])).await;
        assert!(matches!(result, Err(EngineError::Stopped)));
    }
}
