//! Fire cycles and the idempotency rules that gate them.
//!
//! A fire cycle runs when an entity's timer elapses. It re-reads the entity
//! from storage (the driver never trusts its own copy), picks the candidate
//! occurrence, and delivers only when the occurrence is still inside the
//! catch-up window and no notification already went out for its calendar
//! date in the entity's timezone. After delivery the fired marker is
//! persisted; when that write fails the marker is kept in memory so the
//! process does not notify twice for the same occurrence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use airtime_core::EntityId;
use airtime_notify::{Fanout, Notifier, OccurrencePayload};
use airtime_schedule::{ResolvedSchedule, ScheduleError};
use airtime_store::{Storage, StoreError};

/// Everything a fire cycle needs; cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct CycleContext {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    catch_up_window: Duration,
    /// Fired markers that could not be written back, so later cycles in this
    /// process still see them.
    unpersisted: Arc<Mutex<HashMap<EntityId, DateTime<Utc>>>>,
}

impl CycleContext {
    pub fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        catch_up_window: Duration,
    ) -> Self {
        Self {
            storage,
            notifier,
            catch_up_window,
            unpersisted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn unpersisted_marker(&self, id: EntityId) -> Option<DateTime<Utc>> {
        self.unpersisted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .copied()
    }

    fn remember_unpersisted(&self, id: EntityId, at: DateTime<Utc>) {
        self.unpersisted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, at);
    }
}

/// How a fire cycle settled.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The occurrence was delivered to the subscriber set.
    Notified {
        occurrence: DateTime<Utc>,
        delivered: usize,
        failed: usize,
    },
    /// A notification for this occurrence's calendar date already went out.
    AlreadyNotified { occurrence: DateTime<Utc> },
    /// The occurrence fell outside the catch-up window and was abandoned.
    TooLate { occurrence: DateTime<Utc> },
    /// The entity is gone from storage.
    Removed,
    /// The stored schedule no longer passes validation.
    InvalidSchedule(ScheduleError),
}

/// Run one fire cycle for `id` at instant `now`.
///
/// Only a storage read failure is an `Err`; it is the one condition worth
/// retrying, since nothing has been delivered yet. Every other way the cycle
/// can settle is a [`CycleOutcome`].
pub async fn run_fire_cycle(
    ctx: &CycleContext,
    id: EntityId,
    now: DateTime<Utc>,
) -> Result<CycleOutcome, StoreError> {
    let Some(item) = ctx.storage.find_tracked_item(id).await? else {
        return Ok(CycleOutcome::Removed);
    };

    let resolved = match ResolvedSchedule::parse(&item.schedule) {
        Ok(r) => r,
        Err(e) => return Ok(CycleOutcome::InvalidSchedule(e)),
    };

    // Most recent scheduled instant at or before now.
    let occurrence = resolved.previous_from(now);

    if now - occurrence > ctx.catch_up_window {
        return Ok(CycleOutcome::TooLate { occurrence });
    }

    let last_fired = match (item.last_fired_at, ctx.unpersisted_marker(id)) {
        (Some(stored), Some(local)) => Some(stored.max(local)),
        (stored, local) => stored.or(local),
    };
    if let Some(last) = last_fired {
        let last_date = last.with_timezone(&resolved.tz).date_naive();
        let occurrence_date = occurrence.with_timezone(&resolved.tz).date_naive();
        if last_date == occurrence_date {
            return Ok(CycleOutcome::AlreadyNotified { occurrence });
        }
    }

    let payload = OccurrencePayload::for_item(&item, occurrence);
    let outcomes = Fanout::new(ctx.notifier.clone())
        .deliver(&item.subscribers, &payload)
        .await;
    let delivered = outcomes.iter().filter(|o| o.success).count();
    let failed = outcomes.len() - delivered;

    match ctx.storage.update_last_fired(id, now).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(entity_id = id, "item disappeared before the fired marker was written");
        }
        Err(e) => {
            warn!(
                entity_id = id,
                error = %e,
                "could not persist fired marker, keeping it in memory"
            );
            ctx.remember_unpersisted(id, now);
        }
    }

    Ok(CycleOutcome::Notified {
        occurrence,
        delivered,
        failed,
    })
}

/// Run a fire cycle, retrying transient storage failures with fixed backoff.
///
/// Returns the number of attempts made along with the final result.
pub async fn run_fire_cycle_with_retries(
    ctx: &CycleContext,
    id: EntityId,
    max_attempts: u32,
    backoff: StdDuration,
) -> (u32, Result<CycleOutcome, StoreError>) {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match run_fire_cycle(ctx, id, Utc::now()).await {
            Ok(outcome) => return (attempt, Ok(outcome)),
            Err(e) if attempt < max_attempts => {
                warn!(
                    entity_id = id,
                    attempt,
                    error = %e,
                    "fire cycle hit a storage error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}
