//! The recurrence driver loop.
//!
//! One task owns every piece of scheduling state: a min-heap of
//! `(fire instant, entity, generation)` deadlines and a per-entity state map.
//! Registering an entity bumps its generation, so older heap entries become
//! dead weight that is dropped when it surfaces; at most one live timer
//! exists per entity. Fire cycles run as spawned tasks and report back over
//! a channel, which keeps the loop free to serve commands while cycles are
//! in flight and guarantees no two cycles overlap for the same entity.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use airtime_core::config::DriverConfig;
use airtime_core::{EntityId, TrackedItem, WeeklySchedule};
use airtime_notify::Notifier;
use airtime_schedule::next_occurrence;
use airtime_store::{Storage, StoreError};

use crate::guard::{run_fire_cycle_with_retries, CycleContext, CycleOutcome};

/// Upper bound on an idle park; any command or completion wakes the loop
/// earlier.
const IDLE_SLEEP: StdDuration = StdDuration::from_secs(60);

pub(crate) enum Command {
    Schedule(TrackedItem),
    Cancel(EntityId),
    Sweep(oneshot::Sender<usize>),
    Shutdown,
}

pub(crate) struct CycleDone {
    pub entity_id: EntityId,
    pub generation: u64,
    pub attempts: u32,
    pub result: Result<CycleOutcome, StoreError>,
}

#[derive(Debug)]
enum Phase {
    Scheduled { next_at: DateTime<Utc> },
    Firing,
    Suspended { reason: String },
}

#[derive(Debug)]
struct EntityState {
    generation: u64,
    schedule: WeeklySchedule,
    phase: Phase,
}

pub(crate) struct RecurrenceDriver {
    storage: Arc<dyn Storage>,
    config: DriverConfig,
    ctx: CycleContext,
    cmd_rx: mpsc::Receiver<Command>,
    done_tx: mpsc::Sender<CycleDone>,
    done_rx: mpsc::Receiver<CycleDone>,
    heap: BinaryHeap<Reverse<(DateTime<Utc>, EntityId, u64)>>,
    entities: HashMap<EntityId, EntityState>,
    /// Registration counters, never reset: a generation is never reused for
    /// an id, even across a cancel followed by a fresh registration.
    generations: HashMap<EntityId, u64>,
    in_flight: HashSet<EntityId>,
}

impl RecurrenceDriver {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        config: DriverConfig,
        cmd_rx: mpsc::Receiver<Command>,
        done_tx: mpsc::Sender<CycleDone>,
        done_rx: mpsc::Receiver<CycleDone>,
    ) -> Self {
        let ctx = CycleContext::new(
            storage.clone(),
            notifier,
            Duration::hours(config.catch_up_window_hours as i64),
        );
        Self {
            storage,
            config,
            ctx,
            cmd_rx,
            done_tx,
            done_rx,
            heap: BinaryHeap::new(),
            entities: HashMap::new(),
            generations: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!("recurrence driver started");

        let mut sweep = if self.config.sweep_interval_secs > 0 {
            let period = StdDuration::from_secs(self.config.sweep_interval_secs);
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        } else {
            None
        };

        loop {
            let now = Utc::now();
            self.dispatch_due(now).await;
            let idle = self.sleep_until_next(now);

            tokio::select! {
                biased;

                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(Command::Schedule(item)) => self.register(item, Utc::now()),
                        Some(Command::Cancel(id)) => self.cancel(id),
                        Some(Command::Sweep(reply)) => {
                            let registered = self.reconcile(Utc::now()).await;
                            let _ = reply.send(registered);
                        }
                        Some(Command::Shutdown) => {
                            info!(entities = self.entities.len(), "recurrence driver stopping");
                            break;
                        }
                        None => {
                            debug!("command channel closed, driver exiting");
                            break;
                        }
                    }
                }

                Some(done) = self.done_rx.recv() => {
                    self.handle_done(done, Utc::now());
                }

                _ = tick(&mut sweep) => {
                    let registered = self.reconcile(Utc::now()).await;
                    debug!(registered, "reconcile sweep finished");
                }

                _ = tokio::time::sleep(idle) => {}
            }
        }

        info!("recurrence driver stopped");
    }

    /// Install (or replace) scheduling state for an item.
    ///
    /// The reference instant for the next occurrence is just past the fired
    /// marker when one exists, so an occurrence missed while the process was
    /// down lands in the past and fires immediately. Without a marker the
    /// first fire is the next future slot.
    fn register(&mut self, item: TrackedItem, now: DateTime<Utc>) {
        let generation = {
            let counter = self.generations.entry(item.id).or_insert(0);
            *counter += 1;
            *counter
        };
        let reference = item
            .last_fired_at
            .map(|t| t + Duration::seconds(1))
            .unwrap_or(now);

        match next_occurrence(&item.schedule, reference) {
            Ok(next_at) => {
                info!(
                    entity_id = item.id,
                    title = %item.title,
                    next_at = %next_at,
                    "entity scheduled"
                );
                self.heap.push(Reverse((next_at, item.id, generation)));
                self.entities.insert(
                    item.id,
                    EntityState {
                        generation,
                        schedule: item.schedule,
                        phase: Phase::Scheduled { next_at },
                    },
                );
            }
            Err(e) => {
                warn!(
                    entity_id = item.id,
                    title = %item.title,
                    error = %e,
                    "schedule failed validation, entity suspended"
                );
                let retry_at = now + self.cooldown();
                self.heap.push(Reverse((retry_at, item.id, generation)));
                self.entities.insert(
                    item.id,
                    EntityState {
                        generation,
                        schedule: item.schedule,
                        phase: Phase::Suspended {
                            reason: e.to_string(),
                        },
                    },
                );
            }
        }
    }

    fn cancel(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_some() {
            // Heap entries die through the generation check when they surface.
            info!(entity_id = id, "entity cancelled");
        } else {
            debug!(entity_id = id, "cancel for an unknown entity ignored");
        }
    }

    /// Pop every deadline at or before `now`, dropping stale entries along
    /// the way, and start fire cycles (or re-validate suspended entities).
    async fn dispatch_due(&mut self, now: DateTime<Utc>) {
        while let Some(Reverse((at, id, generation))) = self.heap.peek().copied() {
            let live = self
                .entities
                .get(&id)
                .is_some_and(|s| s.generation == generation);
            if !live {
                self.heap.pop();
                continue;
            }
            if at > now {
                break;
            }
            self.heap.pop();

            if self.in_flight.contains(&id) {
                // A cycle from a replaced registration has not settled yet;
                // try this deadline again shortly.
                self.heap
                    .push(Reverse((now + Duration::milliseconds(200), id, generation)));
                continue;
            }

            let suspended = self
                .entities
                .get(&id)
                .map(|s| matches!(s.phase, Phase::Suspended { .. }))
                .unwrap_or(false);
            if suspended {
                self.revive(id, generation, now).await;
            } else {
                self.spawn_cycle(id, generation);
            }
        }
    }

    fn spawn_cycle(&mut self, id: EntityId, generation: u64) {
        if let Some(state) = self.entities.get_mut(&id) {
            state.phase = Phase::Firing;
        }
        self.in_flight.insert(id);

        let ctx = self.ctx.clone();
        let done_tx = self.done_tx.clone();
        let max_attempts = self.config.fire_max_attempts;
        let backoff = StdDuration::from_secs(self.config.fire_retry_backoff_secs);

        tokio::spawn(async move {
            let (attempts, result) =
                run_fire_cycle_with_retries(&ctx, id, max_attempts, backoff).await;
            let _ = done_tx
                .send(CycleDone {
                    entity_id: id,
                    generation,
                    attempts,
                    result,
                })
                .await;
        });
    }

    /// Re-read a suspended entity and try to register it again. Fixed data
    /// recovers here without an explicit command.
    async fn revive(&mut self, id: EntityId, generation: u64, now: DateTime<Utc>) {
        if let Some(EntityState {
            phase: Phase::Suspended { reason },
            ..
        }) = self.entities.get(&id)
        {
            debug!(entity_id = id, reason = %reason, "re-validating suspended entity");
        }
        let found = self.storage.find_tracked_item(id).await;
        match found {
            Ok(Some(item)) => self.register(item, now),
            Ok(None) => {
                info!(entity_id = id, "suspended entity gone from storage, dropped");
                self.entities.remove(&id);
            }
            Err(e) => {
                warn!(entity_id = id, error = %e, "storage read failed, entity stays suspended");
                self.heap.push(Reverse((now + self.cooldown(), id, generation)));
            }
        }
    }

    fn handle_done(&mut self, done: CycleDone, now: DateTime<Utc>) {
        self.in_flight.remove(&done.entity_id);

        let Some(state) = self.entities.get(&done.entity_id) else {
            debug!(
                entity_id = done.entity_id,
                "completion for a cancelled entity discarded"
            );
            return;
        };
        if state.generation != done.generation {
            debug!(
                entity_id = done.entity_id,
                "completion for a replaced schedule discarded"
            );
            return;
        }

        match done.result {
            Ok(CycleOutcome::Notified {
                occurrence,
                delivered,
                failed,
            }) => {
                info!(
                    entity_id = done.entity_id,
                    occurrence = %occurrence,
                    delivered,
                    failed,
                    attempts = done.attempts,
                    "occurrence notified"
                );
                self.reschedule(done.entity_id, now);
            }
            Ok(CycleOutcome::AlreadyNotified { occurrence }) => {
                debug!(
                    entity_id = done.entity_id,
                    occurrence = %occurrence,
                    "occurrence already notified, skipped"
                );
                self.reschedule(done.entity_id, now);
            }
            Ok(CycleOutcome::TooLate { occurrence }) => {
                info!(
                    entity_id = done.entity_id,
                    occurrence = %occurrence,
                    "occurrence missed beyond the catch-up window, skipped"
                );
                self.reschedule(done.entity_id, now);
            }
            Ok(CycleOutcome::Removed) => {
                info!(
                    entity_id = done.entity_id,
                    "entity gone from storage, timer dropped"
                );
                self.entities.remove(&done.entity_id);
            }
            Ok(CycleOutcome::InvalidSchedule(e)) => {
                warn!(
                    entity_id = done.entity_id,
                    error = %e,
                    "stored schedule became invalid, suspending entity"
                );
                self.suspend(done.entity_id, e.to_string(), now);
            }
            Err(e) => {
                warn!(
                    entity_id = done.entity_id,
                    attempts = done.attempts,
                    error = %e,
                    "fire cycle failed, waiting for the next slot"
                );
                self.reschedule(done.entity_id, now);
            }
        }
    }

    /// Arm the next timer from the current wall clock, never from the
    /// previous deadline, with a floor on the delay so a fire can never
    /// re-arm itself into a tight loop.
    fn reschedule(&mut self, id: EntityId, now: DateTime<Utc>) {
        let Some(state) = self.entities.get(&id) else {
            return;
        };
        let schedule = state.schedule.clone();
        let generation = state.generation;

        match next_occurrence(&schedule, now) {
            Ok(next_at) => {
                let floor = Duration::seconds(self.config.reschedule_floor_secs as i64);
                let fire_at = next_at.max(now + floor);
                if let Some(state) = self.entities.get_mut(&id) {
                    state.phase = Phase::Scheduled { next_at: fire_at };
                }
                self.heap.push(Reverse((fire_at, id, generation)));
                debug!(entity_id = id, next_at = %fire_at, "rescheduled");
            }
            Err(e) => self.suspend(id, e.to_string(), now),
        }
    }

    fn suspend(&mut self, id: EntityId, reason: String, now: DateTime<Utc>) {
        let retry_at = now + self.cooldown();
        let Some(state) = self.entities.get_mut(&id) else {
            return;
        };
        state.phase = Phase::Suspended { reason };
        let generation = state.generation;
        self.heap.push(Reverse((retry_at, id, generation)));
    }

    /// Align the entity set with the storage listing: register unknown
    /// items, re-attempt suspended ones, and drop timers for items that no
    /// longer exist. Scheduled and firing entities are left alone.
    async fn reconcile(&mut self, now: DateTime<Utc>) -> usize {
        let items = match self.storage.list_all_tracked_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "reconcile listing failed");
                return 0;
            }
        };

        let listed: HashSet<EntityId> = items.iter().map(|i| i.id).collect();
        let vanished: Vec<EntityId> = self
            .entities
            .keys()
            .filter(|id| !listed.contains(id))
            .copied()
            .collect();
        for id in vanished {
            info!(entity_id = id, "entity no longer in storage, timer dropped");
            self.entities.remove(&id);
        }

        let mut registered = 0;
        for item in items {
            let needs_registration = match self.entities.get(&item.id) {
                None => true,
                Some(state) => matches!(state.phase, Phase::Suspended { .. }),
            };
            if needs_registration {
                self.register(item, now);
                registered += 1;
            }
        }
        registered
    }

    /// Time until the earliest live deadline, discarding stale heap heads.
    fn sleep_until_next(&mut self, now: DateTime<Utc>) -> StdDuration {
        while let Some(Reverse((at, id, generation))) = self.heap.peek().copied() {
            let live = self
                .entities
                .get(&id)
                .is_some_and(|s| s.generation == generation);
            if !live {
                self.heap.pop();
                continue;
            }
            return (at - now).to_std().unwrap_or(StdDuration::ZERO);
        }
        IDLE_SLEEP
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.config.suspend_cooldown_secs as i64)
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
