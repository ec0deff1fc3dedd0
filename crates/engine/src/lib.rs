//! Recurrence engine: one logical timer per tracked entity.
//!
//! The [`ScheduleRegistry`] owns a single driver loop built around a min-heap
//! of fire deadlines. When an entity's deadline arrives the loop spawns a fire
//! cycle, which re-reads the entity from storage, decides through the
//! idempotency rules in [`guard`] whether the candidate occurrence should
//! actually be delivered, fans the notification out to every subscriber, and
//! persists the fired marker. Completions flow back over a channel and the
//! entity is rescheduled from the current wall clock.
//!
//! Entities whose stored schedule fails validation are suspended and
//! re-checked after a cool-down, and a periodic reconcile sweep keeps the
//! driver's entity set aligned with the storage listing.

mod driver;
pub mod guard;
pub mod registry;

pub use guard::{run_fire_cycle, CycleContext, CycleOutcome};
pub use registry::{EngineError, ScheduleRegistry};
