//! `patrol-kernel` – Goal Supervision Core
//!
//! Pure, synchronous decision logic for the patrol.  Nothing in this crate
//! performs I/O or reads the clock; callers pass `now` in, which keeps every
//! transition deterministic and testable without a live navigation service.
//!
//! # Modules
//!
//! - [`deadline`] – [`DeadlinePolicy`][deadline::DeadlinePolicy]:
//!   maps a waypoint index to the maximum time its goal may take.
//! - [`sequencer`] – [`WaypointSequencer`][sequencer::WaypointSequencer]:
//!   owns the ordered cycle of waypoints and the cycle cursor.
//! - [`supervisor`] – [`GoalSupervisor`][supervisor::GoalSupervisor]:
//!   the goal lifecycle state machine.  Tracks the single in-flight
//!   [`GoalSession`][supervisor::GoalSession], detects deadline expiry and
//!   decides when to cancel.

pub mod deadline;
pub mod sequencer;
pub mod supervisor;

pub use deadline::{DeadlinePolicy, DeadlineRule};
pub use sequencer::WaypointSequencer;
pub use supervisor::{Effect, GoalSession, GoalSupervisor, SupervisorEvent};
