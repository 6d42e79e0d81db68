//! `patrol-runtime` – the patrol driver.
//!
//! Wires the pure decision logic of `patrol-kernel` to the I/O surfaces of
//! `patrol-middleware` inside a single Tokio event loop.
//!
//! # Modules
//!
//! - [`patrol_loop`] – [`PatrolLoop`][patrol_loop::PatrolLoop]: submits goals
//!   in cycle order, runs the deadline check, cancels overdue goals, emits
//!   coordinate telemetry and schedules the settling pause between goals.
//! - [`streak_guard`] – [`StreakGuard`][streak_guard::StreakGuard]: warns when
//!   goals keep failing back to back.
//! - [`logging`] – [`init_tracing`][logging::init_tracing]: installs the
//!   global `tracing` subscriber, optionally exporting spans over OTLP when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod logging;
pub mod patrol_loop;
pub mod streak_guard;

pub use logging::{init_tracing, LogFormat, TracerProviderGuard};
pub use patrol_loop::{PatrolLoop, PatrolLoopConfig};
pub use streak_guard::StreakGuard;
