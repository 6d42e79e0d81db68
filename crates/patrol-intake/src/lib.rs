//! `patrol-intake` – the scribe on the other end of the telemetry channel.
//!
//! Listens on two UDP ports: one for environment readings from a sensor
//! board and one for the coordinates the patrol announces after each
//! waypoint.  Every coordinate becomes one CSV row paired with the most
//! recent environment reading.
//!
//! # Modules
//!
//! - [`inbound`] – [`InboundMessage`]: datagrams tagged by the socket they
//!   arrived on.
//! - [`data_log`] – [`DataLog`]: append-only CSV log, durably flushed per row.
//! - [`listener`] – [`IntakeListener`]: the two-socket receive loop.
//! - [`error`] – [`IntakeError`].

pub mod data_log;
pub mod error;
pub mod inbound;
pub mod listener;

pub use data_log::{DataLog, LogRow};
pub use error::IntakeError;
pub use inbound::{Channel, InboundMessage};
pub use listener::{IntakeConfig, IntakeListener};
