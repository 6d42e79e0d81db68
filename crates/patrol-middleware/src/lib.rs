//! `patrol-middleware` – everything between the patrol and the outside world.
//!
//! # Modules
//!
//! - [`gateway`] – [`ActionGateway`], the action-style navigation service
//!   contract the driver talks to.
//! - [`nav_bridge`] – [`NavBridgeGateway`], an [`ActionGateway`] that speaks
//!   rosbridge-style JSON over a WebSocket.
//! - [`sim`] – [`SimNavigator`], an in-process scripted navigation service.
//! - [`emitter`] – [`TelemetryEmitter`] and its UDP implementation.
//! - [`bus`] – broadcast event bus for lifecycle events.

pub mod bus;
pub mod emitter;
pub mod gateway;
pub mod nav_bridge;
pub mod sim;

pub use bus::{EventBus, FilteredSubscriber};
pub use emitter::{TelemetryEmitter, UdpTelemetryEmitter};
pub use gateway::ActionGateway;
pub use nav_bridge::NavBridgeGateway;
pub use sim::{SimBehavior, SimNavigator};
