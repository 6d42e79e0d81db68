//! The navigation service contract.
//!
//! The patrol never speaks to a navigation stack directly.  It drives an
//! [`ActionGateway`], and each implementation translates the four calls into
//! whatever the outside world expects.
//!
//! - [`NavBridgeGateway`][crate::nav_bridge::NavBridgeGateway] – rosbridge
//!   JSON frames over a WebSocket.
//! - [`SimNavigator`][crate::sim::SimNavigator] – scripted, in-process.

use std::time::Duration;

use async_trait::async_trait;
use patrol_types::{CancelAck, GoalHandle, GoalResponse, GoalStatus, NavigationGoal, PatrolError};

/// Action-style navigation service: a goal is accepted or rejected, and an
/// accepted goal later resolves to a terminal [`GoalStatus`].
///
/// # Contract
///
/// * `wait_for_server` – a single reachability probe bounded by `timeout`.
///   Returns `false` when the service is not reachable in time; callers decide
///   whether to retry.
///
/// * `send_goal` – submit a target pose.  Resolves once the service has
///   decided whether to take the goal on.
///
/// * `get_result` – resolves once the goal identified by the handle reaches a
///   terminal status.  The status may already be known when this is called.
///
/// * `cancel_goal` – request that the service abandon the goal.  The goal's
///   result ticket still resolves afterwards, normally with
///   [`GoalStatus::Canceled`].
#[async_trait]
pub trait ActionGateway: Send + Sync {
    async fn wait_for_server(&self, timeout: Duration) -> bool;

    async fn send_goal(&self, goal: NavigationGoal) -> Result<GoalResponse, PatrolError>;

    async fn get_result(&self, handle: GoalHandle) -> Result<GoalStatus, PatrolError>;

    async fn cancel_goal(&self, handle: GoalHandle) -> Result<CancelAck, PatrolError>;
}
