//! In-process navigation service for headless runs and tests.
//!
//! [`SimNavigator`] implements [`ActionGateway`] without any robot.  Each
//! submitted goal consumes the next scripted [`SimBehavior`]; once the script
//! runs dry, goals succeed after the time it takes to drive there in a
//! straight line.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use patrol_middleware::sim::{SimBehavior, SimNavigator};
//!
//! let sim = SimNavigator::new()
//!     .with_script([
//!         SimBehavior::Succeed { after: Duration::from_secs(2) },
//!         SimBehavior::Hang,
//!     ])
//!     .unreachable_for(1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use patrol_types::{
    CancelAck, GoalHandle, GoalResponse, GoalStatus, NavigationGoal, PatrolError, Waypoint,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::gateway::ActionGateway;

/// Default straight-line speed in metres per second.
const DEFAULT_SPEED: f64 = 0.5;

/// How the simulated service treats one goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimBehavior {
    /// Reach the waypoint after `after`, unless cancelled first.
    Succeed { after: Duration },
    /// Give up after `after`, unless cancelled first.
    Abort { after: Duration },
    /// Refuse the goal.
    Reject,
    /// Never finish on its own; only a cancel resolves it.
    Hang,
    /// Reach the waypoint after `after` and refuse every cancel.
    IgnoreCancel { after: Duration },
}

struct SimGoal {
    behavior: SimBehavior,
    target: Waypoint,
    accepted_at: Instant,
    cancel: Arc<Notify>,
}

struct SimState {
    script: VecDeque<SimBehavior>,
    position: Waypoint,
    goals: HashMap<GoalHandle, SimGoal>,
    submitted: Vec<NavigationGoal>,
    cancel_count: usize,
    probe_count: usize,
    unreachable_probes: usize,
}

/// Scripted [`ActionGateway`].
pub struct SimNavigator {
    speed: f64,
    state: Mutex<SimState>,
}

impl SimNavigator {
    /// A reachable service at the origin with an empty script.
    pub fn new() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            state: Mutex::new(SimState {
                script: VecDeque::new(),
                position: Waypoint::new(0.0, 0.0, 0.0),
                goals: HashMap::new(),
                submitted: Vec::new(),
                cancel_count: 0,
                probe_count: 0,
                unreachable_probes: 0,
            }),
        }
    }

    /// Straight-line speed used for unscripted goals.  Non-positive values
    /// are ignored.
    pub fn with_speed(mut self, metres_per_sec: f64) -> Self {
        if metres_per_sec > 0.0 {
            self.speed = metres_per_sec;
        }
        self
    }

    /// Queue behaviours for the next goals, in order.
    pub fn with_script(mut self, behaviors: impl IntoIterator<Item = SimBehavior>) -> Self {
        self.state.get_mut().script.extend(behaviors);
        self
    }

    /// Fail the first `probes` reachability probes.
    pub fn unreachable_for(mut self, probes: usize) -> Self {
        self.state.get_mut().unreachable_probes = probes;
        self
    }

    /// Queue one more behaviour at runtime.
    pub async fn push(&self, behavior: SimBehavior) {
        self.state.lock().await.script.push_back(behavior);
    }

    /// Every goal submitted so far, including rejected ones.
    pub async fn submitted(&self) -> Vec<NavigationGoal> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn cancel_count(&self) -> usize {
        self.state.lock().await.cancel_count
    }

    pub async fn probe_count(&self) -> usize {
        self.state.lock().await.probe_count
    }

    /// Goals accepted but not yet resolved.
    pub async fn active_goals(&self) -> usize {
        self.state.lock().await.goals.len()
    }

    fn travel_time(&self, from: Waypoint, to: Waypoint) -> Duration {
        let distance = (to.x - from.x).hypot(to.y - from.y);
        Duration::from_secs_f64(distance / self.speed)
    }
}

impl Default for SimNavigator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionGateway for SimNavigator {
    async fn wait_for_server(&self, timeout: Duration) -> bool {
        let reachable = {
            let mut state = self.state.lock().await;
            state.probe_count += 1;
            state.probe_count > state.unreachable_probes
        };
        if !reachable {
            tokio::time::sleep(timeout).await;
        }
        reachable
    }

    async fn send_goal(&self, goal: NavigationGoal) -> Result<GoalResponse, PatrolError> {
        let mut state = self.state.lock().await;
        state.submitted.push(goal.clone());
        let behavior = match state.script.pop_front() {
            Some(behavior) => behavior,
            None => SimBehavior::Succeed {
                after: self.travel_time(state.position, goal.waypoint),
            },
        };
        if behavior == SimBehavior::Reject {
            debug!(waypoint = %goal.waypoint, "sim rejected goal");
            return Ok(GoalResponse::Rejected);
        }
        let handle = GoalHandle::new();
        state.goals.insert(
            handle,
            SimGoal {
                behavior,
                target: goal.waypoint,
                accepted_at: Instant::now(),
                cancel: Arc::new(Notify::new()),
            },
        );
        debug!(waypoint = %goal.waypoint, ?behavior, "sim accepted goal");
        Ok(GoalResponse::Accepted(handle))
    }

    async fn get_result(&self, handle: GoalHandle) -> Result<GoalStatus, PatrolError> {
        let (behavior, target, accepted_at, cancel) = {
            let state = self.state.lock().await;
            let goal = state
                .goals
                .get(&handle)
                .ok_or_else(|| PatrolError::Gateway(format!("unknown goal {handle}")))?;
            (goal.behavior, goal.target, goal.accepted_at, Arc::clone(&goal.cancel))
        };

        let status = match behavior {
            SimBehavior::Succeed { after } => tokio::select! {
                _ = tokio::time::sleep_until(accepted_at + after) => GoalStatus::Succeeded,
                _ = cancel.notified() => GoalStatus::Canceled,
            },
            SimBehavior::Abort { after } => tokio::select! {
                _ = tokio::time::sleep_until(accepted_at + after) => GoalStatus::Aborted,
                _ = cancel.notified() => GoalStatus::Canceled,
            },
            SimBehavior::Hang => {
                cancel.notified().await;
                GoalStatus::Canceled
            }
            SimBehavior::IgnoreCancel { after } => {
                tokio::time::sleep_until(accepted_at + after).await;
                GoalStatus::Succeeded
            }
            SimBehavior::Reject => {
                return Err(PatrolError::Gateway(format!("goal {handle} was rejected")));
            }
        };

        let mut state = self.state.lock().await;
        state.goals.remove(&handle);
        if status == GoalStatus::Succeeded {
            state.position = target;
        }
        Ok(status)
    }

    async fn cancel_goal(&self, handle: GoalHandle) -> Result<CancelAck, PatrolError> {
        let mut state = self.state.lock().await;
        state.cancel_count += 1;
        match state.goals.get(&handle) {
            Some(goal) if !matches!(goal.behavior, SimBehavior::IgnoreCancel { .. }) => {
                // notify_one stores a permit, so a cancel that lands before
                // get_result starts waiting is not lost.
                goal.cancel.notify_one();
                Ok(CancelAck::Accepted)
            }
            _ => Ok(CancelAck::Rejected),
        }
    }
}
