use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A planned target pose: one stop in the repeating patrol cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    /// Heading in radians.
    pub yaw: f64,
}

impl Waypoint {
    pub const fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }

    /// `true` when every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.yaw.is_finite()
    }

    /// Text sent in a coordinate notification, e.g. `"-1.35, 0.28, 0.99"`.
    pub fn telemetry_payload(&self) -> String {
        self.to_string()
    }

    /// Planar yaw as a unit quaternion `(x, y, z, w)`.
    pub fn orientation(&self) -> (f64, f64, f64, f64) {
        let half = self.yaw / 2.0;
        (0.0, 0.0, half.sin(), half.cos())
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.yaw)
    }
}

/// Target pose submitted to the navigation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationGoal {
    /// Reference frame of the pose (normally `"map"`).
    pub frame_id: String,
    pub waypoint: Waypoint,
}

impl NavigationGoal {
    pub fn new(frame_id: impl Into<String>, waypoint: Waypoint) -> Self {
        Self {
            frame_id: frame_id.into(),
            waypoint,
        }
    }
}

/// Opaque reference to a goal held by the navigation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalHandle(pub Uuid);

impl GoalHandle {
    /// Generate a fresh random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The service's answer to a submitted goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalResponse {
    Accepted(GoalHandle),
    Rejected,
}

/// Terminal status reported by the navigation service.
///
/// Wire codes follow `action_msgs/msg/GoalStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalStatus {
    Succeeded,
    Canceled,
    /// The service gave up on the goal (service-side failure).
    Aborted,
}

impl GoalStatus {
    pub fn code(&self) -> i8 {
        match self {
            GoalStatus::Succeeded => 4,
            GoalStatus::Canceled => 5,
            GoalStatus::Aborted => 6,
        }
    }

    /// Map a terminal `action_msgs/GoalStatus` code; non-terminal codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            4 => Some(GoalStatus::Succeeded),
            5 => Some(GoalStatus::Canceled),
            6 => Some(GoalStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalStatus::Succeeded => write!(f, "SUCCEEDED"),
            GoalStatus::Canceled => write!(f, "CANCELED"),
            GoalStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Acknowledgement of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelAck {
    Accepted,
    Rejected,
}

/// Lifecycle state of the goal currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalState {
    Sent,
    Accepted,
    Rejected,
    Completed,
    Cancelling,
    CancelConfirmed,
}

impl GoalState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalState::Rejected | GoalState::Completed | GoalState::CancelConfirmed
        )
    }
}

/// How a finished goal is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalOutcome {
    /// The service reached the waypoint before the deadline.
    Completed,
    /// The deadline expired and the goal was cancelled by the patrol.
    TimedOut,
    /// The service refused the goal.
    Rejected,
    /// The service aborted the goal on its own.
    Aborted,
    /// The goal was cancelled by someone other than the patrol.
    Canceled,
}

impl GoalOutcome {
    /// `true` when the service took the goal on (anything but a rejection).
    pub fn was_attempted(&self) -> bool {
        !matches!(self, GoalOutcome::Rejected)
    }
}

impl fmt::Display for GoalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GoalOutcome::Completed => "completed",
            GoalOutcome::TimedOut => "timed out",
            GoalOutcome::Rejected => "rejected",
            GoalOutcome::Aborted => "aborted",
            GoalOutcome::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Summary of a goal session, produced exactly once when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalReport {
    pub session_id: u64,
    pub waypoint_index: usize,
    pub waypoint: Waypoint,
    pub outcome: GoalOutcome,
    pub final_state: GoalState,
    /// Terminal status from the service, absent for rejected goals.
    pub final_status: Option<GoalStatus>,
    /// Time between submission and the terminal signal.
    pub elapsed: Duration,
}

/// Envelope for everything published on the patrol event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "patrol-runtime::patrol_loop"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Lifecycle notifications routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    GoalSent {
        waypoint_index: usize,
        waypoint: Waypoint,
        deadline: Duration,
    },
    GoalAccepted {
        waypoint_index: usize,
        handle: GoalHandle,
    },
    GoalRejected {
        waypoint_index: usize,
    },
    DeadlineExpired {
        waypoint_index: usize,
        elapsed: Duration,
    },
    GoalFinished(GoalReport),
    /// The cursor wrapped back to the first waypoint.
    CycleWrapped {
        laps: u64,
    },
    /// `count` goals in a row ended without reaching their waypoint.
    FailureStreak {
        count: usize,
    },
    GatewayFault {
        message: String,
    },
}

/// Error type shared by every patrol crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatrolError {
    #[error("Waypoint cycle is empty")]
    EmptyCycle,

    #[error("Waypoint {index} has a non-finite coordinate")]
    InvalidWaypoint { index: usize },

    #[error("Invalid deadline: {0}")]
    InvalidDeadline(String),

    #[error("Waypoint {index} is claimed by more than one deadline rule")]
    OverlappingDeadlineRule { index: usize },

    #[error("Goal session {session_id} is still in flight")]
    GoalInFlight { session_id: u64 },

    #[error("Navigation gateway error: {0}")]
    Gateway(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
