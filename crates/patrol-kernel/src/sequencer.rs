//! [`WaypointSequencer`] – the ordered patrol cycle and its cursor.

use patrol_types::{PatrolError, Waypoint};

/// The ten-stop route the patrol drives when no route is configured.
pub const REFERENCE_ROUTE: [Waypoint; 10] = [
    Waypoint::new(-1.35, 0.28, 0.99),
    Waypoint::new(3.375, 0.28, 0.99),
    Waypoint::new(3.34, -1.43, 0.01),
    Waypoint::new(-1.57, -1.43, 0.01),
    Waypoint::new(3.34, -1.43, 0.99),
    Waypoint::new(3.83, -3.02, 0.01),
    Waypoint::new(-1.44, -3.02, 0.01),
    Waypoint::new(3.83, -3.02, 0.99),
    Waypoint::new(3.375, 0.28, 0.01),
    Waypoint::new(-1.35, 0.28, 0.01),
];

/// Owns the immutable waypoint cycle and the index of the next goal.
///
/// The cycle is non-empty by construction, so [`current`][Self::current]
/// never fails.
#[derive(Debug, Clone)]
pub struct WaypointSequencer {
    waypoints: Vec<Waypoint>,
    cursor: usize,
    laps: u64,
}

impl WaypointSequencer {
    /// Build a sequencer positioned at the first waypoint.
    ///
    /// # Errors
    ///
    /// * [`PatrolError::EmptyCycle`] – `waypoints` is empty.
    /// * [`PatrolError::InvalidWaypoint`] – a coordinate is NaN or infinite.
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, PatrolError> {
        if waypoints.is_empty() {
            return Err(PatrolError::EmptyCycle);
        }
        if let Some(index) = waypoints.iter().position(|w| !w.is_finite()) {
            return Err(PatrolError::InvalidWaypoint { index });
        }
        Ok(Self {
            waypoints,
            cursor: 0,
            laps: 0,
        })
    }

    /// The waypoint under the cursor.
    pub fn current(&self) -> Waypoint {
        self.waypoints[self.cursor]
    }

    /// Move the cursor one step, wrapping to the start after the last waypoint.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.waypoints.len();
        if self.cursor == 0 {
            self.laps += 1;
        }
    }

    /// 0-based index of the waypoint under the cursor.
    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Always `false`; an empty cycle cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Number of times the cursor has wrapped back to the first waypoint.
    pub fn laps(&self) -> u64 {
        self.laps
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}
