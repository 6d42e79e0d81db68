//! [`GoalSupervisor`] – lifecycle state machine for the goal in flight.
//!
//! ```text
//!  Idle ──begin──▶ Sent ──Accepted──▶ Accepted ──Result──▶ Completed
//!                   │                    │
//!                   │                    └─Tick (overdue)─▶ Cancelling ──Result──▶ CancelConfirmed
//!                   └──Rejected──▶ Rejected
//! ```
//!
//! Two independent signal sources drive the machine: the navigation
//! service (acceptance, rejection, terminal result) and the periodic
//! deadline tick.  They may race.  The supervisor tolerates this by
//! cancelling at most once per session (the `timed_out` flag is one-shot)
//! and by ending the session on the first terminal result it sees.
//!
//! [`step`] is the transition function: a pure map from `(session, event,
//! now)` to `(next session, effects)`.  [`GoalSupervisor`] wraps it with
//! session bookkeeping so that at most one session exists at any time and
//! responses belonging to an older session are discarded.

use std::time::{Duration, Instant};

use patrol_types::{
    GoalHandle, GoalOutcome, GoalReport, GoalState, GoalStatus, PatrolError, Waypoint,
};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// State of the single goal currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalSession {
    /// Monotonic session number, used to discard stale service responses.
    pub id: u64,
    pub waypoint_index: usize,
    pub waypoint: Waypoint,
    pub sent_at: Instant,
    pub deadline: Duration,
    /// Known once the service has accepted the goal.
    pub handle: Option<GoalHandle>,
    /// Set exactly once, when the deadline check first finds the goal overdue.
    pub timed_out: bool,
    pub state: GoalState,
}

impl GoalSession {
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }

    /// `true` once strictly more than `deadline` has passed since submission.
    pub fn is_overdue(&self, now: Instant) -> bool {
        self.elapsed(now) > self.deadline
    }

    fn report(&self, outcome: GoalOutcome, final_status: Option<GoalStatus>, now: Instant) -> GoalReport {
        GoalReport {
            session_id: self.id,
            waypoint_index: self.waypoint_index,
            waypoint: self.waypoint,
            outcome,
            final_state: self.state,
            final_status,
            elapsed: self.elapsed(now),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events and effects
// ────────────────────────────────────────────────────────────────────────────

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The service accepted the goal.
    Accepted(GoalHandle),
    /// The service refused the goal.
    Rejected,
    /// The result ticket resolved.
    Result(GoalStatus),
    /// Periodic deadline check.
    Tick,
}

/// Work the caller must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start waiting for the terminal result of `handle`.
    AwaitResult(GoalHandle),
    /// The deadline passed; reported once per session.
    DeadlineExpired {
        waypoint_index: usize,
        elapsed: Duration,
    },
    /// Ask the service to abort `handle`.  Fire-and-forget.
    Cancel(GoalHandle),
    /// The session ended and has been dropped.
    Finished(GoalReport),
}

// ────────────────────────────────────────────────────────────────────────────
// Transition function
// ────────────────────────────────────────────────────────────────────────────

/// Apply `event` to `session`.
///
/// Returns the session to keep (`None` once it reached a terminal state) and
/// the effects to execute.  Events that make no sense in the current state
/// (duplicates, results before acceptance, ticks while already cancelling)
/// leave the session untouched and produce no effects.
pub fn step(
    mut session: GoalSession,
    event: SupervisorEvent,
    now: Instant,
) -> (Option<GoalSession>, Vec<Effect>) {
    match (session.state, event) {
        (GoalState::Sent, SupervisorEvent::Accepted(handle)) => {
            session.handle = Some(handle);
            let mut effects = vec![Effect::AwaitResult(handle)];
            if session.timed_out {
                // Deadline passed before the service answered; the cancel was
                // deferred until now because there was no handle to cancel.
                session.state = GoalState::Cancelling;
                effects.push(Effect::Cancel(handle));
            } else {
                session.state = GoalState::Accepted;
            }
            (Some(session), effects)
        }
        (GoalState::Sent, SupervisorEvent::Rejected) => {
            session.state = GoalState::Rejected;
            let report = session.report(GoalOutcome::Rejected, None, now);
            (None, vec![Effect::Finished(report)])
        }
        (GoalState::Sent | GoalState::Accepted, SupervisorEvent::Tick)
            if !session.timed_out && session.is_overdue(now) =>
        {
            session.timed_out = true;
            let mut effects = vec![Effect::DeadlineExpired {
                waypoint_index: session.waypoint_index,
                elapsed: session.elapsed(now),
            }];
            if let Some(handle) = session.handle {
                session.state = GoalState::Cancelling;
                effects.push(Effect::Cancel(handle));
            }
            (Some(session), effects)
        }
        (GoalState::Accepted, SupervisorEvent::Result(status)) => {
            session.state = GoalState::Completed;
            let outcome = outcome_for(status, session.timed_out);
            let report = session.report(outcome, Some(status), now);
            (None, vec![Effect::Finished(report)])
        }
        (GoalState::Cancelling, SupervisorEvent::Result(status)) => {
            session.state = GoalState::CancelConfirmed;
            let report = session.report(GoalOutcome::TimedOut, Some(status), now);
            (None, vec![Effect::Finished(report)])
        }
        _ => (Some(session), Vec::new()),
    }
}

/// Reported outcome for a terminal `status`.  Once the deadline flag is set
/// the goal is reported as timed out whatever the service says.
fn outcome_for(status: GoalStatus, timed_out: bool) -> GoalOutcome {
    if timed_out {
        return GoalOutcome::TimedOut;
    }
    match status {
        GoalStatus::Succeeded => GoalOutcome::Completed,
        GoalStatus::Canceled => GoalOutcome::Canceled,
        GoalStatus::Aborted => GoalOutcome::Aborted,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GoalSupervisor
// ────────────────────────────────────────────────────────────────────────────

/// Owns the (at most one) in-flight [`GoalSession`].
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use patrol_kernel::supervisor::{Effect, GoalSupervisor, SupervisorEvent};
/// use patrol_types::{GoalHandle, GoalOutcome, GoalStatus, Waypoint};
///
/// let mut sup = GoalSupervisor::new();
/// let t0 = Instant::now();
/// let id = sup
///     .begin(0, Waypoint::new(0.0, 0.0, 0.0), Duration::from_secs(10), t0)
///     .unwrap();
///
/// let handle = GoalHandle::new();
/// sup.on_event(id, SupervisorEvent::Accepted(handle), t0);
/// let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Succeeded), t0 + Duration::from_secs(2));
///
/// assert!(matches!(&effects[0], Effect::Finished(r) if r.outcome == GoalOutcome::Completed));
/// assert!(sup.is_idle());
/// ```
#[derive(Debug, Default)]
pub struct GoalSupervisor {
    session: Option<GoalSession>,
    next_id: u64,
}

impl GoalSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for the goal just submitted (`Idle → Sent`).
    ///
    /// Returns the new session id, which tags every later service response.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::GoalInFlight`] when a session is already open.
    pub fn begin(
        &mut self,
        waypoint_index: usize,
        waypoint: Waypoint,
        deadline: Duration,
        now: Instant,
    ) -> Result<u64, PatrolError> {
        if let Some(current) = &self.session {
            return Err(PatrolError::GoalInFlight {
                session_id: current.id,
            });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.session = Some(GoalSession {
            id,
            waypoint_index,
            waypoint,
            sent_at: now,
            deadline,
            handle: None,
            timed_out: false,
            state: GoalState::Sent,
        });
        debug!(session_id = id, waypoint = waypoint_index + 1, "goal session opened");
        Ok(id)
    }

    /// Feed a service response for session `session_id`.
    ///
    /// Responses for any other session are stale and ignored.
    pub fn on_event(&mut self, session_id: u64, event: SupervisorEvent, now: Instant) -> Vec<Effect> {
        match self.session.take() {
            Some(session) if session.id == session_id => {
                let (next, effects) = step(session, event, now);
                self.session = next;
                effects
            }
            other => {
                debug!(session_id, event = ?event, "dropping response for a closed session");
                self.session = other;
                Vec::new()
            }
        }
    }

    /// Run the periodic deadline check against the open session, if any.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.session.take() {
            Some(session) => {
                let (next, effects) = step(session, SupervisorEvent::Tick, now);
                self.session = next;
                effects
            }
            None => Vec::new(),
        }
    }

    /// Drop the open session without a report.  Used on shutdown.
    pub fn abandon(&mut self) -> Option<GoalSession> {
        self.session.take()
    }

    pub fn session(&self) -> Option<&GoalSession> {
        self.session.as_ref()
    }

    /// `true` when no goal is in flight.
    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(10);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn open(sup: &mut GoalSupervisor, t0: Instant) -> u64 {
        sup.begin(1, Waypoint::new(1.0, 1.0, 1.0), DEADLINE, t0).unwrap()
    }

    fn finished(effects: &[Effect]) -> &GoalReport {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Finished(r) => Some(r),
                _ => None,
            })
            .expect("expected a Finished effect")
    }

    fn cancel_count(effects: &[Effect]) -> usize {
        effects.iter().filter(|e| matches!(e, Effect::Cancel(_))).count()
    }

    #[test]
    fn begin_opens_sent_session() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let session = sup.session().unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.state, GoalState::Sent);
        assert!(!session.timed_out);
        assert_eq!(session.sent_at, t0);
        assert!(!sup.is_idle());
    }

    #[test]
    fn second_begin_while_in_flight_fails() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let err = sup
            .begin(2, Waypoint::new(0.0, 0.0, 0.0), DEADLINE, t0)
            .unwrap_err();
        assert_eq!(err, PatrolError::GoalInFlight { session_id: id });
    }

    #[test]
    fn session_ids_increase() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let first = open(&mut sup, t0);
        sup.on_event(first, SupervisorEvent::Rejected, t0);
        let second = open(&mut sup, t0);
        assert!(second > first);
    }

    #[test]
    fn accepted_goal_awaits_result() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let handle = GoalHandle::new();
        let effects = sup.on_event(id, SupervisorEvent::Accepted(handle), t0);
        assert_eq!(effects, vec![Effect::AwaitResult(handle)]);
        assert_eq!(sup.session().unwrap().state, GoalState::Accepted);
        assert_eq!(sup.session().unwrap().handle, Some(handle));
    }

    #[test]
    fn rejection_finishes_session() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let effects = sup.on_event(id, SupervisorEvent::Rejected, t0 + secs(1));
        let report = finished(&effects);
        assert_eq!(report.outcome, GoalOutcome::Rejected);
        assert_eq!(report.final_state, GoalState::Rejected);
        assert_eq!(report.final_status, None);
        assert_eq!(report.waypoint_index, 1);
        assert!(sup.is_idle());
    }

    #[test]
    fn success_before_deadline_is_completed() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Succeeded), t0 + secs(2));
        let report = finished(&effects);
        assert_eq!(report.outcome, GoalOutcome::Completed);
        assert_eq!(report.final_state, GoalState::Completed);
        assert_eq!(report.final_status, Some(GoalStatus::Succeeded));
        assert_eq!(report.elapsed, secs(2));
        assert!(sup.is_idle());
    }

    #[test]
    fn tick_within_deadline_does_nothing() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        assert!(sup.on_tick(t0 + secs(5)).is_empty());
        // Exactly at the deadline is not yet overdue.
        assert!(sup.on_tick(t0 + DEADLINE).is_empty());
        assert!(!sup.session().unwrap().timed_out);
    }

    #[test]
    fn overdue_tick_cancels_exactly_once() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let handle = GoalHandle::new();
        sup.on_event(id, SupervisorEvent::Accepted(handle), t0);

        let effects = sup.on_tick(t0 + secs(11));
        assert_eq!(
            effects,
            vec![
                Effect::DeadlineExpired {
                    waypoint_index: 1,
                    elapsed: secs(11)
                },
                Effect::Cancel(handle),
            ]
        );
        assert_eq!(sup.session().unwrap().state, GoalState::Cancelling);
        assert!(sup.session().unwrap().timed_out);

        let mut cancels = 0;
        for s in 12..30 {
            cancels += cancel_count(&sup.on_tick(t0 + secs(s)));
        }
        assert_eq!(cancels, 0, "no further cancel requests after the first");
    }

    #[test]
    fn cancel_confirmation_reports_timed_out() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        sup.on_tick(t0 + secs(11));
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Canceled), t0 + secs(12));
        let report = finished(&effects);
        assert_eq!(report.outcome, GoalOutcome::TimedOut);
        assert_eq!(report.final_state, GoalState::CancelConfirmed);
        assert_eq!(report.final_status, Some(GoalStatus::Canceled));
        assert!(sup.is_idle());
    }

    #[test]
    fn success_racing_a_late_cancel_still_reports_timed_out() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        sup.on_tick(t0 + secs(11));
        // The service had already finished when the cancel reached it.
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Succeeded), t0 + secs(11));
        let report = finished(&effects);
        assert_eq!(report.outcome, GoalOutcome::TimedOut);
        assert_eq!(report.final_status, Some(GoalStatus::Succeeded));
    }

    #[test]
    fn success_then_redundant_tick_issues_no_cancel() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Succeeded), t0 + secs(9));
        assert_eq!(finished(&effects).outcome, GoalOutcome::Completed);

        // The deadline check fires after the session already ended.
        let late = sup.on_tick(t0 + secs(11));
        assert!(late.is_empty());
        let late = sup.on_event(id, SupervisorEvent::Tick, t0 + secs(12));
        assert!(late.is_empty());
    }

    #[test]
    fn deadline_before_acceptance_defers_cancel_until_handle_known() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);

        let effects = sup.on_tick(t0 + secs(11));
        assert_eq!(
            effects,
            vec![Effect::DeadlineExpired {
                waypoint_index: 1,
                elapsed: secs(11)
            }]
        );
        assert_eq!(sup.session().unwrap().state, GoalState::Sent);

        let handle = GoalHandle::new();
        let effects = sup.on_event(id, SupervisorEvent::Accepted(handle), t0 + secs(12));
        assert_eq!(
            effects,
            vec![Effect::AwaitResult(handle), Effect::Cancel(handle)]
        );
        assert_eq!(sup.session().unwrap().state, GoalState::Cancelling);
        assert_eq!(cancel_count(&sup.on_tick(t0 + secs(13))), 0);
    }

    #[test]
    fn deadline_before_rejection_still_reports_rejected() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        sup.on_tick(t0 + secs(11));
        let effects = sup.on_event(id, SupervisorEvent::Rejected, t0 + secs(12));
        assert_eq!(finished(&effects).outcome, GoalOutcome::Rejected);
    }

    #[test]
    fn aborted_and_external_cancel_are_distinct_outcomes() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();

        let id = open(&mut sup, t0);
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Aborted), t0 + secs(3));
        assert_eq!(finished(&effects).outcome, GoalOutcome::Aborted);

        let id = open(&mut sup, t0 + secs(5));
        sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0 + secs(5));
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Canceled), t0 + secs(6));
        assert_eq!(finished(&effects).outcome, GoalOutcome::Canceled);
    }

    #[test]
    fn stale_session_responses_are_ignored() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let old = open(&mut sup, t0);
        sup.on_event(old, SupervisorEvent::Rejected, t0);
        let current = open(&mut sup, t0 + secs(2));

        let effects = sup.on_event(old, SupervisorEvent::Accepted(GoalHandle::new()), t0 + secs(3));
        assert!(effects.is_empty());
        let session = sup.session().unwrap();
        assert_eq!(session.id, current);
        assert_eq!(session.state, GoalState::Sent);
    }

    #[test]
    fn result_before_acceptance_is_ignored() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let effects = sup.on_event(id, SupervisorEvent::Result(GoalStatus::Succeeded), t0);
        assert!(effects.is_empty());
        assert_eq!(sup.session().unwrap().state, GoalState::Sent);
    }

    #[test]
    fn duplicate_acceptance_is_ignored() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let handle = GoalHandle::new();
        sup.on_event(id, SupervisorEvent::Accepted(handle), t0);
        let effects = sup.on_event(id, SupervisorEvent::Accepted(GoalHandle::new()), t0);
        assert!(effects.is_empty());
        assert_eq!(sup.session().unwrap().handle, Some(handle));
    }

    #[test]
    fn tick_without_session_is_noop() {
        let mut sup = GoalSupervisor::new();
        assert!(sup.on_tick(Instant::now()).is_empty());
    }

    #[test]
    fn abandon_drops_session() {
        let mut sup = GoalSupervisor::new();
        let t0 = Instant::now();
        let id = open(&mut sup, t0);
        let dropped = sup.abandon().unwrap();
        assert_eq!(dropped.id, id);
        assert!(sup.is_idle());
    }

    #[test]
    fn step_is_pure() {
        let t0 = Instant::now();
        let session = GoalSession {
            id: 1,
            waypoint_index: 0,
            waypoint: Waypoint::new(0.0, 0.0, 0.0),
            sent_at: t0,
            deadline: DEADLINE,
            handle: Some(GoalHandle::new()),
            timed_out: false,
            state: GoalState::Accepted,
        };
        let a = step(session.clone(), SupervisorEvent::Tick, t0 + secs(11));
        let b = step(session, SupervisorEvent::Tick, t0 + secs(11));
        assert_eq!(a, b);
    }
}
