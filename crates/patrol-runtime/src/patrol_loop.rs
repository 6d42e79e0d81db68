//! [`PatrolLoop`] – the driver that keeps the robot walking its cycle.
//!
//! One task owns every piece of mutable patrol state (sequencer, supervisor,
//! schedule) and reacts to four event sources in a single `select!`:
//!
//! 1. **Shutdown** – a `watch` flag; the in-flight goal is cancelled on a
//!    best-effort basis and the loop returns.
//! 2. **Gateway inbox** – every call into the [`ActionGateway`] runs in its
//!    own task and posts its answer back here, tagged with the goal session
//!    it belongs to.
//! 3. **Deadline check** – a periodic tick fed to the [`GoalSupervisor`].
//! 4. **Dispatch timer** – when armed, starts the probe-then-submit sequence
//!    for the waypoint under the cursor.  The settling pause between goals is
//!    just this timer armed in the future.
//!
//! Nothing in the loop body blocks, so a hung navigation service can stall a
//! goal but never the deadline check.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use patrol_middleware::{SimNavigator, UdpTelemetryEmitter};
//! use patrol_runtime::patrol_loop::{PatrolLoop, PatrolLoopConfig};
//!
//! # async fn demo() -> Result<(), patrol_types::PatrolError> {
//! let emitter = UdpTelemetryEmitter::bind("127.0.0.1:5005".parse().unwrap()).await?;
//! let mut patrol = PatrolLoop::new(
//!     PatrolLoopConfig::default(),
//!     Arc::new(SimNavigator::new()),
//!     Arc::new(emitter),
//! )?;
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! patrol.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use patrol_kernel::sequencer::REFERENCE_ROUTE;
use patrol_kernel::{DeadlinePolicy, Effect, GoalSupervisor, SupervisorEvent, WaypointSequencer};
use patrol_middleware::{ActionGateway, EventBus, TelemetryEmitter};
use patrol_types::{
    Event, EventPayload, GoalHandle, GoalOutcome, GoalReport, GoalResponse, GoalStatus, NavigationGoal,
    PatrolError, Waypoint,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::streak_guard::StreakGuard;

/// `source` tag on every event this loop publishes.
pub const EVENT_SOURCE: &str = "patrol-runtime::patrol_loop";

/// Upper bound on the shutdown cancel request.
const SHUTDOWN_CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Everything the driver needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PatrolLoopConfig {
    /// The cycle, visited in order and repeated forever.
    pub waypoints: Vec<Waypoint>,
    pub deadlines: DeadlinePolicy,
    /// Reference frame stamped on every goal.
    pub frame_id: String,
    /// Period of the deadline check.
    pub check_period: Duration,
    /// Pause between one goal finishing and the next being submitted.
    pub settle_delay: Duration,
    /// Bound on a single reachability probe.
    pub server_probe_timeout: Duration,
    /// Consecutive failures before the loop starts warning.  Zero disables.
    pub failure_streak_threshold: usize,
}

impl Default for PatrolLoopConfig {
    fn default() -> Self {
        Self {
            waypoints: REFERENCE_ROUTE.to_vec(),
            deadlines: DeadlinePolicy::reference(),
            frame_id: "map".to_string(),
            check_period: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            server_probe_timeout: Duration::from_secs(5),
            failure_streak_threshold: 3,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway inbox
// ────────────────────────────────────────────────────────────────────────────

/// What spawned gateway tasks report back to the loop.
#[derive(Debug)]
enum Inbox {
    /// Reachability probe number `probe` succeeded.
    ServerReady { probe: u64 },
    /// A response for goal session `session_id`.
    Response {
        session_id: u64,
        event: SupervisorEvent,
    },
    /// A gateway call failed; the matching `Response` follows separately.
    Fault { message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// PatrolLoop
// ────────────────────────────────────────────────────────────────────────────

/// Drives the patrol cycle against an [`ActionGateway`].
pub struct PatrolLoop {
    frame_id: String,
    check_period: Duration,
    settle_delay: Duration,
    server_probe_timeout: Duration,
    sequencer: WaypointSequencer,
    deadlines: DeadlinePolicy,
    supervisor: GoalSupervisor,
    streak: StreakGuard,
    gateway: Arc<dyn ActionGateway>,
    emitter: Arc<dyn TelemetryEmitter>,
    bus: EventBus,
    outbox: mpsc::UnboundedSender<Inbox>,
    inbox: Option<mpsc::UnboundedReceiver<Inbox>>,
    /// When the next probe-then-submit starts.  `None` while a goal or a
    /// probe is in progress.
    next_dispatch: Option<Instant>,
    /// The running probe task, if any.
    probe: Option<JoinHandle<()>>,
    /// Number of the latest probe; older `ServerReady`s are stale.
    probe_seq: u64,
}

impl PatrolLoop {
    /// Build a driver positioned at the first waypoint.
    ///
    /// # Errors
    ///
    /// * [`PatrolError::EmptyCycle`] / [`PatrolError::InvalidWaypoint`] – the
    ///   cycle is unusable.
    /// * [`PatrolError::Config`] – the check period or probe timeout is zero.
    pub fn new(
        config: PatrolLoopConfig,
        gateway: Arc<dyn ActionGateway>,
        emitter: Arc<dyn TelemetryEmitter>,
    ) -> Result<Self, PatrolError> {
        if config.check_period.is_zero() {
            return Err(PatrolError::Config("check period must be positive".to_string()));
        }
        if config.server_probe_timeout.is_zero() {
            return Err(PatrolError::Config(
                "server probe timeout must be positive".to_string(),
            ));
        }
        let sequencer = WaypointSequencer::new(config.waypoints)?;
        let (outbox, inbox) = mpsc::unbounded_channel();
        Ok(Self {
            frame_id: config.frame_id,
            check_period: config.check_period,
            settle_delay: config.settle_delay,
            server_probe_timeout: config.server_probe_timeout,
            sequencer,
            deadlines: config.deadlines,
            supervisor: GoalSupervisor::new(),
            streak: StreakGuard::new(config.failure_streak_threshold),
            gateway,
            emitter,
            bus: EventBus::default(),
            outbox,
            inbox: Some(inbox),
            next_dispatch: None,
            probe: None,
            probe_seq: 0,
        })
    }

    /// Replace the internal bus, e.g. to share one with other components.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Handle for observing lifecycle events.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Index of the waypoint that will be (or is being) visited.
    pub fn cursor(&self) -> usize {
        self.sequencer.index()
    }

    /// Completed passes over the whole cycle.
    pub fn laps(&self) -> u64 {
        self.sequencer.laps()
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// The loop may be run again afterwards; it resumes at the cursor.
    ///
    /// # Errors
    ///
    /// [`PatrolError::Channel`] if the gateway inbox has gone missing.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PatrolError> {
        let mut inbox = self
            .inbox
            .take()
            .ok_or_else(|| PatrolError::Channel("patrol loop inbox unavailable".to_string()))?;

        let mut deadline_check = tokio::time::interval(self.check_period);
        deadline_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            waypoints = self.sequencer.len(),
            frame_id = %self.frame_id,
            "patrol started"
        );
        self.next_dispatch = Some(Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let dispatch_at = self.next_dispatch;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
                Some(message) = inbox.recv() => {
                    self.handle_inbox(message);
                }
                _ = deadline_check.tick() => {
                    let effects = self.supervisor.on_tick(now());
                    self.apply(effects);
                }
                _ = tokio::time::sleep_until(dispatch_at.unwrap_or_else(Instant::now)), if dispatch_at.is_some() => {
                    self.next_dispatch = None;
                    self.spawn_probe();
                }
            }
        }

        self.stop_probe();
        self.shutdown_cancel().await;
        self.inbox = Some(inbox);
        info!(laps = self.sequencer.laps(), "patrol stopped");
        Ok(())
    }

    // ── Inbox handling ──────────────────────────────────────────────────────

    fn handle_inbox(&mut self, message: Inbox) {
        match message {
            Inbox::ServerReady { probe } => {
                if probe != self.probe_seq {
                    debug!(probe, latest = self.probe_seq, "ignoring stale probe result");
                    return;
                }
                self.probe = None;
                if let Err(e) = self.submit_current() {
                    error!(error = %e, "could not open goal session");
                    self.schedule_next();
                }
            }
            Inbox::Response { session_id, event } => {
                let effects = self.supervisor.on_event(session_id, event, now());
                self.apply(effects);
            }
            Inbox::Fault { message } => {
                warn!(%message, "navigation gateway fault");
                self.publish(EventPayload::GatewayFault { message });
            }
        }
    }

    fn submit_current(&mut self) -> Result<(), PatrolError> {
        let index = self.sequencer.index();
        let waypoint = self.sequencer.current();
        let deadline = self.deadlines.timeout_for(index);
        let session_id = self.supervisor.begin(index, waypoint, deadline, now())?;

        info!(
            waypoint = index + 1,
            x = waypoint.x,
            y = waypoint.y,
            yaw = waypoint.yaw,
            timeout_s = deadline.as_secs_f64(),
            "sending goal"
        );
        self.publish(EventPayload::GoalSent {
            waypoint_index: index,
            waypoint,
            deadline,
        });

        let goal = NavigationGoal::new(self.frame_id.clone(), waypoint);
        let gateway = Arc::clone(&self.gateway);
        let outbox = self.outbox.clone();
        // A service that never answers the submission must not hold the
        // cycle; after the goal's own deadline it counts as a rejection.
        tokio::spawn(async move {
            let fault = |message: String| {
                let _ = outbox.send(Inbox::Fault { message });
                SupervisorEvent::Rejected
            };
            let event = match tokio::time::timeout(deadline, gateway.send_goal(goal)).await {
                Ok(Ok(GoalResponse::Accepted(handle))) => SupervisorEvent::Accepted(handle),
                Ok(Ok(GoalResponse::Rejected)) => SupervisorEvent::Rejected,
                Ok(Err(e)) => fault(format!("goal submission failed: {e}")),
                Err(_) => fault(format!(
                    "no answer to goal submission within {:.1}s",
                    deadline.as_secs_f64()
                )),
            };
            let _ = outbox.send(Inbox::Response { session_id, event });
        });
        Ok(())
    }

    // ── Effects ─────────────────────────────────────────────────────────────

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::AwaitResult(handle) => {
                    let (session_id, index) = match self.supervisor.session() {
                        Some(s) => (s.id, s.waypoint_index),
                        None => continue,
                    };
                    info!(waypoint = index + 1, goal = %handle, "goal accepted");
                    self.publish(EventPayload::GoalAccepted {
                        waypoint_index: index,
                        handle,
                    });
                    self.spawn_result(session_id, handle);
                }
                Effect::DeadlineExpired {
                    waypoint_index,
                    elapsed,
                } => {
                    warn!(
                        waypoint = waypoint_index + 1,
                        elapsed_s = elapsed.as_secs_f64(),
                        "goal exceeded its deadline, cancelling"
                    );
                    self.publish(EventPayload::DeadlineExpired {
                        waypoint_index,
                        elapsed,
                    });
                }
                Effect::Cancel(handle) => self.spawn_cancel(handle),
                Effect::Finished(report) => self.finish(report),
            }
        }
    }

    fn finish(&mut self, report: GoalReport) {
        let waypoint = report.waypoint_index + 1;
        let elapsed_s = report.elapsed.as_secs_f64();
        match report.outcome {
            GoalOutcome::Completed => {
                info!(waypoint, elapsed_s, outcome = %report.outcome, "waypoint reached")
            }
            GoalOutcome::Rejected => {
                warn!(waypoint, outcome = %report.outcome, "goal rejected by navigation server");
                self.publish(EventPayload::GoalRejected {
                    waypoint_index: report.waypoint_index,
                });
            }
            _ => warn!(
                waypoint,
                elapsed_s,
                outcome = %report.outcome,
                status = ?report.final_status,
                "goal ended without reaching waypoint"
            ),
        }

        if report.outcome.was_attempted() {
            self.emitter.notify(&report.waypoint);
        }

        if let Some(count) = self.streak.record(report.outcome) {
            warn!(count, "consecutive goals failed");
            self.publish(EventPayload::FailureStreak { count });
        }

        self.sequencer.advance();
        if self.sequencer.index() == 0 {
            let laps = self.sequencer.laps();
            info!(laps, "patrol cycle complete, starting over");
            self.publish(EventPayload::CycleWrapped { laps });
        }

        self.publish(EventPayload::GoalFinished(report));
        self.schedule_next();
    }

    fn schedule_next(&mut self) {
        self.next_dispatch = Some(Instant::now() + self.settle_delay);
    }

    // ── Gateway tasks ───────────────────────────────────────────────────────

    fn spawn_probe(&mut self) {
        self.stop_probe();
        let probe = self.probe_seq;
        let gateway = Arc::clone(&self.gateway);
        let outbox = self.outbox.clone();
        let timeout = self.server_probe_timeout;
        self.probe = Some(tokio::spawn(async move {
            while !gateway.wait_for_server(timeout).await {
                info!("waiting for navigation server");
            }
            let _ = outbox.send(Inbox::ServerReady { probe });
        }));
    }

    /// Abort the running probe and invalidate any answer it already posted.
    fn stop_probe(&mut self) {
        if let Some(task) = self.probe.take() {
            task.abort();
        }
        self.probe_seq += 1;
    }

    fn spawn_result(&self, session_id: u64, handle: GoalHandle) {
        let gateway = Arc::clone(&self.gateway);
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            let status = match gateway.get_result(handle).await {
                Ok(status) => status,
                Err(e) => {
                    let _ = outbox.send(Inbox::Fault {
                        message: format!("result for goal {handle} failed: {e}"),
                    });
                    GoalStatus::Aborted
                }
            };
            let _ = outbox.send(Inbox::Response {
                session_id,
                event: SupervisorEvent::Result(status),
            });
        });
    }

    fn spawn_cancel(&self, handle: GoalHandle) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            match gateway.cancel_goal(handle).await {
                Ok(ack) => debug!(goal = %handle, ?ack, "cancel acknowledged"),
                Err(e) => warn!(goal = %handle, error = %e, "cancel request failed"),
            }
        });
    }

    async fn shutdown_cancel(&mut self) {
        let Some(session) = self.supervisor.abandon() else {
            return;
        };
        let Some(handle) = session.handle else {
            return;
        };
        info!(waypoint = session.waypoint_index + 1, goal = %handle, "cancelling goal in flight");
        match tokio::time::timeout(SHUTDOWN_CANCEL_TIMEOUT, self.gateway.cancel_goal(handle)).await {
            Ok(Ok(ack)) => debug!(?ack, "shutdown cancel acknowledged"),
            Ok(Err(e)) => warn!(error = %e, "shutdown cancel failed"),
            Err(_) => warn!("shutdown cancel timed out"),
        }
    }

    fn publish(&self, payload: EventPayload) {
        self.bus.emit(Event::new(EVENT_SOURCE, payload));
    }
}

/// The supervisor's clock.  Derived from tokio's so paused-time tests apply.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrol_middleware::SimNavigator;

    struct Silent;

    impl TelemetryEmitter for Silent {
        fn notify(&self, _waypoint: &Waypoint) {}
    }

    fn build(config: PatrolLoopConfig) -> Result<PatrolLoop, PatrolError> {
        PatrolLoop::new(config, Arc::new(SimNavigator::new()), Arc::new(Silent))
    }

    #[test]
    fn default_config_matches_reference_route() {
        let config = PatrolLoopConfig::default();
        assert_eq!(config.waypoints.len(), 10);
        assert_eq!(config.check_period, Duration::from_secs(1));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.server_probe_timeout, Duration::from_secs(5));
        assert_eq!(config.frame_id, "map");
    }

    #[test]
    fn empty_cycle_is_rejected() {
        let config = PatrolLoopConfig {
            waypoints: Vec::new(),
            ..PatrolLoopConfig::default()
        };
        assert!(matches!(build(config), Err(PatrolError::EmptyCycle)));
    }

    #[test]
    fn zero_check_period_is_rejected() {
        let config = PatrolLoopConfig {
            check_period: Duration::ZERO,
            ..PatrolLoopConfig::default()
        };
        assert!(matches!(build(config), Err(PatrolError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_immediately_when_already_shut_down() {
        let mut patrol = build(PatrolLoopConfig::default()).unwrap();
        let (_tx, rx) = watch::channel(true);
        patrol.run(rx).await.unwrap();
        assert_eq!(patrol.cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_loop() {
        let mut patrol = build(PatrolLoopConfig::default()).unwrap();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        patrol.run(rx).await.unwrap();
    }
}
