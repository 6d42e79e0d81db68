//! rosbridge-style WebSocket gateway to a navigation action server.
//!
//! [`NavBridgeGateway`] keeps one WebSocket open and multiplexes every goal
//! over it.  The framing borrows the rosbridge action ops and adds two
//! optional replies of its own:
//!
//! | Direction | `op` | Fields |
//! |---|---|---|
//! | out | `send_action_goal` | `id`, `action`, `action_type`, `args.pose`, `feedback` |
//! | out | `cancel_action_goal` | `id`, `action` |
//! | in | `action_feedback` | `id` |
//! | in | `action_result` | `id`, `status` (4, 5 or 6) |
//! | in | `action_goal_response` | `id`, `accepted` (optional) |
//! | in | `cancel_action_response` | `id`, `accepted` (optional) |
//!
//! A server that never sends the optional replies still works: the first
//! `action_feedback` or `action_result` for a goal counts as acceptance, and
//! an `action_result` for a goal being cancelled counts as the cancel
//! answer (accepted when the status is 5).
//!
//! The goal `id` doubles as the [`GoalHandle`].  A single link task owns the
//! socket; callers park on oneshot channels registered in a shared pending
//! table.  When the link drops, the table is cleared, every parked caller
//! sees [`PatrolError::Transport`], and the next
//! [`wait_for_server`][ActionGateway::wait_for_server] reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use patrol_types::{CancelAck, GoalHandle, GoalResponse, GoalStatus, NavigationGoal, PatrolError};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::gateway::ActionGateway;

type BridgeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ────────────────────────────────────────────────────────────────────────────
// Wire format
// ────────────────────────────────────────────────────────────────────────────

/// A decoded frame from the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    GoalResponse { id: Uuid, accepted: bool },
    Feedback { id: Uuid },
    Result { id: Uuid, status: GoalStatus },
    CancelResponse { id: Uuid, accepted: bool },
}

/// Decode one text frame.
///
/// Returns `None` for frames this gateway does not care about: unknown ops,
/// foreign ids, malformed JSON and non-terminal status codes.
pub fn parse_inbound(text: &str) -> Option<Inbound> {
    let json: Value = serde_json::from_str(text).ok()?;
    let op = json.get("op")?.as_str()?;
    let id = json.get("id")?.as_str().and_then(|s| Uuid::parse_str(s).ok())?;
    match op {
        "action_goal_response" => Some(Inbound::GoalResponse {
            id,
            accepted: json.get("accepted")?.as_bool()?,
        }),
        "action_feedback" => Some(Inbound::Feedback { id }),
        "action_result" => {
            let code = json.get("status")?.as_i64()?;
            let status = GoalStatus::from_code(code)?;
            Some(Inbound::Result { id, status })
        }
        "cancel_action_response" => Some(Inbound::CancelResponse {
            id,
            accepted: json.get("accepted")?.as_bool()?,
        }),
        _ => None,
    }
}

/// `send_action_goal` frame for `goal`, tagged with `id`.
pub fn goal_frame(id: Uuid, action: &str, action_type: &str, goal: &NavigationGoal) -> String {
    let (qx, qy, qz, qw) = goal.waypoint.orientation();
    json!({
        "op": "send_action_goal",
        "id": id.to_string(),
        "action": action,
        "action_type": action_type,
        "feedback": true,
        "args": {
            "pose": {
                "header": { "frame_id": goal.frame_id },
                "pose": {
                    "position": { "x": goal.waypoint.x, "y": goal.waypoint.y, "z": 0.0 },
                    "orientation": { "x": qx, "y": qy, "z": qz, "w": qw }
                }
            }
        }
    })
    .to_string()
}

/// `cancel_action_goal` frame for the goal tagged `id`.
pub fn cancel_frame(id: Uuid, action: &str) -> String {
    json!({
        "op": "cancel_action_goal",
        "id": id.to_string(),
        "action": action,
    })
    .to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Pending table
// ────────────────────────────────────────────────────────────────────────────

enum ResultSlot {
    /// `get_result` is parked on this sender.
    Waiting(oneshot::Sender<GoalStatus>),
    /// The result arrived before anyone asked for it.
    Ready(GoalStatus),
}

#[derive(Default)]
struct Pending {
    responses: HashMap<Uuid, oneshot::Sender<bool>>,
    results: HashMap<Uuid, ResultSlot>,
    cancels: HashMap<Uuid, oneshot::Sender<bool>>,
}

impl Pending {
    fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::GoalResponse { id, accepted } => {
                if let Some(tx) = self.responses.remove(&id) {
                    let _ = tx.send(accepted);
                }
            }
            Inbound::Feedback { id } => {
                if let Some(tx) = self.responses.remove(&id) {
                    let _ = tx.send(true);
                }
            }
            Inbound::Result { id, status } => {
                // A result implies the goal was taken on.
                if let Some(tx) = self.responses.remove(&id) {
                    let _ = tx.send(true);
                }
                if let Some(tx) = self.cancels.remove(&id) {
                    let _ = tx.send(status == GoalStatus::Canceled);
                }
                match self.results.remove(&id) {
                    Some(ResultSlot::Waiting(tx)) => {
                        let _ = tx.send(status);
                    }
                    _ => {
                        self.results.insert(id, ResultSlot::Ready(status));
                    }
                }
            }
            Inbound::CancelResponse { id, accepted } => {
                if let Some(tx) = self.cancels.remove(&id) {
                    let _ = tx.send(accepted);
                }
            }
        }
    }

    /// Drop every registration.  Parked callers observe a closed channel.
    fn clear(&mut self) {
        self.responses.clear();
        self.results.clear();
        self.cancels.clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NavBridgeGateway
// ────────────────────────────────────────────────────────────────────────────

/// [`ActionGateway`] backed by a rosbridge WebSocket.
pub struct NavBridgeGateway {
    url: String,
    action_name: String,
    action_type: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Arc<Mutex<Pending>>,
}

impl NavBridgeGateway {
    /// Create a gateway for the action `action_name` of type `action_type`
    /// served at `url` (e.g. `"ws://localhost:9090"`).  No connection is made
    /// until the first probe.
    pub fn new(
        url: impl Into<String>,
        action_name: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            action_name: action_name.into(),
            action_type: action_type.into(),
            outbound: Mutex::new(None),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` while the link task is running.
    pub async fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn connect(&self) -> Result<(), PatrolError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PatrolError::Transport(format!("connect to {}: {e}", self.url)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(stream, rx, Arc::clone(&self.pending), self.url.clone()));
        *self.outbound.lock().await = Some(tx);
        info!(url = %self.url, "navigation bridge connected");
        Ok(())
    }

    async fn send_frame(&self, frame: String) -> Result<(), PatrolError> {
        let guard = self.outbound.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| PatrolError::Transport("navigation bridge not connected".to_string()))?;
        tx.send(frame)
            .map_err(|_| PatrolError::Transport("navigation bridge connection lost".to_string()))
    }
}

#[async_trait]
impl ActionGateway for NavBridgeGateway {
    async fn wait_for_server(&self, timeout: Duration) -> bool {
        if self.is_connected().await {
            return true;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        match tokio::time::timeout(timeout, self.connect()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "probe failed");
                // Refused connections fail fast; hold the caller for the
                // whole probe window so retries stay paced.
                tokio::time::sleep_until(deadline).await;
                false
            }
            Err(_) => false,
        }
    }

    #[instrument(skip(self, goal), fields(x = goal.waypoint.x, y = goal.waypoint.y))]
    async fn send_goal(&self, goal: NavigationGoal) -> Result<GoalResponse, PatrolError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.responses.insert(id, tx);

        let frame = goal_frame(id, &self.action_name, &self.action_type, &goal);
        if let Err(e) = self.send_frame(frame).await {
            self.pending.lock().await.responses.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(true) => Ok(GoalResponse::Accepted(GoalHandle(id))),
            Ok(false) => Ok(GoalResponse::Rejected),
            Err(_) => Err(PatrolError::Transport(
                "connection lost before goal response".to_string(),
            )),
        }
    }

    async fn get_result(&self, handle: GoalHandle) -> Result<GoalStatus, PatrolError> {
        let rx = {
            let mut pending = self.pending.lock().await;
            if let Some(ResultSlot::Ready(status)) = pending.results.remove(&handle.0) {
                return Ok(status);
            }
            let (tx, rx) = oneshot::channel();
            pending.results.insert(handle.0, ResultSlot::Waiting(tx));
            rx
        };
        if !self.is_connected().await {
            self.pending.lock().await.results.remove(&handle.0);
            return Err(PatrolError::Transport(
                "navigation bridge not connected".to_string(),
            ));
        }
        rx.await.map_err(|_| {
            PatrolError::Transport(format!("connection lost before result for goal {handle}"))
        })
    }

    async fn cancel_goal(&self, handle: GoalHandle) -> Result<CancelAck, PatrolError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.cancels.insert(handle.0, tx);

        if let Err(e) = self.send_frame(cancel_frame(handle.0, &self.action_name)).await {
            self.pending.lock().await.cancels.remove(&handle.0);
            return Err(e);
        }

        match rx.await {
            Ok(true) => Ok(CancelAck::Accepted),
            Ok(false) => Ok(CancelAck::Rejected),
            Err(_) => Err(PatrolError::Transport(
                "connection lost before cancel response".to_string(),
            )),
        }
    }
}

/// Own the socket until either side hangs up.
async fn run_link(
    stream: BridgeStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    pending: Arc<Mutex<Pending>>,
    url: String,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        warn!(url = %url, error = %e, "bridge send failed");
                        break;
                    }
                }
                // Gateway dropped.
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_inbound(text.as_str()) {
                    Some(inbound) => pending.lock().await.dispatch(inbound),
                    None => debug!(frame = %text.as_str(), "ignoring bridge frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "bridge receive failed");
                    break;
                }
                _ => {}
            },
        }
    }

    outbound.close();
    pending.lock().await.clear();
    warn!(url = %url, "navigation bridge disconnected");
}
