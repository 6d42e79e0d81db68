//! Best-effort coordinate notifications.
//!
//! Each finished waypoint is announced with one UDP datagram carrying
//! `"x, y, yaw"`.  No acknowledgement, no retry, no back-pressure: a failed
//! send is logged and forgotten.

use std::net::SocketAddr;

use patrol_types::{PatrolError, Waypoint};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Announces finished waypoints to whoever is listening.
pub trait TelemetryEmitter: Send + Sync {
    /// Fire-and-forget.  Must not block.
    fn notify(&self, waypoint: &Waypoint);
}

/// [`TelemetryEmitter`] that sends one datagram per waypoint to a fixed
/// target.
#[derive(Debug)]
pub struct UdpTelemetryEmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTelemetryEmitter {
    /// Bind an ephemeral local socket for sending to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Transport`] if the local socket cannot be bound.
    pub async fn bind(target: SocketAddr) -> Result<Self, PatrolError> {
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| PatrolError::Transport(format!("telemetry bind error: {e}")))?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl TelemetryEmitter for UdpTelemetryEmitter {
    fn notify(&self, waypoint: &Waypoint) {
        let payload = waypoint.telemetry_payload();
        match self.socket.try_send_to(payload.as_bytes(), self.target) {
            Ok(_) => debug!(target_addr = %self.target, %payload, "coordinates sent"),
            Err(e) => warn!(target_addr = %self.target, error = %e, "telemetry send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn datagram_carries_coordinate_text() -> Result<(), Box<dyn std::error::Error>> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let emitter = UdpTelemetryEmitter::bind(receiver.local_addr()?).await?;

        emitter.notify(&Waypoint::new(-1.35, 0.28, 0.99));

        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf)).await??;
        assert_eq!(&buf[..n], b"-1.35, 0.28, 0.99");
        Ok(())
    }

    #[tokio::test]
    async fn send_without_listener_does_not_panic() -> Result<(), Box<dyn std::error::Error>> {
        // Reserve a port and release it so nothing is listening there.
        let target = {
            let probe = UdpSocket::bind("127.0.0.1:0").await?;
            probe.local_addr()?
        };
        let emitter = UdpTelemetryEmitter::bind(target).await?;
        emitter.notify(&Waypoint::new(0.0, 0.0, 0.0));
        emitter.notify(&Waypoint::new(1.0, 1.0, 1.0));
        assert_eq!(emitter.target(), target);
        Ok(())
    }
}
