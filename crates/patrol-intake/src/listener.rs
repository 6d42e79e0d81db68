//! [`IntakeListener`] – two UDP sockets, one CSV log.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::data_log::{DataLog, LogRow};
use crate::error::IntakeError;
use crate::inbound::{Channel, InboundMessage, decode, decode_lossy};

/// Largest datagram read in one go; longer payloads are truncated.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Where to listen and where to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub bind_host: String,
    pub environment_port: u16,
    pub coordinate_port: u16,
    pub log_path: PathBuf,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            environment_port: 5006,
            coordinate_port: 5005,
            log_path: PathBuf::from("data_log.csv"),
        }
    }
}

pub struct IntakeListener {
    environment: UdpSocket,
    coordinate: UdpSocket,
    log: DataLog,
    latest_environment: Option<String>,
    rows_written: u64,
}

impl IntakeListener {
    /// Bind both sockets and open the log.
    ///
    /// # Errors
    ///
    /// * [`IntakeError::Bind`] – a port is taken or the host is invalid.
    /// * [`IntakeError::LogOpen`] – the log cannot be opened.
    pub async fn bind(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let environment =
            bind_socket(Channel::Environment, &config.bind_host, config.environment_port).await?;
        let coordinate =
            bind_socket(Channel::Coordinate, &config.bind_host, config.coordinate_port).await?;
        let log = DataLog::open(&config.log_path).await?;
        Ok(Self {
            environment,
            coordinate,
            log,
            latest_environment: None,
            rows_written: 0,
        })
    }

    pub fn environment_addr(&self) -> Result<SocketAddr, IntakeError> {
        Ok(self.environment.local_addr()?)
    }

    pub fn coordinate_addr(&self) -> Result<SocketAddr, IntakeError> {
        Ok(self.coordinate.local_addr()?)
    }

    pub fn latest_environment(&self) -> Option<&str> {
        self.latest_environment.as_deref()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Apply one message.  Environment readings replace the cached reading;
    /// coordinates are logged and the written row is returned.
    ///
    /// # Errors
    ///
    /// [`IntakeError::LogWrite`] when the row cannot be made durable.
    pub async fn handle(&mut self, message: InboundMessage) -> Result<Option<LogRow>, IntakeError> {
        match message {
            InboundMessage::Environment(reading) => {
                debug!(%reading, "environment reading");
                self.latest_environment = Some(reading);
                Ok(None)
            }
            InboundMessage::Coordinate(coordinate) => {
                let row = LogRow::now(coordinate, self.latest_environment.clone());
                self.log.append(&row).await?;
                self.rows_written += 1;
                info!(
                    timestamp = %row.timestamp,
                    coordinate = %row.coordinate,
                    environment = row.environment.as_deref().unwrap_or("-"),
                    "coordinate logged"
                );
                Ok(Some(row))
            }
        }
    }

    /// Receive until `shutdown` turns `true` (or its sender is dropped).
    /// A row in progress is always finished first.
    ///
    /// # Errors
    ///
    /// Only log write failures end the loop early.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IntakeError> {
        let mut env_buf = [0u8; RECV_BUFFER_SIZE];
        let mut coord_buf = [0u8; RECV_BUFFER_SIZE];
        info!(
            environment = ?self.environment.local_addr().ok(),
            coordinate = ?self.coordinate.local_addr().ok(),
            log = %self.log.path().display(),
            "listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let message = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.environment.recv_from(&mut env_buf) => match received {
                    Ok((n, _)) => match decode(Channel::Environment, &env_buf[..n]) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "keeping previous environment reading");
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "environment receive failed");
                        continue;
                    }
                },
                received = self.coordinate.recv_from(&mut coord_buf) => match received {
                    Ok((n, _)) => match decode(Channel::Coordinate, &coord_buf[..n]) {
                        Ok(message) => message,
                        Err(e) => {
                            let message = decode_lossy(Channel::Coordinate, &coord_buf[..n]);
                            warn!(error = %e, text = message.text(), "coordinate was not valid UTF-8");
                            message
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "coordinate receive failed");
                        continue;
                    }
                },
            };
            self.handle(message).await?;
        }

        info!(rows = self.rows_written, "intake stopped");
        Ok(())
    }
}

async fn bind_socket(channel: Channel, host: &str, port: u16) -> Result<UdpSocket, IntakeError> {
    let addr = format!("{host}:{port}");
    UdpSocket::bind(&addr)
        .await
        .map_err(|source| IntakeError::Bind {
            channel,
            addr,
            source,
        })
}
