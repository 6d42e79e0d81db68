//! End-to-end intake tests over loopback UDP.

use std::path::Path;
use std::time::Duration;

use patrol_intake::{IntakeConfig, IntakeListener};
use tokio::net::UdpSocket;
use tokio::sync::watch;

fn read_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Poll until the log holds `n` lines (header included).
async fn wait_for_rows(path: &Path, n: usize) -> Vec<String> {
    for _ in 0..200 {
        let rows = read_rows(path);
        if rows.len() >= n {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    read_rows(path)
}

#[tokio::test]
async fn reading_then_coordinate_writes_one_row() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("data_log.csv");
    let config = IntakeConfig {
        bind_host: "127.0.0.1".to_string(),
        environment_port: 0,
        coordinate_port: 0,
        log_path: log_path.clone(),
    };
    let mut listener = IntakeListener::bind(&config).await?;
    let env_addr = listener.environment_addr()?;
    let coord_addr = listener.coordinate_addr()?;

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(async move {
        listener.run(shutdown).await?;
        Ok::<_, patrol_intake::IntakeError>(listener)
    });

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    sender.send_to(b"23.4,55.1", env_addr).await?;
    // Let the reading land before the coordinate.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send_to(b"1.0, 2.0, 0.5", coord_addr).await?;

    let rows = wait_for_rows(&log_path, 2).await;
    assert_eq!(rows.len(), 2, "rows: {rows:?}");
    assert_eq!(rows[0], "Timestamp,Coordinate,\"Temperature,Humidity\"");
    assert!(
        rows[1].ends_with(",\"1.0, 2.0, 0.5\",\"23.4,55.1\""),
        "unexpected row: {}",
        rows[1]
    );

    stop.send(true)?;
    let listener = task.await??;
    assert_eq!(listener.rows_written(), 1);
    assert_eq!(listener.latest_environment(), Some("23.4,55.1"));
    Ok(())
}

#[tokio::test]
async fn bad_environment_payload_keeps_previous_reading() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("data_log.csv");
    let config = IntakeConfig {
        bind_host: "127.0.0.1".to_string(),
        environment_port: 0,
        coordinate_port: 0,
        log_path: log_path.clone(),
    };
    let mut listener = IntakeListener::bind(&config).await?;
    let env_addr = listener.environment_addr()?;
    let coord_addr = listener.coordinate_addr()?;

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(async move {
        listener.run(shutdown).await?;
        Ok::<_, patrol_intake::IntakeError>(listener)
    });

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    sender.send_to(b"21.0,40.0", env_addr).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send_to(&[0xff, 0xfe, 0xfd], env_addr).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send_to(b"3, 4, 0", coord_addr).await?;

    let rows = wait_for_rows(&log_path, 2).await;
    assert!(rows[1].ends_with(",\"3, 4, 0\",\"21.0,40.0\""), "unexpected row: {}", rows[1]);

    stop.send(true)?;
    task.await??;
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_coordinate_is_logged_lossily() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("data_log.csv");
    let config = IntakeConfig {
        bind_host: "127.0.0.1".to_string(),
        environment_port: 0,
        coordinate_port: 0,
        log_path: log_path.clone(),
    };
    let mut listener = IntakeListener::bind(&config).await?;
    let coord_addr = listener.coordinate_addr()?;

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(async move {
        listener.run(shutdown).await?;
        Ok::<_, patrol_intake::IntakeError>(listener)
    });

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    sender.send_to(b"1.0,\xff 2.0", coord_addr).await?;

    let rows = wait_for_rows(&log_path, 2).await;
    assert_eq!(rows.len(), 2, "rows: {rows:?}");
    assert!(
        rows[1].ends_with(",\"1.0,\u{fffd} 2.0\","),
        "unexpected row: {}",
        rows[1]
    );

    stop.send(true)?;
    let listener = task.await??;
    assert_eq!(listener.rows_written(), 1);
    Ok(())
}

#[tokio::test]
async fn existing_log_keeps_single_header() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("data_log.csv");
    let config = IntakeConfig {
        bind_host: "127.0.0.1".to_string(),
        environment_port: 0,
        coordinate_port: 0,
        log_path: log_path.clone(),
    };

    for coordinate in ["0, 0, 0", "1, 1, 1"] {
        let mut listener = IntakeListener::bind(&config).await?;
        listener
            .handle(patrol_intake::InboundMessage::Coordinate(coordinate.to_string()))
            .await?;
    }

    let rows = read_rows(&log_path);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|r| r.starts_with("Timestamp")).count(), 1);
    Ok(())
}
