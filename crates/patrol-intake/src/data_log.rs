//! Append-only CSV log of visited coordinates.
//!
//! Columns: `Timestamp`, `Coordinate`, `Temperature,Humidity`.  Fields that
//! contain a comma, a double quote or a line break are wrapped in double
//! quotes with inner quotes doubled, so the last header cell and most
//! payloads come out quoted.  Records end with CRLF.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::IntakeError;

pub const HEADER: [&str; 3] = ["Timestamp", "Coordinate", "Temperature,Humidity"];

/// Local wall-clock format of the `Timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One logged coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub timestamp: String,
    pub coordinate: String,
    /// Latest environment reading, if any has arrived yet.
    pub environment: Option<String>,
}

impl LogRow {
    /// Row stamped with the current local time.
    pub fn now(coordinate: impl Into<String>, environment: Option<String>) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            coordinate: coordinate.into(),
            environment,
        }
    }

    /// The row as one CSV record, line terminator included.
    pub fn to_record(&self) -> String {
        format_record(&[
            &self.timestamp,
            &self.coordinate,
            self.environment.as_deref().unwrap_or(""),
        ])
    }
}

fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn format_record(fields: &[&str]) -> String {
    let mut record = fields
        .iter()
        .map(|f| quote_field(f))
        .collect::<Vec<_>>()
        .join(",");
    record.push_str("\r\n");
    record
}

/// Handle on the CSV file.
pub struct DataLog {
    path: PathBuf,
    file: File,
}

impl DataLog {
    /// Open `path` for appending, creating it if needed.  The header is
    /// written only when the file is empty.
    ///
    /// # Errors
    ///
    /// [`IntakeError::LogOpen`] if the file cannot be opened or the header
    /// cannot be written.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| IntakeError::LogOpen {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;
        let is_empty = file.metadata().await.map_err(open_err)?.len() == 0;

        let mut log = Self { path, file };
        if is_empty {
            log.write_durably(&format_record(&HEADER))
                .await
                .map_err(|e| match e {
                    IntakeError::LogWrite { path, source } => IntakeError::LogOpen { path, source },
                    other => other,
                })?;
        }
        Ok(log)
    }

    /// Append `row` and make sure it reached the disk before returning.
    ///
    /// # Errors
    ///
    /// [`IntakeError::LogWrite`] on any write or sync failure.
    pub async fn append(&mut self, row: &LogRow) -> Result<(), IntakeError> {
        self.write_durably(&row.to_record()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_durably(&mut self, record: &str) -> Result<(), IntakeError> {
        let write_err = |source| IntakeError::LogWrite {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(record.as_bytes()).await.map_err(write_err)?;
        self.file.flush().await.map_err(write_err)?;
        self.file.sync_data().await.map_err(write_err)?;
        Ok(())
    }
}
