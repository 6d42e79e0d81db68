use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::inbound::Channel;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot open data log {}: {source}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write data log {}: {source}", path.display())]
    LogWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{channel} payload is not valid UTF-8: {reason}")]
    Decode { channel: Channel, reason: String },

    #[error("cannot bind {channel} socket on {addr}: {source}")]
    Bind {
        channel: Channel,
        addr: String,
        #[source]
        source: io::Error,
    },
}
