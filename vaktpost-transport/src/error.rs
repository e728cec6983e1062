use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The server did not answer in time. The stream must be dropped since
    /// a late reply would pair with the next request.
    #[error("no reply from {addr} within {timeout:?}")]
    ReplyTimeout { addr: String, timeout: Duration },

    #[error("unreadable reply: {0}")]
    InvalidReply(String),

    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stream codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The server refused to classify this record. The stream stays usable.
    #[error("record rejected: {0}")]
    Rejected(String),

    #[error("stream closed by peer")]
    Closed,
}
