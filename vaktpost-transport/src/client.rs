//! Capture side of the stream.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use vaktpost_core::events::{FlowRecord, Verdict};

use crate::wire::{read_frame, write_line, Frame, Reply, DEFAULT_MAX_LINE_BYTES};
use crate::TransportError;

/// How long a submitted record may wait for its reply unless configured.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// A verdict echoes the submitted record, so replies get headroom over requests.
const MAX_REPLY_BYTES: usize = 2 * DEFAULT_MAX_LINE_BYTES;

/// One open stream to the verdict service.
///
/// Requests are strictly paired with replies, so a client is used by one
/// task at a time.
pub struct TransportClient {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    reply_timeout: Duration,
}

impl TransportClient {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            })?
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(read),
            writer,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Submit one record and wait for its verdict.
    ///
    /// [`TransportError::Rejected`] leaves the stream usable; any other error
    /// means the connection should be dropped.
    pub async fn classify(&mut self, record: &FlowRecord) -> Result<Verdict, TransportError> {
        write_line(&mut self.writer, record).await?;
        let timeout = self.reply_timeout;
        let frame = tokio::time::timeout(timeout, read_frame(&mut self.reader, MAX_REPLY_BYTES))
            .await
            .map_err(|_| TransportError::ReplyTimeout {
                addr: self.addr.clone(),
                timeout,
            })??
            .ok_or(TransportError::Closed)?;
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Invalid(reason) => return Err(TransportError::InvalidReply(reason)),
        };
        match serde_json::from_str::<Reply>(&line)? {
            Reply::Verdict(verdict) => Ok(verdict),
            Reply::Rejected { reason } => Err(TransportError::Rejected(reason)),
        }
    }
}
