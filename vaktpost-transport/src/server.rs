//! Verdict service side of the stream.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};
use vaktpost_core::events::{FlowRecord, Verdict};

use crate::wire::{read_frame, write_line, Frame, Reply, DEFAULT_MAX_LINE_BYTES};
use crate::TransportError;

/// Turns one received flow record into a verdict.
///
/// An `Err` rejects only that record; the connection keeps serving.
#[async_trait]
pub trait Classifier: Send + Sync {
    type Error: Display + Send;

    async fn classify(&self, record: FlowRecord) -> Result<Verdict, Self::Error>;
}

#[async_trait]
impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    type Error = T::Error;

    async fn classify(&self, record: FlowRecord) -> Result<Verdict, Self::Error> {
        (**self).classify(record).await
    }
}

pub struct TransportServer {
    listener: TcpListener,
    max_line_bytes: usize,
}

impl TransportServer {
    /// Bind the listening socket. Failure here is fatal for the service.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        })
    }

    /// Longer lines are rejected without being buffered.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves. Every connection gets
    /// its own task; records on one connection are answered in order.
    pub async fn serve<C, F>(self, classifier: Arc<C>, shutdown: F) -> Result<(), TransportError>
    where
        C: Classifier + 'static,
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        info!(%local, "Verdict stream listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Verdict stream shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let classifier = Arc::clone(&classifier);
                        let max_line_bytes = self.max_line_bytes;
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, peer, classifier, max_line_bytes).await
                            {
                                warn!(%peer, error = %e, "Stream terminated");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        }
    }
}

#[instrument(name = "flow_stream", skip(stream, classifier), fields(peer = %peer))]
async fn handle_connection<C>(
    stream: TcpStream,
    peer: SocketAddr,
    classifier: Arc<C>,
    max_line_bytes: usize,
) -> Result<(), TransportError>
where
    C: Classifier + 'static,
{
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut answered = 0u64;

    while let Some(frame) = read_frame(&mut reader, max_line_bytes).await? {
        let reply = match frame {
            Frame::Invalid(reason) => {
                warn!(%reason, "Unreadable flow record");
                Reply::rejected(format!("malformed flow record: {reason}"))
            }
            Frame::Line(line) if line.trim().is_empty() => continue,
            Frame::Line(line) => match serde_json::from_str::<FlowRecord>(&line) {
                Ok(record) => match classifier.classify(record).await {
                    Ok(verdict) => Reply::Verdict(verdict),
                    Err(e) => {
                        warn!(error = %e, "Classification failed");
                        Reply::rejected(e.to_string())
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Malformed flow record");
                    Reply::rejected(format!("malformed flow record: {e}"))
                }
            },
        };
        write_line(&mut write, &reply).await?;
        answered += 1;
    }

    debug!(answered, "Stream closed by client");
    Ok(())
}
