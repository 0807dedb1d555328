use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind, Result};

/// Outbound half of a connection.
///
/// Implementations must deliver the bytes of one `send` contiguously and in
/// order relative to other sends on the same connection.
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns `SendFailed` if the bytes cannot be handed to the connection.
    fn send(&self, bytes: Bytes) -> impl Future<Output = Result<()>> + Send;
}

impl Transport for mpsc::Sender<Bytes> {
    async fn send(&self, bytes: Bytes) -> Result<()> {
        mpsc::Sender::send(self, bytes)
            .await
            .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))
    }
}

impl Transport for mpsc::UnboundedSender<Bytes> {
    async fn send(&self, bytes: Bytes) -> Result<()> {
        mpsc::UnboundedSender::send(self, bytes)
            .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))
    }
}
