//! Connected-client records and the transport seam.
//!
//! The session core never touches a WebSocket directly: it talks to a
//! pair of wire traits. The HTTP layer adapts a real socket; tests plug
//! in channel-backed fakes.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use protocol::{encode_server, ServerMessage};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// Opaque client identifier, generated by the connection upgrader.
pub type ClientId = String;

/// Transport failure on a client channel.
#[derive(Debug, Error)]
pub enum WireError {
    /// Outbound frame could not be delivered.
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound read failed.
    #[error("receive failed: {0}")]
    Recv(String),
}

/// Outbound half of a client channel.
#[async_trait]
pub trait WireSender: Send + Sync {
    /// Delivers one text frame.
    async fn send_text(&mut self, frame: String) -> Result<(), WireError>;

    /// Closes the channel, optionally with a graceful close reason.
    async fn close(&mut self, reason: Option<String>) -> Result<(), WireError>;
}

/// Inbound half of a client channel.
#[async_trait]
pub trait WireReceiver: Send {
    /// Next inbound text frame. `None` means the peer is gone.
    async fn recv_text(&mut self) -> Option<Result<String, WireError>>;
}

/// One connected client.
///
/// All writes to the channel serialize through the sender lock; the
/// controller flag is atomically published so the input-arbitration
/// check can read it without taking the set lock.
pub struct Client {
    id: ClientId,
    controller: AtomicBool,
    sender: Mutex<Box<dyn WireSender>>,
}

impl Client {
    pub(crate) fn new(id: ClientId, sender: Box<dyn WireSender>) -> Self {
        Client {
            id,
            controller: AtomicBool::new(false),
            sender: Mutex::new(sender),
        }
    }

    /// This client's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this client currently holds the controller role.
    pub fn is_controller(&self) -> bool {
        self.controller.load(Ordering::SeqCst)
    }

    pub(crate) fn set_controller(&self, value: bool) {
        self.controller.store(value, Ordering::SeqCst);
    }

    /// Acquires the channel write lock directly. Used where a caller
    /// must pin message ordering across another operation.
    pub(crate) async fn lock_sender(&self) -> MutexGuard<'_, Box<dyn WireSender>> {
        self.sender.lock().await
    }

    /// Serializes and delivers one envelope.
    pub(crate) async fn send_msg(&self, msg: &ServerMessage) -> Result<(), WireError> {
        let frame = encode_server(msg).map_err(|e| WireError::Send(e.to_string()))?;
        self.send_frame(&frame).await
    }

    /// Delivers a pre-encoded frame.
    pub(crate) async fn send_frame(&self, frame: &str) -> Result<(), WireError> {
        self.sender.lock().await.send_text(frame.to_owned()).await
    }

    /// Closes the channel, ignoring transport errors.
    pub(crate) async fn close_channel(&self, reason: Option<&str>) {
        let _ = self
            .sender
            .lock()
            .await
            .close(reason.map(str::to_owned))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingSender(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl WireSender for RecordingSender {
        async fn send_text(&mut self, frame: String) -> Result<(), WireError> {
            self.0
                .send(frame)
                .map_err(|e| WireError::Send(e.to_string()))
        }

        async fn close(&mut self, _reason: Option<String>) -> Result<(), WireError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn controller_flag_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new("c1".into(), Box::new(RecordingSender(tx)));
        assert!(!client.is_controller());
        client.set_controller(true);
        assert!(client.is_controller());
    }

    #[tokio::test]
    async fn send_msg_serializes_envelope() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client::new("c1".into(), Box::new(RecordingSender(tx)));
        client
            .send_msg(&ServerMessage::Output("hey".into()))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"output","data":"hey"}"#);
    }

    #[tokio::test]
    async fn send_surfaces_channel_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = Client::new("c1".into(), Box::new(RecordingSender(tx)));
        assert!(client.send_frame("{}").await.is_err());
    }
}
