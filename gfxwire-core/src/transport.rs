//! The ordered, message-framed channel to the browser.
//!
//! Binary frames carry wire messages, text frames carry JSON control
//! messages, and a close frame ends the conversation with a short
//! reason. The pipeline writes through [`TransportSink`]; how frames
//! reach the peer (WebSocket, framed TCP, an in-process channel) is up
//! to the implementation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
    Close(String),
}

impl Frame {
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close(_))
    }
}

/// Outbound half of a connection, shared by the frame and audio loops.
///
/// Implementations must keep each stream's send order; concurrent
/// callers may interleave whole messages but never split one.
#[async_trait]
pub trait TransportSink: Send + Sync + 'static {
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError>;

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Close with a human-readable reason. Later sends fail with
    /// [`TransportError::Closed`].
    async fn close(&self, reason: &str) -> Result<(), TransportError>;
}

/// A [`TransportSink`] that forwards frames into an mpsc channel.
///
/// The receiving end is typically a writer task that owns the socket.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    closed: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// A sink plus the receiver that observes everything sent to it.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    async fn push(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await?;
        Ok(())
    }
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        self.push(Frame::Binary(data)).await
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.push(Frame::Text(text)).await
    }

    async fn close(&self, reason: &str) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.tx.send(Frame::Close(reason.to_string())).await?;
        Ok(())
    }
}

/// Cut `reason` to at most `limit` bytes without splitting a character.
pub fn truncate_reason(reason: &str, limit: usize) -> &str {
    if reason.len() <= limit {
        return reason;
    }
    let mut end = limit;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::pair(8);
        sink.send_binary(Bytes::from_static(b"STFR")).await.unwrap();
        sink.send_text("{}".into()).await.unwrap();
        sink.close("bye").await.unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Binary(Bytes::from_static(b"STFR"))));
        assert_eq!(rx.recv().await, Some(Frame::Text("{}".into())));
        assert_eq!(rx.recv().await, Some(Frame::Close("bye".into())));
    }

    #[tokio::test]
    async fn sends_after_close_fail() {
        let (sink, _rx) = ChannelSink::pair(8);
        sink.close("done").await.unwrap();
        assert!(sink.is_closed());
        assert!(matches!(
            sink.send_binary(Bytes::new()).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(sink.close("again").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn dropped_receiver_is_closed() {
        let (sink, rx) = ChannelSink::pair(1);
        drop(rx);
        assert!(matches!(
            sink.send_text("x".into()).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn reason_truncation_respects_char_boundaries() {
        assert_eq!(truncate_reason("short", 120), "short");
        let long = "x".repeat(200);
        assert_eq!(truncate_reason(&long, 120).len(), 120);
        // 'é' is two bytes; a cut at 3 would split the second one.
        assert_eq!(truncate_reason("éé", 3), "é");
    }
}
