//! Outbound event channel for one chat turn.
//!
//! The reasoning loop writes [`StreamChunk`]s through a [`StreamEmitter`]
//! and polls [`StreamEmitter::is_closed`] before each suspension point. The
//! HTTP layer drains the receiving half into server-sent events; dropping
//! the receiver (client disconnect) is what flips the closed flag.

use ragloop_core::models::StreamChunk;
use tokio::sync::mpsc;

pub trait StreamEmitter: Send + Sync {
    /// Once `true`, stays `true`.
    fn is_closed(&self) -> bool;

    /// Append a chunk. Emitting on a closed stream is a no-op.
    fn emit(&self, chunk: StreamChunk);
}

/// [`StreamEmitter`] over an unbounded tokio channel.
pub struct ChannelEmitter {
    sender: mpsc::UnboundedSender<StreamChunk>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamChunk>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl StreamEmitter for ChannelEmitter {
    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn emit(&self, chunk: StreamChunk) {
        if self.sender.send(chunk).is_err() {
            tracing::debug!("stream receiver dropped; chunk discarded");
        }
    }
}
