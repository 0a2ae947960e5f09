//! Remote connection abstraction for the terminal bridge.
//!
//! A connection is used as two independent halves so each copy direction can
//! own one. The WebSocket implementation lives in the server crate; tests use
//! channel-backed halves.

use crate::error::LmiResult;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiving half of a remote connection.
pub trait FrameSource: Send {
    /// Receive the next message payload. `Ok(None)` means the peer closed.
    fn recv(&mut self) -> BoxFuture<'_, LmiResult<Option<Vec<u8>>>>;
}

/// Sending half of a remote connection.
pub trait FrameSink: Send {
    /// Send one opaque binary frame.
    fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, LmiResult<()>>;

    /// Send a human-readable text frame.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, LmiResult<()>>;

    /// Close the connection from this side.
    fn close(&mut self) -> BoxFuture<'_, LmiResult<()>>;
}
