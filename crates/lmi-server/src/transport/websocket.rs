//! WebSocket halves implementing the bridge's frame traits.
//!
//! Binary and text messages both carry opaque bytes into the process.
//! Ping/pong are answered by axum and skipped here.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lmi_core::transport::BoxFuture;
use lmi_core::{FrameSink, FrameSource, LmiError, LmiResult};

/// Maximum inbound WebSocket message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub struct WsSource(SplitStream<WebSocket>);

pub struct WsSink(SplitSink<WebSocket, Message>);

/// Split an upgraded socket into bridge halves.
pub fn split(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (WsSource(stream), WsSink(sink))
}

impl FrameSource for WsSource {
    fn recv(&mut self) -> BoxFuture<'_, LmiResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.0.next().await {
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                    Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Err(e)) => {
                        return Err(LmiError::Stream(format!("WS receive failed: {e}")))
                    }
                }
            }
        })
    }
}

impl FrameSink for WsSink {
    fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, LmiResult<()>> {
        Box::pin(async move {
            self.0
                .send(Message::Binary(data))
                .await
                .map_err(|e| LmiError::Stream(format!("WS send failed: {e}")))
        })
    }

    fn send_text(&mut self, text: String) -> BoxFuture<'_, LmiResult<()>> {
        Box::pin(async move {
            self.0
                .send(Message::Text(text))
                .await
                .map_err(|e| LmiError::Stream(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, LmiResult<()>> {
        Box::pin(async move {
            self.0
                .close()
                .await
                .map_err(|e| LmiError::Stream(format!("WS close failed: {e}")))
        })
    }
}
