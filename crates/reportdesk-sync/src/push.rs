//! Push channel transport.
//! Frames: JSON text `{"event": "alert_triggered", "schedule_id": .., "occurred_at": ..}`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reportdesk_core::error::{DeskError, Result};
use reportdesk_core::types::PushEvent;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// One connection's worth of events. Ends when the connection drops.
pub type PushStream = BoxStream<'static, Result<PushEvent>>;

/// Source of server-pushed events.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a new subscription.
    async fn connect(&self) -> Result<PushStream>;
}

/// WebSocket subscription to the backend's event endpoint.
pub struct WsPushTransport {
    url: String,
}

impl WsPushTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self) -> Result<PushStream> {
        tracing::info!("Connecting to push channel: {}", self.url);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| DeskError::TransportFailure(format!("WebSocket connect failed: {e}")))?;

        // Inbound only; the write half is never used.
        let (_write, read) = ws_stream.split();

        let events = futures::stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await? {
                    Ok(WsMessage::Text(text)) => match parse_frame(&text) {
                        Ok(event) => return Some((Ok(event), read)),
                        Err(e) => tracing::warn!("Failed to parse push frame: {e}"),
                    },
                    Ok(WsMessage::Ping(data)) => {
                        tracing::trace!("push ping received ({} bytes)", data.len());
                    }
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!("Push channel closed: {:?}", frame);
                        return None;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Some((
                            Err(DeskError::TransportFailure(format!("WebSocket error: {e}"))),
                            read,
                        ));
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<PushEvent> {
    Ok(serde_json::from_str(text)?)
}
