//! Transport seam between a relay link and the network.
//!
//! A link only ever needs a sink of outgoing text frames and a stream of
//! incoming ones. Keeping that behind [`Connector`] lets the link run against
//! a real websocket or an in-memory relay without changes.

use crate::error::{ClientError, Result};
use crate::message::RelayUrl;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// One websocket frame as a link sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A protocol message
    Text(String),
    /// Liveness probe
    Ping,
    /// Answer to a ping
    Pong,
}

/// Outgoing frames.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ClientError> + Send>>;

/// Incoming frames. An error or the end of the stream means the transport
/// is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Opens transports to relays.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &RelayUrl) -> Result<(FrameSink, FrameStream)>;
}

/// Websocket transport over tokio-tungstenite (rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &RelayUrl) -> Result<(FrameSink, FrameStream)> {
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;
        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| ClientError::WebSocket(e.to_string()))
            .with(|frame: Frame| {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Ping => Message::Ping(Vec::new().into()),
                    Frame::Pong => Message::Pong(Vec::new().into()),
                };
                future::ok::<_, ClientError>(message)
            });

        let relay = url.clone();
        let stream = read.filter_map(move |message| {
            let frame = match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                // tungstenite queues the pong reply itself; the ping still proves the peer is alive.
                Ok(Message::Ping(_)) => Some(Ok(Frame::Ping)),
                Ok(Message::Pong(_)) => Some(Ok(Frame::Pong)),
                Ok(Message::Close(frame)) => {
                    debug!("Relay {} sent close frame: {:?}", relay, frame);
                    Some(Err(ClientError::Closed))
                }
                // Binary frames are not part of the protocol.
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::WebSocket(e.to_string()))),
            };
            future::ready(frame)
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
