use futures::StreamExt;
use futures::stream::BoxStream;
use infrastructure::{WsClient, WsInMessage};

use crate::error::TransportError;
use crate::sync::{Frame, StreamConnector};

/// Event stream over the gateway websocket. Each connect opens a fresh socket.
#[derive(Debug, Clone)]
pub struct WsStreamConnector {
    client: WsClient,
}

impl WsStreamConnector {
    pub fn new(client: WsClient) -> Self {
        Self { client }
    }
}

impl StreamConnector for WsStreamConnector {
    type Stream = BoxStream<'static, Result<Frame, TransportError>>;

    async fn connect(&self) -> Result<Self::Stream, TransportError> {
        tracing::debug!("Opening event stream {}", self.client.url());

        let connection = self.client.connect().await.map_err(stream_error)?;
        Ok(connection.map(to_frame).boxed())
    }
}

fn to_frame(message: anyhow::Result<WsInMessage>) -> Result<Frame, TransportError> {
    match message.map_err(stream_error)? {
        WsInMessage::Binary(bytes) => Ok(Frame::Binary(bytes)),
        WsInMessage::Text(text) => Ok(Frame::Text(text)),
    }
}

fn stream_error(e: anyhow::Error) -> TransportError {
    TransportError::Stream(format!("{:#}", e))
}
