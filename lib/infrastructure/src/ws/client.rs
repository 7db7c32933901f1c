use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsInMessage {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct WsClient {
    url: String,
    connect_timeout: Duration,
}

/// One open websocket session. Ends (yields `None`) when the peer closes or the socket drops;
/// control frames are consumed here and never surface as items.
pub struct WsConnection {
    url: String,
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub fn new(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_owned(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(&self) -> anyhow::Result<WsConnection> {
        let connect = tokio_tungstenite::connect_async(self.url.as_str());

        let (inner, response) = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("Timeout after {:?} connecting to {}", self.connect_timeout, self.url),
        };

        tracing::info!("WebSocket connected to {} (status {})", self.url, response.status());

        Ok(WsConnection {
            url: self.url.clone(),
            inner,
        })
    }
}

impl Stream for WsConnection {
    type Item = anyhow::Result<WsInMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let msg = match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(msg))) => msg,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            match msg {
                Message::Binary(data) => return Poll::Ready(Some(Ok(WsInMessage::Binary(data.to_vec())))),
                Message::Text(text) => return Poll::Ready(Some(Ok(WsInMessage::Text(text.as_str().to_owned())))),
                Message::Close(frame) => {
                    tracing::debug!("WebSocket to {} closed by peer: {:?}", self.url, frame);
                    return Poll::Ready(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
