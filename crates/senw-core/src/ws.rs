//! Live log transport over a websocket.

use crate::error::EngineResult;
use crate::traits::{LogConnector, LogFeed};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl LogConnector for WsConnector {
    async fn connect(&self) -> EngineResult<LogFeed> {
        let (socket, response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        tracing::debug!(url = %self.url, status = %response.status(), "log socket open");

        let feed = stream::unfold(Some(socket), |socket| async move {
            let mut socket = socket?;
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => return Some((Ok(text), Some(socket))),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => return Some((Ok(text), Some(socket))),
                        Err(e) => tracing::warn!("dropping non-UTF-8 log frame: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "log socket closed by server");
                        return None;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some((Err(e.into()), None)),
                    None => return None,
                }
            }
        });
        Ok(feed.boxed())
    }
}
