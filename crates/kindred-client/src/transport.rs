use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use kindred_types::events::{GatewayCommand, GatewayFrame, UserEvent};

use crate::error::ClientError;
use crate::manager::ConnectConfig;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can open an authenticated realtime connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection for `config.user_id`, authenticated with its token.
    async fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn Link>, ClientError>;
}

/// One open connection.
#[async_trait]
pub trait Link: Send {
    /// Subscribe to a channel; resolves once the server has accepted.
    async fn subscribe(&mut self, channel: &str) -> Result<(), ClientError>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), ClientError>;

    /// Next event on a subscribed channel. `None` once the connection is gone.
    /// Must be cancel-safe.
    async fn next_event(&mut self) -> Option<UserEvent>;

    async fn close(&mut self);
}

/// Transport over the server's `/gateway` WebSocket.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    url: String,
}

impl GatewayTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// `http://host:port` -> `ws://host:port/gateway`
    pub fn from_http_base(base: &str) -> Self {
        let ws = base
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Self::new(format!("{ws}/gateway"))
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn Link>, ClientError> {
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        let mut link = GatewayLink { ws };
        link.send(&GatewayCommand::Identify {
            token: config.token.clone(),
        })
        .await?;

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, link.next_frame()).await {
            Ok(Some(GatewayFrame::Ready { user_id })) if user_id == config.user_id => {
                debug!("Gateway ready for {}", user_id);
                Ok(Box::new(link))
            }
            Ok(Some(GatewayFrame::Ready { user_id })) => Err(ClientError::Handshake(format!(
                "token identifies {user_id}, expected {}",
                config.user_id
            ))),
            Ok(Some(other)) => Err(ClientError::Handshake(format!("unexpected frame {other:?}"))),
            Ok(None) => Err(ClientError::Handshake("connection closed before Ready".into())),
            Err(_) => Err(ClientError::Handshake("timed out waiting for Ready".into())),
        }
    }
}

struct GatewayLink {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewayLink {
    async fn send(&mut self, cmd: &GatewayCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(cmd)?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ClientError::Closed)
    }

    async fn next_frame(&mut self) -> Option<GatewayFrame> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<GatewayFrame>(&text) {
                    Ok(frame) => return Some(frame),
                    Err(e) => warn!("Unreadable gateway frame: {}", e),
                },
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }
}

#[async_trait]
impl Link for GatewayLink {
    async fn subscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        self.send(&GatewayCommand::Subscribe {
            channel: channel.to_string(),
        })
        .await?;

        loop {
            match self.next_frame().await.ok_or(ClientError::Closed)? {
                GatewayFrame::Subscribed { channel: c } if c == channel => return Ok(()),
                GatewayFrame::Error { message } => return Err(ClientError::Protocol(message)),
                other => debug!("Ignoring {:?} while subscribing", other),
            }
        }
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        self.send(&GatewayCommand::Unsubscribe {
            channel: channel.to_string(),
        })
        .await
    }

    async fn next_event(&mut self) -> Option<UserEvent> {
        loop {
            match self.next_frame().await? {
                GatewayFrame::Event { event, .. } => return Some(event),
                GatewayFrame::Error { message } => warn!("Gateway error: {}", message),
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_from_http_base() {
        assert_eq!(
            GatewayTransport::from_http_base("http://127.0.0.1:3000/").url,
            "ws://127.0.0.1:3000/gateway"
        );
        assert_eq!(
            GatewayTransport::from_http_base("https://kindred.example").url,
            "wss://kindred.example/gateway"
        );
    }
}
