use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::events::{GatewayCommand, GatewayFrame, parse_user_channel};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Sink = SplitSink<WebSocket, Message>;

/// Handle a single WebSocket connection: Identify handshake, then relay the
/// user's channel until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", name, user_id);

    if send_frame(&mut sender, &GatewayFrame::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, &dispatcher, user_id).await;

    dispatcher.release(user_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn run_connection_loop(
    mut sender: Sink,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
) {
    // Subscribed to the user's channel?
    let mut channel_rx: Option<broadcast::Receiver<Arc<str>>> = None;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => {
                            let reply = handle_command(dispatcher, user_id, cmd, &mut channel_rx).await;
                            if let Some(frame) = reply {
                                if send_frame(&mut sender, &frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(
                                "{} bad command: {} -- raw: {}",
                                user_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                        }
                    },
                    Message::Pong(_) => pong_received = true,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            relayed = next_relayed(&mut channel_rx) => {
                let json = match relayed {
                    Ok(json) => json,
                    Err(RecvError::Lagged(n)) => {
                        warn!("{} lagged by {} events", user_id, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Next frame from the subscribed channel; never resolves while unsubscribed.
async fn next_relayed(rx: &mut Option<broadcast::Receiver<Arc<str>>>) -> Result<Arc<str>, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    cmd: GatewayCommand,
    channel_rx: &mut Option<broadcast::Receiver<Arc<str>>>,
) -> Option<GatewayFrame> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::Subscribe { channel } => {
            if parse_user_channel(&channel) != Some(user_id) {
                warn!("{} tried to subscribe to foreign channel {}", user_id, channel);
                return Some(GatewayFrame::Error {
                    message: format!("not allowed to subscribe to {channel}"),
                });
            }
            if channel_rx.is_none() {
                *channel_rx = Some(dispatcher.subscribe(user_id).await);
                debug!("{} subscribed to {}", user_id, channel);
            }
            Some(GatewayFrame::Subscribed { channel })
        }

        GatewayCommand::Unsubscribe { channel } => {
            if parse_user_channel(&channel) == Some(user_id) && channel_rx.take().is_some() {
                dispatcher.release(user_id).await;
                debug!("{} unsubscribed from {}", user_id, channel);
            }
            None
        }
    }
}

async fn send_frame(sender: &mut Sink, frame: &GatewayFrame) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|e| warn!("Failed to encode frame: {}", e))?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use kindred_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.name));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
