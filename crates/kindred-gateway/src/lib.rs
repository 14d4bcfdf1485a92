pub mod connection;
pub mod dispatcher;
pub mod fanout;
pub mod pusher;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

pub use dispatcher::Dispatcher;
pub use fanout::{Fanout, FanoutError, Notifier};

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

/// `GET /gateway`: the WebSocket endpoint sessions use to follow their
/// personal channel.
pub fn router(dispatcher: Dispatcher, jwt_secret: String) -> Router {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState { dispatcher, jwt_secret })
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.jwt_secret))
}
