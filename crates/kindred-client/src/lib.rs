//! Client side of the kindred realtime protocol: one shared gateway
//! connection per user, local conversation state, typing signals and a
//! typed HTTP client.

pub mod api;
pub mod error;
pub mod manager;
pub mod store;
pub mod transport;
pub mod typing;

pub use api::ApiClient;
pub use error::ClientError;
pub use manager::{Callbacks, ConnectConfig, ConnectionManager, ConnectionState, EventHandler, SubscriberId};
pub use store::ConversationStore;
pub use transport::{GatewayTransport, Link, Transport};
pub use typing::TypingNotifier;
