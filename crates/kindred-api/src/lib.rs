pub mod auth;
pub mod conversations;
pub mod error;
pub mod matches;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod rows;
pub mod signals;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
