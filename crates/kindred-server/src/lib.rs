pub mod config;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use kindred_api::{AppState, AppStateInner};
use kindred_db::Database;
use kindred_gateway::pusher::PusherFanout;
use kindred_gateway::{Dispatcher, Fanout, Notifier};

use crate::config::FanoutMode;

/// Wire the store, the chosen fanout transport and every route into one app.
pub fn build_app(db: Database, jwt_secret: &str, fanout: &FanoutMode) -> Router {
    let (transport, gateway): (Arc<dyn Fanout>, Option<Router>) = match fanout {
        FanoutMode::Gateway => {
            let dispatcher = Dispatcher::new();
            let gateway = kindred_gateway::router(dispatcher.clone(), jwt_secret.to_string());
            (Arc::new(dispatcher), Some(gateway))
        }
        FanoutMode::Pusher(cfg) => {
            info!("Publishing through Pusher cluster {}", cfg.cluster);
            (Arc::new(PusherFanout::new(cfg.clone())), None)
        }
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.to_string(),
        notifier: Notifier::new(transport),
    });

    let mut app = kindred_api::router(state);
    if let Some(gateway) = gateway {
        app = app.merge(gateway);
    }

    app.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http())
}
