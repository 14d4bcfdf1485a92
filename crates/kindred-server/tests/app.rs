use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use kindred_db::Database;
use kindred_gateway::pusher::PusherConfig;
use kindred_server::build_app;
use kindred_server::config::FanoutMode;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn rest_routes_require_a_token() {
    let app = build_app(Database::open_in_memory().unwrap(), "s3cret", &FanoutMode::Gateway);
    let resp = app.oneshot(get("/conversations")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_route_follows_fanout_mode() {
    let app = build_app(Database::open_in_memory().unwrap(), "s3cret", &FanoutMode::Gateway);
    let resp = app.oneshot(get("/gateway")).await.unwrap();
    // Mounted, but a plain GET is not a WebSocket upgrade.
    assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    assert!(!resp.status().is_success());

    let pusher = FanoutMode::Pusher(PusherConfig {
        app_id: "1".into(),
        key: "k".into(),
        secret: "x".into(),
        cluster: "eu".into(),
    });
    let app = build_app(Database::open_in_memory().unwrap(), "s3cret", &pusher);
    let resp = app.oneshot(get("/gateway")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
