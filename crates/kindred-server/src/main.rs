use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use kindred_server::build_app;
use kindred_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kindred=debug,kindred_api=debug,kindred_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = kindred_db::Database::open(&PathBuf::from(&config.db_path))?;
    let app = build_app(db, &config.jwt_secret, &config.fanout);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Kindred server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
