use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_converter_server::{
    auth::OAuthClient,
    config::Config,
    create_app,
    database::Database,
    handlers::AppState,
    models::PlanCatalog,
    services::{
        converter::ConversionGateway, engine::Engine, quota::QuotaLedger, session::SessionStore,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("media_converter_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let database = Database::connect(&config.database_url, config.max_db_connections).await?;
    database.migrate().await?;

    tokio::fs::create_dir_all(&config.download_dir).await?;

    let ffmpeg_available = Engine::probe_ffmpeg().await;
    if ffmpeg_available {
        info!("ffmpeg detected, transcoding enabled");
    } else {
        warn!("ffmpeg not found, audio requests will keep the source container");
    }

    let catalog = Arc::new(PlanCatalog::builtin());
    let sessions = SessionStore::new(config.session_ttl_secs as i64);
    let ledger = QuotaLedger::new(database.clone(), sessions, Arc::clone(&catalog));
    let gateway = Arc::new(ConversionGateway::new(
        Engine::new(config.engine_timeout_secs),
        ffmpeg_available,
        config.download_dir.clone(),
    ));
    let oauth = Arc::new(OAuthClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.oauth_redirect_url.clone(),
    ));

    let state = AppState {
        database,
        config: config.clone(),
        catalog,
        ledger,
        gateway,
        oauth,
    };

    let app = create_app(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
