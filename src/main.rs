use std::sync::Arc;

use anyhow::Context;
use carechat::{auth, config::Config, db, llm::GeminiProvider, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("carechat=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url, 16)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    db::migrate(&db_pool).await.context("failed to migrate database")?;

    let clients = auth::Clients::load(config.oauth_secrets_path.as_deref(), &config.public_url)?;
    if config.google_api_key.is_none() {
        tracing::warn!("GOOGLE_API_KEY not set, chat turns will fail");
    }
    let provider = GeminiProvider::new(config.google_api_key.clone(), config.gemini_api_url.clone());

    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        db_pool,
        clients,
        config: Arc::new(config),
        provider: Arc::new(provider),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, carechat::app(app_state)).await?;

    Ok(())
}
