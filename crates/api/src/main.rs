use anyhow::Result;
use medassist_api::{serve, AppConfig};
use medassist_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("medassist_api");

    let config = AppConfig::from_env()?;
    tracing::info!(?config, "configuration loaded");

    serve(config).await
}
