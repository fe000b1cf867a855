mod api;
mod config;
mod error;
mod executor;
mod generate;
mod job;
mod params;
mod server;
mod service;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Context;
use api::XConnector;
use config::Config;
use generate::AnthropicGenerator;
use rmcp::{ServiceExt, transport::stdio};
use server::ReplyJobServer;
use service::ReplyJobService;
use std::sync::Arc;
use store::Store;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let db_path = config.database_path()?;
    let store = Store::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    tracing::info!("Using database {}", db_path.display());

    let generator = AnthropicGenerator::new(config.ai_api_key(), config.ai.model.clone())?;
    if config.ai_api_key().is_none() {
        tracing::warn!("No AI API key configured; AI-generated replies will fail");
    }

    let service = ReplyJobService::new(
        Arc::new(store),
        Arc::new(generator),
        Arc::new(XConnector),
        config.pacing.into(),
    );
    let server = ReplyJobServer::new(Arc::new(service));
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
