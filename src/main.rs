use anyhow::Context;
use chat_resilience::{config::AppConfig, init_server, init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/chat-resilience.yaml".to_string());

    // Load configuration
    let config = AppConfig::from_file(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {} (usage: chat-resilience [config_file])",
            config_path
        )
    })?;

    init_tracing(&config.logging);

    init_server(config).await.context("service error")?;

    Ok(())
}
