mod agent;
mod attachments;
mod config;
mod conversation;
mod error;
mod llm;
mod platform;
mod router;
#[cfg(test)]
mod testing;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::Agent;
use crate::config::{Config, LoggingConfig};
use crate::llm::OpenAiClient;
use crate::platform::slack::SlackClient;
use crate::platform::ChatTransport;

/// Console logging plus an optional log file. The returned guard flushes the
/// file writer and must live until shutdown.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,slackgpt=debug".into());

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Configuration loaded from {}", config_path.display());
    info!("  Provider: {}", config.openai.provider);
    info!("  Chat model: {}", config.openai.chat_model);
    info!("  Trigger word: {}", config.bot.trigger_word);
    info!("  Scratch dir: {}", config.bot.scratch_dir.display());

    let slack = Arc::new(SlackClient::new(
        &config.slack,
        config.openai.request_timeout_secs,
    )?);
    let ai = Arc::new(OpenAiClient::new(config.openai.clone())?);

    let bot_user_id = slack
        .bot_user_id()
        .await
        .context("Failed to resolve the bot user id")?;
    info!("Bot user id: {}", bot_user_id);

    let agent = Arc::new(Agent::new(config, ai, slack.clone(), bot_user_id));

    info!("Bot is starting...");
    platform::slack::run(agent, slack).await?;

    Ok(())
}
