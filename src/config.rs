use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Openai,
    Azure,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Openai => write!(f, "openai"),
            AiProvider::Azure => write!(f, "azure"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// App-level token (`xapp-...`) used to open the socket mode connection
    #[serde(default)]
    pub app_token: String,
    /// Bot user token (`xoxb-...`) used for every Web API call
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub provider: AiProvider,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl OpenAiConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            AiProvider::Openai => "https://api.openai.com/v1",
            // Azure has no shared endpoint; `validate` rejects an empty one.
            AiProvider::Azure => "",
        }
    }
}

/// Each flag advertises the matching tool to the model.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FeatureFlags {
    #[serde(default)]
    pub image_generation: bool,
    #[serde(default)]
    pub text_to_speech: bool,
    #[serde(default)]
    pub speech_to_text: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_trigger_word")]
    pub trigger_word: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Placeholder text the bot posts while working; never fed back to the model
    #[serde(default)]
    pub waiting_message: Option<String>,
    #[serde(default = "default_busy_reaction")]
    pub busy_reaction: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Optional file that receives a copy of every log line
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "alloy".to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_trigger_word() -> String {
    "lang".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant living in a Slack workspace. \
     Answer concisely and use the available tools when the user asks for images or audio."
        .to_string()
}

fn default_busy_reaction() -> String {
    "sparkles".to_string()
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("tmp")
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            app_token: String::new(),
            bot_token: String::new(),
            api_base: default_slack_api_base(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            api_key: String::new(),
            base_url: String::new(),
            api_version: default_api_version(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            stt_model: default_stt_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trigger_word: default_trigger_word(),
            system_prompt: default_system_prompt(),
            waiting_message: None,
            busy_reaction: default_busy_reaction(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Read `key` from the environment, treating an empty value as absent.
fn env_fallback(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;
        config.apply_env_fallbacks();
        config.validate()?;

        if !config.bot.scratch_dir.exists() {
            std::fs::create_dir_all(&config.bot.scratch_dir).with_context(|| {
                format!(
                    "Failed to create scratch directory: {}",
                    config.bot.scratch_dir.display()
                )
            })?;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Secrets may live in the environment instead of the config file.
    fn apply_env_fallbacks(&mut self) {
        if self.slack.app_token.is_empty() {
            if let Some(token) = env_fallback("SLACK_SOCKET_TOKEN") {
                self.slack.app_token = token;
            }
        }
        if self.slack.bot_token.is_empty() {
            if let Some(token) = env_fallback("SLACK_BOT_USER_TOKEN") {
                self.slack.bot_token = token;
            }
        }
        if self.openai.api_key.is_empty() {
            let key = match self.openai.provider {
                AiProvider::Openai => "OPENAI_KEY",
                AiProvider::Azure => "AZURE_OPENAI_KEY",
            };
            if let Some(api_key) = env_fallback(key) {
                self.openai.api_key = api_key;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slack.app_token.is_empty() {
            anyhow::bail!("Missing slack.app_token (or SLACK_SOCKET_TOKEN)");
        }
        if self.slack.bot_token.is_empty() {
            anyhow::bail!("Missing slack.bot_token (or SLACK_BOT_USER_TOKEN)");
        }
        if self.openai.api_key.is_empty() {
            anyhow::bail!(
                "Missing openai.api_key (or OPENAI_KEY / AZURE_OPENAI_KEY) for provider {}",
                self.openai.provider
            );
        }
        if self.openai.provider == AiProvider::Azure && self.openai.base_url.is_empty() {
            anyhow::bail!("Azure OpenAI requires openai.base_url (the resource endpoint)");
        }
        if self.bot.trigger_word.trim().is_empty() {
            anyhow::bail!("bot.trigger_word must not be empty");
        }
        Ok(())
    }
}
