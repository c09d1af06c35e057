pub mod slack;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// A message as delivered by the chat platform, either as a live event or
/// as one entry of a thread's replies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Author of the thread root, present on thread replies
    #[serde(default)]
    pub parent_user_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Set by Slack clients on messages typed by a person
    #[serde(default)]
    pub client_msg_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub files: Vec<SlackFile>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl RawEvent {
    /// Thread a reply to this message belongs in.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_private: String,
    /// Slack's short type name, e.g. `png` or `mp3`
    #[serde(default)]
    pub filetype: String,
}

/// Operations the bot needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>)
        -> Result<()>;

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        path: &Path,
        title: &str,
    ) -> Result<()>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    /// All messages of a thread, root first, in chronological order.
    async fn fetch_thread_replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<RawEvent>>;

    /// User id the bot posts as.
    async fn bot_user_id(&self) -> Result<String>;

    /// Download a private file with the bot's credentials.
    async fn download_file(&self, url: &str) -> Result<Vec<u8>>;
}
