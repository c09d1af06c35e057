//! In-memory fakes for the chat platform and the AI backend.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::agent::Agent;
use crate::config::{Config, FeatureFlags};
use crate::llm::{AiBackend, ChatMessage, FunctionCall, Role, ToolCall, ToolDefinition};
use crate::platform::{ChatTransport, RawEvent, SlackFile};

pub const BOT_USER: &str = "UBOT";

#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub title: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MockTransport {
    download: Option<Vec<u8>>,
    replies: Vec<RawEvent>,
    fail_uploads: bool,
    fail_replies: bool,
    posts: Mutex<Vec<PostedMessage>>,
    uploads: Mutex<Vec<UploadedFile>>,
    reactions: Mutex<Vec<String>>,
    downloads: Mutex<usize>,
}

impl MockTransport {
    pub fn with_download(mut self, bytes: Vec<u8>) -> Self {
        self.download = Some(bytes);
        self
    }

    pub fn with_replies(mut self, replies: Vec<RawEvent>) -> Self {
        self.replies = replies;
        self
    }

    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn failing_replies(mut self) -> Self {
        self.fail_replies = true;
        self
    }

    pub fn posts(&self) -> Vec<PostedMessage> {
        self.posts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.uploads.lock().unwrap().clone()
    }

    /// Reaction calls as `add:name` / `remove:name`, in order.
    pub fn reactions(&self) -> Vec<String> {
        self.reactions.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        *self.downloads.lock().unwrap()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<()> {
        self.posts.lock().unwrap().push(PostedMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            thread_ts: thread_ts.map(str::to_string),
        });
        Ok(())
    }

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        path: &Path,
        title: &str,
    ) -> Result<()> {
        if self.fail_uploads {
            return Err(anyhow!("upload rejected"));
        }
        let bytes = std::fs::read(path)?;
        self.uploads.lock().unwrap().push(UploadedFile {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            title: title.to_string(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes,
        });
        Ok(())
    }

    async fn add_reaction(&self, _channel: &str, _ts: &str, name: &str) -> Result<()> {
        self.reactions.lock().unwrap().push(format!("add:{name}"));
        Ok(())
    }

    async fn remove_reaction(&self, _channel: &str, _ts: &str, name: &str) -> Result<()> {
        self.reactions.lock().unwrap().push(format!("remove:{name}"));
        Ok(())
    }

    async fn fetch_thread_replies(&self, _channel: &str, _thread_ts: &str) -> Result<Vec<RawEvent>> {
        if self.fail_replies {
            return Err(anyhow!("conversations.replies failed: ratelimited"));
        }
        Ok(self.replies.clone())
    }

    async fn bot_user_id(&self) -> Result<String> {
        Ok(BOT_USER.to_string())
    }

    async fn download_file(&self, _url: &str) -> Result<Vec<u8>> {
        *self.downloads.lock().unwrap() += 1;
        self.download
            .clone()
            .ok_or_else(|| anyhow!("HTTP 404 Not Found"))
    }
}

/// One recorded call to [`AiBackend::chat`].
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

#[derive(Default)]
pub struct MockAi {
    responses: Mutex<VecDeque<Result<ChatMessage, String>>>,
    image_error: Option<String>,
    speech_error: Option<String>,
    transcript: Option<String>,
    chat_delay: Option<Duration>,
    chat_calls: Mutex<Vec<ChatCall>>,
    image_requests: Mutex<Vec<(String, String)>>,
    speech_requests: Mutex<Vec<String>>,
    transcriptions: Mutex<usize>,
}

impl MockAi {
    pub fn with_text(self, text: &str) -> Self {
        self.with_response(ChatMessage::assistant(text))
    }

    pub fn with_response(self, response: ChatMessage) -> Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn failing_images(mut self, message: &str) -> Self {
        self.image_error = Some(message.to_string());
        self
    }

    pub fn failing_speech(mut self, message: &str) -> Self {
        self.speech_error = Some(message.to_string());
        self
    }

    pub fn with_transcript(mut self, transcript: &str) -> Self {
        self.transcript = Some(transcript.to_string());
        self
    }

    /// Make every chat call take `delay` before answering.
    pub fn with_chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn chat_calls(&self) -> Vec<ChatCall> {
        self.chat_calls.lock().unwrap().clone()
    }

    pub fn image_requests(&self) -> Vec<(String, String)> {
        self.image_requests.lock().unwrap().clone()
    }

    pub fn speech_requests(&self) -> Vec<String> {
        self.speech_requests.lock().unwrap().clone()
    }

    pub fn transcriptions(&self) -> usize {
        *self.transcriptions.lock().unwrap()
    }
}

#[async_trait]
impl AiBackend for MockAi {
    async fn chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        self.chat_calls.lock().unwrap().push(ChatCall {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            tool_names: tools.iter().map(|t| t.function.name.clone()).collect(),
        });
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted chat response")),
        }
    }

    async fn generate_image(&self, description: &str, size: &str) -> Result<String> {
        self.image_requests
            .lock()
            .unwrap()
            .push((description.to_string(), size.to_string()));
        match &self.image_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok("https://images.example.com/generated.png".to_string()),
        }
    }

    async fn fetch_image(&self, _url: &str) -> Result<Vec<u8>> {
        Ok(b"\xff\xd8\xffimage".to_vec())
    }

    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>> {
        self.speech_requests.lock().unwrap().push(text.to_string());
        match &self.speech_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(b"ID3speech".to_vec()),
        }
    }

    async fn transcribe(&self, audio_file: &Path) -> Result<String> {
        *self.transcriptions.lock().unwrap() += 1;
        if !audio_file.exists() {
            return Err(anyhow!("audio file missing: {}", audio_file.display()));
        }
        self.transcript
            .clone()
            .ok_or_else(|| anyhow!("Invalid file format"))
    }
}

pub fn file(filetype: &str) -> SlackFile {
    SlackFile {
        name: Some(format!("upload.{filetype}")),
        url_private: format!("https://files.slack.com/files-pri/T1-F1/upload.{filetype}"),
        filetype: filetype.to_string(),
    }
}

/// A top-level channel message from a person.
pub fn text_event(text: &str) -> RawEvent {
    RawEvent {
        channel: "C1".to_string(),
        ts: "1.0".to_string(),
        user: Some("U1".to_string()),
        client_msg_id: Some("m-1".to_string()),
        text: text.to_string(),
        channel_type: Some("channel".to_string()),
        ..Default::default()
    }
}

/// A direct message from a person.
pub fn dm_event(text: &str) -> RawEvent {
    RawEvent {
        channel: "D1".to_string(),
        channel_type: Some("im".to_string()),
        ..text_event(text)
    }
}

pub fn audio_event(text: &str, filetype: &str) -> RawEvent {
    RawEvent {
        files: vec![file(filetype)],
        subtype: Some("file_share".to_string()),
        ..text_event(text)
    }
}

pub fn tool_call_response(name: &str, arguments: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: None,
        tool_calls: Some(vec![ToolCall {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }]),
    }
}

pub fn test_config(scratch_dir: &Path) -> Config {
    let mut config = Config::parse("").unwrap();
    config.bot.scratch_dir = scratch_dir.to_path_buf();
    config
}

pub fn test_agent(
    scratch_dir: &Path,
    ai: MockAi,
    transport: MockTransport,
) -> (Agent, Arc<MockTransport>, Arc<MockAi>) {
    test_agent_with(scratch_dir, FeatureFlags::default(), ai, transport)
}

pub fn test_agent_with(
    scratch_dir: &Path,
    features: FeatureFlags,
    ai: MockAi,
    transport: MockTransport,
) -> (Agent, Arc<MockTransport>, Arc<MockAi>) {
    let mut config = test_config(scratch_dir);
    config.features = features;
    build_agent(config, ai, transport)
}

pub fn build_agent(
    config: Config,
    ai: MockAi,
    transport: MockTransport,
) -> (Agent, Arc<MockTransport>, Arc<MockAi>) {
    let ai = Arc::new(ai);
    let transport = Arc::new(transport);
    let agent = Agent::new(
        config,
        ai.clone(),
        transport.clone(),
        BOT_USER.to_string(),
    );
    (agent, transport, ai)
}
