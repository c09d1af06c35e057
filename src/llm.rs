use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AiProvider, OpenAiConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::User, MessageContent::Parts(parts))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Plain text of the message, if it carries any non-empty text content.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(text)) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Either a bare string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_data(mime: &str, base64_data: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{mime};base64,{base64_data}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Generative-AI capabilities the bot relies on.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// One chat completion over `history`, preceded by `system_prompt`.
    async fn chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage>;

    /// Generate an image and return the URL it can be fetched from.
    async fn generate_image(&self, description: &str, size: &str) -> Result<String>;

    /// Download the bytes behind a URL returned by `generate_image`.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;

    /// Synthesize speech; returns mp3 bytes.
    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>>;

    async fn transcribe(&self, audio_file: &Path) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    size: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    voice: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// REST client for OpenAI and Azure OpenAI.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("Failed to create OpenAI HTTP client")?;
        Ok(Self { client, config })
    }

    /// Azure addresses a deployment in the URL, OpenAI names the model in the body.
    fn url(&self, model: &str, path: &str) -> String {
        let base = self.config.effective_base_url();
        match self.config.provider {
            AiProvider::Openai => format!("{base}/{path}"),
            AiProvider::Azure => format!(
                "{base}/openai/deployments/{model}/{path}?api-version={}",
                self.config.api_version
            ),
        }
    }

    fn body_model<'a>(&self, model: &'a str) -> Option<&'a str> {
        match self.config.provider {
            AiProvider::Openai => Some(model),
            AiProvider::Azure => None,
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match self.config.provider {
            AiProvider::Openai => request.bearer_auth(&self.config.api_key),
            AiProvider::Azure => request.header("api-key", &self.config.api_key),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {what} request"))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI {what} error ({}): {}", status, error_body);
        }
        Ok(response)
    }
}

#[async_trait]
impl AiBackend for OpenAiClient {
    async fn chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let model = &self.config.chat_model;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(history);

        let (tools_param, tool_choice) = if tools.is_empty() {
            (None, None)
        } else {
            (Some(tools), Some("auto"))
        };

        let request = ChatRequest {
            model: self.body_model(model),
            messages,
            tools: tools_param,
            tool_choice,
        };

        let url = self.url(model, "chat/completions");
        debug!("Sending chat completion request: {}", url);

        let response = self
            .send(self.post(&url).json(&request), "chat completion")
            .await?;

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("No choices in chat completion response")
    }

    async fn generate_image(&self, description: &str, size: &str) -> Result<String> {
        let model = &self.config.image_model;
        let request = ImageRequest {
            model: self.body_model(model),
            prompt: description,
            size,
            n: 1,
        };

        let url = self.url(model, "images/generations");
        debug!("Requesting image generation ({}): {}", size, url);

        let response = self
            .send(self.post(&url).json(&request), "image generation")
            .await?;
        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image generation response")?;

        image
            .data
            .into_iter()
            .find_map(|d| d.url)
            .context("Image generation response contained no URL")
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(self.client.get(url), "image download").await?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read generated image")?;
        Ok(bytes.to_vec())
    }

    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>> {
        let model = &self.config.tts_model;
        let request = SpeechRequest {
            model: self.body_model(model),
            voice: &self.config.tts_voice,
            input: text,
        };

        let url = self.url(model, "audio/speech");
        debug!("Requesting speech synthesis: {}", url);

        let response = self
            .send(self.post(&url).json(&request), "speech generation")
            .await?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read generated speech")?;
        Ok(bytes.to_vec())
    }

    async fn transcribe(&self, audio_file: &Path) -> Result<String> {
        let model = &self.config.stt_model;
        let bytes = tokio::fs::read(audio_file)
            .await
            .with_context(|| format!("Failed to read audio file: {}", audio_file.display()))?;
        let file_name = audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        if let Some(model) = self.body_model(model) {
            form = form.text("model", model.to_string());
        }

        let url = self.url(model, "audio/transcriptions");
        debug!("Requesting transcription: {}", url);

        let response = self
            .send(self.post(&url).multipart(form), "transcription")
            .await?;
        let transcription: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(transcription.text)
    }
}
