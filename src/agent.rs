use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};

use crate::attachments::{AttachmentResolver, LocalFile};
use crate::config::Config;
use crate::error::BotError;
use crate::llm::{AiBackend, ChatMessage, ToolDefinition};
use crate::platform::{ChatTransport, RawEvent, SlackFile};
use crate::tools::{self, ImageArgs, ToolInvocation, TtsArgs};

pub const TRANSCRIPT_HEADER: &str = "Transcript of the audio:\n";
pub const IMAGE_ERROR: &str = "[ERROR] Problem generating image using DALL-E:";
pub const TTS_ERROR: &str = "[ERROR] Problem converting from text to speech:";
pub const STT_ERROR: &str = "[ERROR] Problem converting from speech to text:";

const TTS_TITLE: &str = "Text To Speech";

/// Outcome of one conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Text to post back.
    Text(String),
    /// A user-visible error description.
    Error(String),
    /// The turn already answered through a side effect, e.g. a file upload.
    Nothing,
}

impl Reply {
    /// Text worth posting, if any.
    pub fn into_text(self) -> Option<String> {
        match self {
            Reply::Text(text) | Reply::Error(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Format a failed action the way users see it, and log it.
pub fn error_reply(prefix: &str, err: &BotError) -> Reply {
    let text = format!("{prefix}\n {err}");
    error!(kind = err.kind(), "{}", text);
    Reply::Error(text)
}

/// The bot: configuration plus the chat platform and AI backend it talks to.
/// Built once at startup and shared by every event handler.
pub struct Agent {
    pub config: Config,
    pub(crate) ai: Arc<dyn AiBackend>,
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) resolver: AttachmentResolver,
    pub(crate) bot_user_id: String,
    tools: Vec<ToolDefinition>,
}

impl Agent {
    pub fn new(
        config: Config,
        ai: Arc<dyn AiBackend>,
        transport: Arc<dyn ChatTransport>,
        bot_user_id: String,
    ) -> Self {
        let tools = tools::tool_definitions(&config.features);
        let resolver = AttachmentResolver::new(config.bot.scratch_dir.clone());
        Self {
            config,
            ai,
            transport,
            resolver,
            bot_user_id,
            tools,
        }
    }

    /// Build the history for `message`, ask the model, and carry out its answer.
    /// Uploads produced by tools go to `reply_thread` in the message's channel.
    pub async fn process_conversation(
        &self,
        message: &RawEvent,
        reply_thread: &str,
    ) -> Result<Reply, BotError> {
        let history = self.assemble(message).await?;
        self.dispatch(&history, message, reply_thread).await
    }

    /// Call the model once and act on the first thing it returns.
    pub async fn dispatch(
        &self,
        history: &[ChatMessage],
        source: &RawEvent,
        reply_thread: &str,
    ) -> Result<Reply, BotError> {
        let response = self
            .ai
            .chat(&self.config.bot.system_prompt, history, &self.tools)
            .await
            .map_err(BotError::Model)?;

        if let Some(text) = response.text() {
            info!("Model replied with {} chars of text", text.len());
            return Ok(Reply::Text(text.to_string()));
        }

        let calls = response.tool_calls.as_deref().unwrap_or_default();
        let Some(call) = calls.first() else {
            info!("Model returned neither text nor a tool call");
            return Ok(Reply::Nothing);
        };
        if calls.len() > 1 {
            warn!(
                "Model requested {} tool calls; only '{}' is executed",
                calls.len(),
                call.function.name
            );
        }

        let invocation = ToolInvocation::parse(call).map_err(BotError::Model)?;
        info!(
            "Tool called: {} with arguments: {}",
            invocation.name(),
            call.function.arguments
        );

        let reply = match invocation {
            ToolInvocation::GenerateImage(args) => {
                match self.generate_image(&args, &source.channel, reply_thread).await {
                    Ok(()) => Reply::Nothing,
                    Err(e) => error_reply(IMAGE_ERROR, &e),
                }
            }
            ToolInvocation::GenerateTts(args) => {
                match self.generate_tts(&args, &source.channel, reply_thread).await {
                    Ok(()) => Reply::Nothing,
                    Err(e) => error_reply(TTS_ERROR, &e),
                }
            }
            ToolInvocation::GenerateStt => match self.generate_stt(source).await {
                Ok(transcript) => Reply::Text(format!("{TRANSCRIPT_HEADER}{transcript}")),
                Err(e) => error_reply(STT_ERROR, &e),
            },
        };
        Ok(reply)
    }

    async fn generate_image(
        &self,
        args: &ImageArgs,
        channel: &str,
        thread_ts: &str,
    ) -> Result<(), BotError> {
        let url = self
            .ai
            .generate_image(&args.description, args.size.dimensions())
            .await
            .map_err(BotError::Action)?;
        let bytes = self.ai.fetch_image(&url).await.map_err(BotError::Action)?;

        let image = LocalFile::write(self.resolver.scratch_dir(), "jpg", &bytes)
            .await
            .map_err(BotError::Action)?;
        self.transport
            .upload_file(channel, Some(thread_ts), image.path(), &args.description)
            .await
            .map_err(BotError::Action)?;
        image.release();

        info!("Generated image uploaded: {}", args.description);
        Ok(())
    }

    async fn generate_tts(
        &self,
        args: &TtsArgs,
        channel: &str,
        thread_ts: &str,
    ) -> Result<(), BotError> {
        let speech = self
            .ai
            .generate_speech(&args.input_text)
            .await
            .map_err(BotError::Action)?;

        let audio = LocalFile::write(self.resolver.scratch_dir(), "mp3", &speech)
            .await
            .map_err(BotError::Action)?;
        self.transport
            .upload_file(channel, Some(thread_ts), audio.path(), TTS_TITLE)
            .await
            .map_err(BotError::Action)?;
        audio.release();

        info!("Generated speech uploaded ({} bytes)", speech.len());
        Ok(())
    }

    /// Transcribe the first file attached to the message being answered.
    async fn generate_stt(&self, source: &RawEvent) -> Result<String, BotError> {
        let file = source
            .files
            .first()
            .ok_or_else(|| BotError::Action(anyhow!("No audio file attached to transcribe")))?;
        self.transcribe_attachment(file).await
    }

    /// Download `file`, transcribe it, and drop the scratch copy.
    pub(crate) async fn transcribe_attachment(&self, file: &SlackFile) -> Result<String, BotError> {
        let audio = self
            .resolver
            .resolve(file, self.transport.as_ref())
            .await?;
        info!("Processing audio file: {}", audio.path().display());
        let transcript = self
            .ai
            .transcribe(audio.path())
            .await
            .map_err(BotError::Action)?;
        audio.release();
        Ok(transcript)
    }
}
