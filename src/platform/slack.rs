use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use super::{ChatTransport, RawEvent};
use crate::agent::Agent;
use crate::config::SlackConfig;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REPLIES_PAGE_LIMIT: &str = "200";

/// Envelope of every socket mode frame.
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
    /// Non-zero when Slack redelivers an envelope it considers unacknowledged
    #[serde(default)]
    retry_attempt: u32,
}

#[derive(Debug)]
enum IncomingEvent {
    Message(RawEvent),
    Mention(RawEvent),
}

#[derive(Debug)]
enum SocketAction {
    Dispatch(IncomingEvent),
    Reconnect,
    Ignore,
}

/// Decide what a socket mode envelope asks of us.
fn interpret_envelope(envelope: &SocketEnvelope) -> Result<SocketAction> {
    match envelope.envelope_type.as_str() {
        "hello" => {
            info!("Slack socket mode connection ready");
            Ok(SocketAction::Ignore)
        }
        "disconnect" => {
            info!(
                "Slack requested disconnect: {}",
                envelope.reason.as_deref().unwrap_or("unspecified")
            );
            Ok(SocketAction::Reconnect)
        }
        "events_api" => {
            if envelope.payload["type"] != "event_callback" {
                return Ok(SocketAction::Ignore);
            }
            if envelope.retry_attempt > 0 {
                info!(
                    "Skipping redelivered event {} (retry {})",
                    envelope.payload["event_id"].as_str().unwrap_or("unknown"),
                    envelope.retry_attempt
                );
                return Ok(SocketAction::Ignore);
            }
            let event = &envelope.payload["event"];
            let kind = event["type"].as_str().unwrap_or_default().to_string();
            let raw: RawEvent = serde_json::from_value(event.clone())
                .context("Failed to decode Slack event payload")?;
            match kind.as_str() {
                "message" => Ok(SocketAction::Dispatch(IncomingEvent::Message(raw))),
                "app_mention" => Ok(SocketAction::Dispatch(IncomingEvent::Mention(raw))),
                other => {
                    debug!("Ignoring Slack event type: {}", other);
                    Ok(SocketAction::Ignore)
                }
            }
        }
        other => {
            debug!("Ignoring socket envelope type: {}", other);
            Ok(SocketAction::Ignore)
        }
    }
}

/// Run the Slack platform until Ctrl-C, reconnecting whenever the socket drops.
pub async fn run(agent: Arc<Agent>, client: Arc<SlackClient>) -> Result<()> {
    info!("Starting Slack platform...");

    loop {
        let session = async {
            let url = client.open_socket_connection().await?;
            run_socket_session(&agent, &url).await
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return Ok(());
            }
            result = session => match result {
                Ok(()) => info!("Slack socket session ended, reconnecting"),
                Err(e) => error!("Slack socket session error: {:#}", e),
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return Ok(());
            }
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// Serve one websocket connection.
///
/// The reader acknowledges every envelope as soon as it arrives and queues
/// decoded events; the handler works through the queue one event at a time.
/// Events already acknowledged are still handled after the socket closes.
async fn run_socket_session(agent: &Agent, socket_url: &str) -> Result<()> {
    let (stream, _response) = connect_async(socket_url)
        .await
        .context("Failed to connect Slack socket mode websocket")?;
    info!("Slack socket connected");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let reader = read_envelopes(stream, events_tx);
    let handler = async {
        while let Some(event) = events_rx.recv().await {
            match event {
                IncomingEvent::Message(event) => agent.on_message(&event).await,
                IncomingEvent::Mention(event) => agent.on_mention(&event).await,
            }
        }
    };

    let (result, ()) = tokio::join!(reader, handler);
    result
}

/// Acknowledge and decode envelopes until the socket closes or Slack asks
/// for a reconnect.
async fn read_envelopes<S>(stream: S, events: mpsc::UnboundedSender<IncomingEvent>) -> Result<()>
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut source) = stream.split();

    while let Some(message) = source.next().await {
        let message = message.context("Failed reading Slack websocket message")?;
        let text = match message {
            WsMessage::Text(text) => text.as_str().to_owned(),
            WsMessage::Binary(bytes) => {
                String::from_utf8(bytes.to_vec()).context("Invalid UTF-8 socket payload")?
            }
            WsMessage::Close(frame) => {
                info!("Slack socket closed: {:?}", frame);
                return Ok(());
            }
            _ => continue,
        };

        let envelope: SocketEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping malformed socket frame: {}", e);
                continue;
            }
        };

        if let Some(envelope_id) = &envelope.envelope_id {
            let ack = json!({ "envelope_id": envelope_id }).to_string();
            sink.send(WsMessage::Text(ack.into()))
                .await
                .context("Failed to acknowledge socket envelope")?;
        }

        match interpret_envelope(&envelope) {
            Ok(SocketAction::Dispatch(event)) => {
                if events.send(event).is_err() {
                    anyhow::bail!("Slack event handler stopped");
                }
            }
            Ok(SocketAction::Reconnect) => return Ok(()),
            Ok(SocketAction::Ignore) => {}
            Err(e) => warn!("Skipping undecodable event: {:#}", e),
        }
    }

    Ok(())
}

/// Common `ok`/`error` wrapper of every Web API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct AuthTest {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenConnection {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Replies {
    #[serde(default)]
    messages: Vec<RawEvent>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UploadUrl {
    upload_url: Option<String>,
    file_id: Option<String>,
}

/// Slack Web API client used for everything except the socket itself.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig, request_timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs.max(1)))
            .build()
            .context("Failed to create Slack HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            app_token: config.app_token.trim().to_string(),
            bot_token: config.bot_token.trim().to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Send a Web API request and decode Slack's `ok`/`error` envelope as is.
    async fn call_raw<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack {} failed with status {}: {}", method, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode Slack {method} response"))
    }

    /// Send a Web API request and unwrap Slack's `ok`/`error` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let parsed: ApiResponse<T> = self.call_raw(method, request).await?;
        if !parsed.ok {
            anyhow::bail!(
                "Slack {} failed: {}",
                method,
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(parsed.data)
    }

    /// Ask Slack for a fresh socket mode websocket URL.
    pub async fn open_socket_connection(&self) -> Result<String> {
        let opened: OpenConnection = self
            .call(
                "apps.connections.open",
                self.http
                    .post(self.method_url("apps.connections.open"))
                    .bearer_auth(&self.app_token),
            )
            .await?;
        opened
            .url
            .filter(|url| !url.trim().is_empty())
            .context("Slack apps.connections.open did not return a url")
    }

    async fn react(&self, method: &str, channel: &str, ts: &str, name: &str) -> Result<()> {
        let response: ApiResponse<Empty> = self
            .call_raw(
                method,
                self.http
                    .post(self.method_url(method))
                    .bearer_auth(&self.bot_token)
                    .json(&json!({ "channel": channel, "timestamp": ts, "name": name })),
            )
            .await?;
        if response.ok {
            return Ok(());
        }
        match response.error.as_deref() {
            // The reaction is already in the requested state.
            Some(code @ ("already_reacted" | "no_reaction")) => {
                debug!("{} on {}: {}", method, ts, code);
                Ok(())
            }
            code => anyhow::bail!("Slack {} failed: {}", method, code.unwrap_or("unknown error")),
        }
    }
}

#[async_trait]
impl ChatTransport for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let _: Empty = self
            .call(
                "chat.postMessage",
                self.http
                    .post(self.method_url("chat.postMessage"))
                    .bearer_auth(&self.bot_token)
                    .json(&payload),
            )
            .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        path: &Path,
        title: &str,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read upload file: {}", path.display()))?;
        if bytes.is_empty() {
            anyhow::bail!("Refusing to upload empty file: {}", path.display());
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Upload path has no file name")?;
        let length = bytes.len().to_string();

        let target: UploadUrl = self
            .call(
                "files.getUploadURLExternal",
                self.http
                    .post(self.method_url("files.getUploadURLExternal"))
                    .bearer_auth(&self.bot_token)
                    .form(&[("filename", filename.as_str()), ("length", length.as_str())]),
            )
            .await?;
        let upload_url = target
            .upload_url
            .context("Slack files.getUploadURLExternal returned no upload_url")?;
        let file_id = target
            .file_id
            .context("Slack files.getUploadURLExternal returned no file_id")?;

        let response = self
            .http
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .context("Failed to send file contents to Slack")?;
        if !response.status().is_success() {
            anyhow::bail!("Slack file upload failed with status {}", response.status());
        }

        let files = json!([{ "id": file_id, "title": title }]).to_string();
        let mut form = vec![("files", files), ("channel_id", channel.to_string())];
        if let Some(thread_ts) = thread_ts {
            form.push(("thread_ts", thread_ts.to_string()));
        }
        let _: Empty = self
            .call(
                "files.completeUploadExternal",
                self.http
                    .post(self.method_url("files.completeUploadExternal"))
                    .bearer_auth(&self.bot_token)
                    .form(&form),
            )
            .await?;

        info!("Uploaded {} to {} as '{}'", filename, channel, title);
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.react("reactions.add", channel, ts, name).await
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.react("reactions.remove", channel, ts, name).await
    }

    async fn fetch_thread_replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<RawEvent>> {
        let mut messages = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = vec![
                ("channel", channel),
                ("ts", thread_ts),
                ("limit", REPLIES_PAGE_LIMIT),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }

            let page: Replies = self
                .call(
                    "conversations.replies",
                    self.http
                        .get(self.method_url("conversations.replies"))
                        .bearer_auth(&self.bot_token)
                        .query(&query),
                )
                .await?;
            messages.extend(page.messages);

            cursor = page
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        debug!(
            "Fetched {} messages from thread {} in {}",
            messages.len(),
            thread_ts,
            channel
        );
        Ok(messages)
    }

    async fn bot_user_id(&self) -> Result<String> {
        let auth: AuthTest = self
            .call(
                "auth.test",
                self.http
                    .post(self.method_url("auth.test"))
                    .bearer_auth(&self.bot_token),
            )
            .await?;
        auth.user_id
            .filter(|id| !id.trim().is_empty())
            .context("Slack auth.test did not return user_id")
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .context("Slack file download request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Slack file download failed with status {}", status);
        }
        // Slack answers unauthorized file requests with its login page.
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            anyhow::bail!("Slack returned an HTML page instead of the file (missing files:read scope?)");
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read Slack file body")?;
        Ok(bytes.to_vec())
    }
}
