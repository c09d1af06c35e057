use std::future::Future;

use tracing::{debug, error, info, warn};

use crate::agent::{error_reply, Agent, STT_ERROR, TRANSCRIPT_HEADER};
use crate::attachments::{is_supported, is_voice};
use crate::error::BotError;
use crate::platform::{RawEvent, SlackFile};

const FILE_ERROR: &str = "[ERROR] Problem processing file:";
const MESSAGE_ERROR: &str = "[ERROR] Problem processing message:";

/// Edits, deletions and bot posts never start a turn.
const IGNORED_SUBTYPES: &[&str] = &["message_changed", "message_deleted", "bot_message"];

/// How a `message` event is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    DirectFileShare,
    DirectMessage,
    BotThreadReply,
    TriggerWord,
    Ignored,
}

impl Agent {
    pub fn classify(&self, event: &RawEvent) -> Route {
        if self.is_automated(event) {
            return Route::Ignored;
        }

        if event.channel_type.as_deref() == Some("im") {
            return if event.subtype.as_deref() == Some("file_share") {
                Route::DirectFileShare
            } else {
                Route::DirectMessage
            };
        }

        // Slack delivers an app_mention for these as well.
        if self.mentions_bot(event) {
            return Route::Ignored;
        }

        let parent = event.parent_user_id.as_deref();
        if event.thread_ts.is_some() && parent == Some(self.bot_user_id.as_str()) {
            return Route::BotThreadReply;
        }

        if event.channel_type.as_deref() == Some("channel") && self.has_trigger_word(&event.text) {
            return Route::TriggerWord;
        }

        Route::Ignored
    }

    pub async fn on_message(&self, event: &RawEvent) {
        let route = self.classify(event);
        if route == Route::Ignored {
            if self.is_automated(event) {
                debug!(
                    target: "unhandled_message",
                    "Skipping bot or edit event in {} ({})",
                    event.channel,
                    event.ts
                );
                return;
            }
            warn!(
                target: "unhandled_message",
                "Message type: {}, user: {}, message: {}",
                event.channel_type.as_deref().unwrap_or("unknown"),
                event.user.as_deref().unwrap_or("unknown"),
                event.text
            );
            return;
        }

        info!(
            target: "handled_message",
            "Handling {:?} in {} ({}): {}",
            route,
            event.channel,
            event.ts,
            event.text
        );
        self.with_busy_reaction(event, self.answer_message(route, event))
            .await;
    }

    /// Mentions are always answered in the mention's thread.
    pub async fn on_mention(&self, event: &RawEvent) {
        info!(
            target: "handled_message",
            "App mentioned in {} ({}): {}",
            event.channel,
            event.ts,
            event.text
        );
        let thread = event.reply_thread();
        self.with_busy_reaction(event, self.answer_voice_first(event, Some(thread)))
            .await;
    }

    async fn answer_message(&self, route: Route, event: &RawEvent) {
        match route {
            Route::DirectFileShare => self.answer_file_share(event).await,
            Route::DirectMessage => {
                if let Some(text) = self.text_turn(event, event.reply_thread()).await {
                    self.post(event, &text, event.thread_ts.as_deref()).await;
                }
            }
            Route::BotThreadReply => {
                self.answer_voice_first(event, Some(event.reply_thread()))
                    .await
            }
            Route::TriggerWord => {
                self.answer_voice_first(event, event.thread_ts.as_deref())
                    .await
            }
            Route::Ignored => {}
        }
    }

    async fn answer_file_share(&self, event: &RawEvent) {
        let Some(file) = event.files.iter().find(|f| is_supported(f)) else {
            info!("No supported file in share from {}", event.channel);
            return;
        };
        // The shared file alone is the turn, even inside a DM thread.
        let shared = RawEvent {
            files: vec![file.clone()],
            thread_ts: None,
            ..event.clone()
        };

        let text = match self.process_conversation(&shared, event.reply_thread()).await {
            Ok(reply) => reply.into_text(),
            Err(e) => error_reply(FILE_ERROR, &e).into_text(),
        };
        if let Some(text) = text {
            self.post(event, &text, None).await;
        }
    }

    /// Answer a voice clip if one is attached, otherwise the text.
    /// Replies go to `thread`, or the channel itself when `None`.
    async fn answer_voice_first(&self, event: &RawEvent, thread: Option<&str>) {
        let upload_thread = thread.unwrap_or(event.ts.as_str());
        let text = match event.files.iter().find(|f| is_voice(f)) {
            Some(file) => match self.voice_turn(event, file, upload_thread).await {
                Ok(text) => Some(text),
                Err(e) => error_reply(STT_ERROR, &e).into_text(),
            },
            None => self.text_turn(event, upload_thread).await,
        };
        if let Some(text) = text {
            self.post(event, &text, thread).await;
        }
    }

    async fn voice_turn(
        &self,
        event: &RawEvent,
        file: &SlackFile,
        upload_thread: &str,
    ) -> Result<String, BotError> {
        let transcript = self.transcribe_attachment(file).await?;
        let spoken = RawEvent {
            channel: event.channel.clone(),
            ts: event.ts.clone(),
            text: transcript.clone(),
            ..Default::default()
        };
        let response = self
            .process_conversation(&spoken, upload_thread)
            .await?
            .into_text()
            .unwrap_or_default();
        Ok(format!(
            "{TRANSCRIPT_HEADER}{transcript}\n\nResponse:\n{response}"
        ))
    }

    async fn text_turn(&self, event: &RawEvent, upload_thread: &str) -> Option<String> {
        match self.process_conversation(event, upload_thread).await {
            Ok(reply) => reply.into_text(),
            Err(e) => error_reply(MESSAGE_ERROR, &e).into_text(),
        }
    }

    async fn post(&self, event: &RawEvent, text: &str, thread: Option<&str>) {
        match self.transport.post_message(&event.channel, text, thread).await {
            Ok(()) => info!(
                target: "bot_response",
                "Reply sent to {} (thread {}): {}",
                event.channel,
                thread.unwrap_or("-"),
                text
            ),
            Err(e) => error!("Failed to post reply to {}: {:#}", event.channel, e),
        }
    }

    /// Run `work` with the busy reaction on `event`.
    async fn with_busy_reaction<F>(&self, event: &RawEvent, work: F)
    where
        F: Future<Output = ()>,
    {
        let reaction = self.config.bot.busy_reaction.as_str();
        if let Err(e) = self
            .transport
            .add_reaction(&event.channel, &event.ts, reaction)
            .await
        {
            warn!("Failed to add reaction to {}: {:#}", event.ts, e);
        }

        work.await;

        if let Err(e) = self
            .transport
            .remove_reaction(&event.channel, &event.ts, reaction)
            .await
        {
            warn!("Failed to remove reaction from {}: {:#}", event.ts, e);
        }
    }

    /// Posts by bots, including this one, and edits or deletions.
    fn is_automated(&self, event: &RawEvent) -> bool {
        event.bot_id.is_some()
            || event.user.as_deref() == Some(self.bot_user_id.as_str())
            || event
                .subtype
                .as_deref()
                .is_some_and(|s| IGNORED_SUBTYPES.contains(&s))
    }

    fn mentions_bot(&self, event: &RawEvent) -> bool {
        event.text.contains(&format!("<@{}>", self.bot_user_id))
    }

    fn has_trigger_word(&self, text: &str) -> bool {
        text.to_lowercase()
            .contains(&self.config.bot.trigger_word.to_lowercase())
    }
}
