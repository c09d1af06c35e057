use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::agent::{Agent, TRANSCRIPT_HEADER};
use crate::attachments::{image_mime, FileKind};
use crate::error::BotError;
use crate::llm::{ChatMessage, ContentPart};
use crate::platform::RawEvent;

impl Agent {
    /// Turn one platform message into a `user` message for the model.
    ///
    /// Only the first attachment is looked at. Images are inlined as base64
    /// data URLs and audio is replaced by its transcript; any other file is
    /// ignored and the text goes through unchanged.
    pub async fn normalize(&self, message: &RawEvent) -> Result<ChatMessage, BotError> {
        let Some(file) = message.files.first() else {
            return Ok(ChatMessage::user(message.text.as_str()));
        };

        match FileKind::of(file) {
            FileKind::Image => {
                let image = self
                    .resolver
                    .resolve(file, self.transport.as_ref())
                    .await?;
                let bytes = image.read().await.map_err(BotError::Download)?;
                image.release();

                let encoded = STANDARD.encode(&bytes);
                Ok(ChatMessage::user_parts(vec![
                    ContentPart::text(message.text.as_str()),
                    ContentPart::image_data(image_mime(&file.filetype), &encoded),
                ]))
            }
            FileKind::Audio => {
                let transcript = self.transcribe_attachment(file).await?;
                Ok(ChatMessage::user_parts(vec![
                    ContentPart::text(message.text.as_str()),
                    ContentPart::text(format!("{TRANSCRIPT_HEADER}{transcript}")),
                ]))
            }
            FileKind::Other => {
                debug!("Ignoring attachment of type '{}'", file.filetype);
                Ok(ChatMessage::user(message.text.as_str()))
            }
        }
    }

    /// Conversation history for `message`, oldest first.
    ///
    /// Thread messages pull the whole thread; people become `user` turns and
    /// the bot's own replies become `assistant` turns, minus the waiting
    /// placeholder.
    pub async fn assemble(&self, message: &RawEvent) -> Result<Vec<ChatMessage>, BotError> {
        let Some(thread_ts) = message.thread_ts.as_deref() else {
            return Ok(vec![self.normalize(message).await?]);
        };

        let replies = self
            .transport
            .fetch_thread_replies(&message.channel, thread_ts)
            .await
            .map_err(BotError::Download)?;
        debug!("Thread {} has {} messages", thread_ts, replies.len());

        let mut history = Vec::with_capacity(replies.len());
        for reply in &replies {
            if reply.client_msg_id.is_some() {
                history.push(self.normalize(reply).await?);
            } else if reply.bot_id.is_some() && !self.is_waiting_message(&reply.text) {
                history.push(ChatMessage::assistant(reply.text.as_str()));
            }
        }
        Ok(history)
    }

    fn is_waiting_message(&self, text: &str) -> bool {
        self.config.bot.waiting_message.as_deref() == Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageContent, Role};
    use crate::testing::{
        audio_event, build_agent, file, test_agent, test_config, text_event, MockAi,
        MockTransport,
    };

    fn bot_reply(text: &str) -> RawEvent {
        RawEvent {
            channel: "C1".to_string(),
            ts: "1.5".to_string(),
            thread_ts: Some("1.0".to_string()),
            bot_id: Some("B1".to_string()),
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn thread_message(text: &str, ts: &str) -> RawEvent {
        RawEvent {
            ts: ts.to_string(),
            thread_ts: Some("1.0".to_string()),
            ..text_event(text)
        }
    }

    #[tokio::test]
    async fn plain_message_has_text_content() {
        let scratch = tempfile::tempdir().unwrap();
        let (agent, _transport, _ai) =
            test_agent(scratch.path(), MockAi::default(), MockTransport::default());

        let message = agent.normalize(&text_event("hello there")).await.unwrap();
        assert_eq!(message, ChatMessage::user("hello there"));
    }

    #[tokio::test]
    async fn image_attachment_becomes_two_parts() {
        let scratch = tempfile::tempdir().unwrap();
        let transport = MockTransport::default().with_download(b"\x89PNG".to_vec());
        let (agent, _transport, _ai) = test_agent(scratch.path(), MockAi::default(), transport);

        let mut event = text_event("what is this?");
        event.files = vec![file("PNG")];
        let message = agent.normalize(&event).await.unwrap();

        assert_eq!(message.role, Role::User);
        match message.content {
            Some(MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0], ContentPart::text("what is this?"));
                assert_eq!(
                    parts[1],
                    ContentPart::image_data("image/png", &STANDARD.encode(b"\x89PNG"))
                );
            }
            other => panic!("unexpected content: {:?}", other),
        }
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unrecognized_attachment_is_plain_text() {
        let scratch = tempfile::tempdir().unwrap();
        let transport = MockTransport::default().with_download(b"%PDF".to_vec());
        let (agent, transport, _ai) = test_agent(scratch.path(), MockAi::default(), transport);

        let mut event = text_event("see the attached report");
        event.files = vec![file("pdf")];
        let message = agent.normalize(&event).await.unwrap();

        assert_eq!(message, ChatMessage::user("see the attached report"));
        assert_eq!(transport.downloads(), 0);
    }

    #[tokio::test]
    async fn audio_attachment_is_transcribed() {
        let scratch = tempfile::tempdir().unwrap();
        let transport = MockTransport::default().with_download(b"OggS".to_vec());
        let ai = MockAi::default().with_transcript("turn on the lights");
        let (agent, _transport, _ai) = test_agent(scratch.path(), ai, transport);

        let message = agent
            .normalize(&audio_event("voice note", "ogg"))
            .await
            .unwrap();
        assert_eq!(
            message,
            ChatMessage::user_parts(vec![
                ContentPart::text("voice note"),
                ContentPart::text("Transcript of the audio:\nturn on the lights"),
            ])
        );
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scratch_file_removed_when_transcription_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let transport = MockTransport::default().with_download(b"RIFF".to_vec());
        let (agent, _transport, ai) = test_agent(scratch.path(), MockAi::default(), transport);

        let err = agent
            .normalize(&audio_event("voice note", "wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Action(_)));
        assert_eq!(ai.transcriptions(), 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_failure_propagates() {
        let scratch = tempfile::tempdir().unwrap();
        let (agent, _transport, _ai) =
            test_agent(scratch.path(), MockAi::default(), MockTransport::default());

        let mut event = text_event("look");
        event.files = vec![file("jpg")];
        assert!(matches!(
            agent.normalize(&event).await,
            Err(BotError::Download(_))
        ));
    }

    #[tokio::test]
    async fn unthreaded_message_is_its_own_history() {
        let scratch = tempfile::tempdir().unwrap();
        let (agent, _transport, _ai) =
            test_agent(scratch.path(), MockAi::default(), MockTransport::default());

        let history = agent.assemble(&text_event("hi")).await.unwrap();
        assert_eq!(history, vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn thread_history_skips_waiting_placeholder() {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = test_config(scratch.path());
        config.bot.waiting_message = Some("Thinking...".to_string());

        let transport = MockTransport::default().with_replies(vec![
            thread_message("lang what is a monad?", "1.0"),
            bot_reply("Thinking..."),
            bot_reply("A monoid in the category of endofunctors."),
            // system notices carry neither a client id nor a bot id
            RawEvent {
                text: "U2 joined the channel".to_string(),
                subtype: Some("channel_join".to_string()),
                ..Default::default()
            },
            thread_message("in plain words please", "2.0"),
        ]);
        let (agent, _transport, _ai) = build_agent(config, MockAi::default(), transport);

        let history = agent
            .assemble(&thread_message("in plain words please", "2.0"))
            .await
            .unwrap();
        assert_eq!(
            history,
            vec![
                ChatMessage::user("lang what is a monad?"),
                ChatMessage::assistant("A monoid in the category of endofunctors."),
                ChatMessage::user("in plain words please"),
            ]
        );
    }

    #[tokio::test]
    async fn failed_thread_fetch_is_an_error() {
        let scratch = tempfile::tempdir().unwrap();
        let (agent, _transport, _ai) = test_agent(
            scratch.path(),
            MockAi::default(),
            MockTransport::default().failing_replies(),
        );

        let result = agent.assemble(&thread_message("hi", "2.0")).await;
        assert!(matches!(result, Err(BotError::Download(_))));
    }
}
