//! Error kinds surfaced by the conversation pipeline.

/// Failures of a single conversation turn.
///
/// Plumbing code works in `anyhow::Result`; the pipeline wraps those errors
/// in the variant naming the stage that failed so the router can decide what
/// the user sees.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Fetching an attachment from the chat platform failed.
    #[error("{0:#}")]
    Download(anyhow::Error),

    /// The language model call failed or its answer could not be interpreted.
    #[error("{0:#}")]
    Model(anyhow::Error),

    /// Image/speech generation, transcription or upload failed.
    #[error("{0:#}")]
    Action(anyhow::Error),
}

impl BotError {
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Download(_) => "download",
            BotError::Model(_) => "model",
            BotError::Action(_) => "action",
        }
    }
}
