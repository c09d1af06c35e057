use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BotError;
use crate::platform::{ChatTransport, SlackFile};

const IMAGE_TYPES: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const AUDIO_TYPES: &[&str] = &["mp3", "wav", "ogg", "flac"];
/// Audio the router transcribes directly; Slack voice clips arrive as webm.
const VOICE_TYPES: &[&str] = &["mp3", "wav", "ogg", "flac", "webm"];

/// How an attachment is fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Audio,
    Other,
}

impl FileKind {
    pub fn of(file: &SlackFile) -> Self {
        let filetype = file.filetype.to_ascii_lowercase();
        if IMAGE_TYPES.contains(&filetype.as_str()) {
            FileKind::Image
        } else if AUDIO_TYPES.contains(&filetype.as_str()) {
            FileKind::Audio
        } else {
            FileKind::Other
        }
    }
}

pub fn is_voice(file: &SlackFile) -> bool {
    VOICE_TYPES.contains(&file.filetype.to_ascii_lowercase().as_str())
}

/// Image or voice file the bot knows how to process.
pub fn is_supported(file: &SlackFile) -> bool {
    FileKind::of(file) == FileKind::Image || is_voice(file)
}

/// MIME type used for inline image data URLs.
pub fn image_mime(filetype: &str) -> &'static str {
    match filetype.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// A scratch copy of a downloaded or generated file.
///
/// The file is deleted when the value is dropped, so every exit path of the
/// owning scope releases it exactly once.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    /// Write `bytes` to a randomly named file in `scratch_dir`.
    pub async fn write(scratch_dir: &Path, extension: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let name = if extension.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), extension)
        };
        // Constructed before writing so a partial write is still cleaned up.
        let file = Self {
            path: scratch_dir.join(name),
        };
        tokio::fs::write(&file.path, bytes)
            .await
            .with_context(|| format!("Failed to write scratch file: {}", file.path.display()))?;
        debug!("Scratch file written: {}", file.path.display());
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read scratch file: {}", self.path.display()))
    }

    /// Delete the scratch file now.
    pub fn release(self) {}
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Scratch file removed: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Fetches attachments into the scratch directory.
#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    scratch_dir: PathBuf,
}

impl AttachmentResolver {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub async fn resolve(
        &self,
        file: &SlackFile,
        transport: &dyn ChatTransport,
    ) -> Result<LocalFile, BotError> {
        if file.url_private.is_empty() {
            return Err(BotError::Download(anyhow::anyhow!(
                "Attachment {} has no download URL",
                file.name.as_deref().unwrap_or("<unnamed>")
            )));
        }

        let bytes = transport
            .download_file(&file.url_private)
            .await
            .map_err(BotError::Download)?;
        let local = LocalFile::write(&self.scratch_dir, &file.filetype.to_ascii_lowercase(), &bytes)
            .await
            .map_err(BotError::Download)?;

        info!(
            "File saved: {} ({} bytes)",
            local.path().display(),
            bytes.len()
        );
        Ok(local)
    }
}
