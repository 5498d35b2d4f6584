//! Spoken narration of story segments.

use crate::document::SegmentId;
use crate::providers::SpeechSynthesizer;
use crate::store::{AudioSegment, StoreError, StoryId, StoryStore};
use async_trait::async_trait;
use chrono::Utc;
use genai::Voice;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from narrating a segment.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("speech synthesis failed: {0}")]
    Speech(#[from] genai::Error),

    #[error("story {story} has no segment {segment}")]
    NoSuchSegment { story: StoryId, segment: SegmentId },

    #[error("could not store audio: {0}")]
    Media(#[from] std::io::Error),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),
}

/// Where audio bytes end up. Returns a URL the audio can be fetched from.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put_audio(&self, bytes: &[u8]) -> Result<String, std::io::Error>;
}

/// Writes `{uuid}.mp3` files into a directory.
#[derive(Debug, Clone)]
pub struct FileMediaStore {
    dir: PathBuf,
}

impl FileMediaStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        // Absolute paths make the file:// URLs usable from anywhere.
        let dir = fs::canonicalize(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MediaStore for FileMediaStore {
    async fn put_audio(&self, bytes: &[u8]) -> Result<String, std::io::Error> {
        let path = self.dir.join(format!("{}.mp3", Uuid::new_v4()));
        fs::write(&path, bytes).await?;
        Ok(format!("file://{}", path.display()))
    }
}

/// Synthesizes a segment, stores the audio and attaches it to the story.
#[derive(Clone)]
pub struct Narrator {
    speech: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaStore>,
    store: Arc<dyn StoryStore>,
}

impl Narrator {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaStore>,
        store: Arc<dyn StoryStore>,
    ) -> Self {
        Self {
            speech,
            media,
            store,
        }
    }

    #[tracing::instrument(skip(self), fields(story_id = %story))]
    pub async fn narrate(
        &self,
        story: StoryId,
        segment: SegmentId,
        voice: Voice,
    ) -> Result<AudioSegment, NarrationError> {
        let record = self.store.get_story(story).await?;
        let text = record
            .content
            .segment(segment)
            .map(|s| s.text.clone())
            .ok_or(NarrationError::NoSuchSegment { story, segment })?;

        let bytes = self.speech.synthesize(&text, voice).await?;
        let audio_url = self.media.put_audio(&bytes).await?;

        let audio = AudioSegment {
            story,
            segment_index: segment.get(),
            voice,
            audio_url,
            created_at: Utc::now(),
        };
        self.store.attach_audio(&audio).await?;

        tracing::info!(voice = %voice, url = %audio.audio_url, "narration stored");
        Ok(audio)
    }
}
