//! Story persistence.
//!
//! The backing store is an external collaborator; [`StoryStore`] is the seam.
//! Two implementations ship here: [`MemoryStore`] for tests and single
//! processes, and [`JsonStore`] which keeps one versioned JSON file per story
//! plus a ledger of votes and interactions in a data directory.

use crate::document::{Origin, StoryDocument};
use crate::feed::FeedQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genai::Voice;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("story {0} not found")]
    NotFound(StoryId),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

/// Unique identifier for stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoryId(pub Uuid);

impl StoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Unique identifier for users. Authentication happens elsewhere; this is
/// only the identity the store keys votes and interactions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A persisted story with its feed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: StoryId,
    pub author: UserId,
    pub title: String,
    pub location: String,
    pub content: StoryDocument,
    pub cultural_insights: Vec<String>,
    pub image_urls: Vec<String>,
    pub is_public: bool,
    /// Maintained by the store alongside vote rows.
    pub upvotes: u32,
    #[serde(default)]
    pub generation_prompt: Option<String>,
    pub ai_generated: bool,
    pub used_fallback: bool,
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default)]
    pub audio: Vec<AudioSegment>,
    pub created_at: DateTime<Utc>,
}

impl StoryRecord {
    /// Build a public record whose flags mirror the document's provenance.
    pub fn new(author: UserId, location: impl Into<String>, content: StoryDocument) -> Self {
        let provenance = content.provenance().clone();
        Self {
            id: StoryId::new(),
            author,
            title: content.title().to_string(),
            location: location.into(),
            cultural_insights: content.cultural_insights().to_vec(),
            image_urls: content.image_urls(),
            is_public: true,
            upvotes: 0,
            generation_prompt: None,
            ai_generated: provenance.origin == Origin::Generated,
            used_fallback: provenance.origin.is_fallback(),
            error_log: provenance.error_log,
            audio: Vec::new(),
            created_at: Utc::now(),
            content,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.generation_prompt = Some(prompt.into());
        self
    }

    pub fn with_visibility(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn origin(&self) -> Origin {
        self.content.origin()
    }

    fn matches_location(&self, location: &str) -> bool {
        self.location.trim().eq_ignore_ascii_case(location.trim())
    }
}

/// Kind of vote. Only upvotes exist; clearing removes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
}

/// One vote row. At most one per (user, story).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub user: UserId,
    pub story: StoryId,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

/// A reading session log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user: UserId,
    pub story: StoryId,
    /// `segment_{id}` to the label chosen there (latest visit wins).
    #[serde(default)]
    pub choices_made: BTreeMap<String, String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

impl InteractionRecord {
    /// A plain "read" entry with no choices.
    pub fn read(user: UserId, story: StoryId) -> Self {
        Self {
            user,
            story,
            choices_made: BTreeMap::new(),
            completed_at: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Narration audio attached to one segment of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub story: StoryId,
    pub segment_index: u32,
    pub voice: Voice,
    pub audio_url: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam for stories, votes and interactions.
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn insert_story(&self, record: &StoryRecord) -> Result<(), StoreError>;

    async fn get_story(&self, id: StoryId) -> Result<StoryRecord, StoreError>;

    /// Most recent AI-generated story for a location (case-insensitive).
    async fn latest_generated_for_location(
        &self,
        location: &str,
    ) -> Result<Option<StoryRecord>, StoreError>;

    async fn list_public(&self, query: &FeedQuery) -> Result<Vec<StoryRecord>, StoreError>;

    async fn record_interaction(&self, interaction: &InteractionRecord) -> Result<(), StoreError>;

    /// Upvote a story. Increments the counter only if the user had no vote.
    /// Returns the story's new count.
    async fn set_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError>;

    /// Remove a user's vote. Decrements the counter only if a vote existed,
    /// never below zero. Returns the story's new count.
    async fn clear_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError>;

    async fn vote_of(&self, user: UserId, story: StoryId) -> Result<Option<VoteType>, StoreError>;

    /// Attach narration, replacing any earlier audio for the same segment
    /// and voice.
    async fn attach_audio(&self, audio: &AudioSegment) -> Result<(), StoreError>;
}

fn push_audio(record: &mut StoryRecord, audio: &AudioSegment) {
    record
        .audio
        .retain(|a| !(a.segment_index == audio.segment_index && a.voice == audio.voice));
    record.audio.push(audio.clone());
}

fn latest_generated<'a>(
    records: impl IntoIterator<Item = &'a StoryRecord>,
    location: &str,
) -> Option<StoryRecord> {
    records
        .into_iter()
        .filter(|r| r.origin() == Origin::Generated && r.matches_location(location))
        .max_by_key(|r| r.created_at)
        .cloned()
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    stories: HashMap<StoryId, StoryRecord>,
    votes: HashMap<(UserId, StoryId), VoteRecord>,
    interactions: Vec<InteractionRecord>,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn story_count(&self) -> usize {
        self.state.read().await.stories.len()
    }

    /// Interactions logged for a story, oldest first.
    pub async fn interactions_for(&self, story: StoryId) -> Vec<InteractionRecord> {
        self.state
            .read()
            .await
            .interactions
            .iter()
            .filter(|i| i.story == story)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn insert_story(&self, record: &StoryRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .stories
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get_story(&self, id: StoryId) -> Result<StoryRecord, StoreError> {
        self.state
            .read()
            .await
            .stories
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn latest_generated_for_location(
        &self,
        location: &str,
    ) -> Result<Option<StoryRecord>, StoreError> {
        Ok(latest_generated(self.state.read().await.stories.values(), location))
    }

    async fn list_public(&self, query: &FeedQuery) -> Result<Vec<StoryRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(query.apply(state.stories.values().cloned()))
    }

    async fn record_interaction(&self, interaction: &InteractionRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .interactions
            .push(interaction.clone());
        Ok(())
    }

    async fn set_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let record = state
            .stories
            .get_mut(&story)
            .ok_or(StoreError::NotFound(story))?;

        if !state.votes.contains_key(&(user, story)) {
            state.votes.insert(
                (user, story),
                VoteRecord {
                    user,
                    story,
                    vote_type: VoteType::Upvote,
                    created_at: Utc::now(),
                },
            );
            record.upvotes += 1;
        }
        Ok(record.upvotes)
    }

    async fn clear_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let record = state
            .stories
            .get_mut(&story)
            .ok_or(StoreError::NotFound(story))?;

        if state.votes.remove(&(user, story)).is_some() {
            record.upvotes = record.upvotes.saturating_sub(1);
        }
        Ok(record.upvotes)
    }

    async fn vote_of(&self, user: UserId, story: StoryId) -> Result<Option<VoteType>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .votes
            .get(&(user, story))
            .map(|v| v.vote_type))
    }

    async fn attach_audio(&self, audio: &AudioSegment) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .stories
            .get_mut(&audio.story)
            .ok_or(StoreError::NotFound(audio.story))?;
        push_audio(record, audio);
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// A story file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedStory {
    version: u32,
    saved_at: DateTime<Utc>,
    record: StoryRecord,
}

/// Votes and interactions, kept in one file next to the stories.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ledger {
    version: u32,
    #[serde(default)]
    votes: Vec<VoteRecord>,
    #[serde(default)]
    interactions: Vec<InteractionRecord>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            votes: Vec::new(),
            interactions: Vec::new(),
        }
    }
}

fn check_version(found: u32) -> Result<(), StoreError> {
    if found != STORE_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: STORE_VERSION,
            found,
        });
    }
    Ok(())
}

/// File-backed store rooted at a data directory:
///
/// ```text
/// <dir>/stories/<story id>.json
/// <dir>/ledger.json
/// ```
///
/// All writes go through one lock, so a vote row and its counter change are
/// applied together within a process.
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (and create if needed) a store in `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("stories")).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn story_path(&self, id: StoryId) -> PathBuf {
        self.dir.join("stories").join(format!("{id}.json"))
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.join("ledger.json")
    }

    async fn load_story(path: &Path) -> Result<StoryRecord, StoreError> {
        let content = fs::read_to_string(path).await?;
        let saved: SavedStory = serde_json::from_str(&content)?;
        check_version(saved.version)?;
        Ok(saved.record)
    }

    async fn save_story(&self, record: &StoryRecord) -> Result<(), StoreError> {
        let saved = SavedStory {
            version: STORE_VERSION,
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(self.story_path(record.id), content).await?;
        Ok(())
    }

    async fn read_story(&self, id: StoryId) -> Result<StoryRecord, StoreError> {
        match Self::load_story(&self.story_path(id)).await {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id))
            }
            other => other,
        }
    }

    /// Every readable story. Files that fail to load are skipped with a warning.
    async fn all_stories(&self) -> Result<Vec<StoryRecord>, StoreError> {
        let mut stories = Vec::new();
        let mut entries = fs::read_dir(self.dir.join("stories")).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Self::load_story(&path).await {
                    Ok(record) => stories.push(record),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable story file")
                    }
                }
            }
        }
        Ok(stories)
    }

    async fn load_ledger(&self) -> Result<Ledger, StoreError> {
        let content = match fs::read_to_string(self.ledger_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::default()),
            Err(e) => return Err(e.into()),
        };
        let ledger: Ledger = serde_json::from_str(&content)?;
        check_version(ledger.version)?;
        Ok(ledger)
    }

    async fn save_ledger(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(ledger)?;
        fs::write(self.ledger_path(), content).await?;
        Ok(())
    }

    /// Write a vote change: the ledger, then the story's counter. If the
    /// story write fails the previous ledger is put back so the vote rows
    /// and the counter stay in step.
    async fn commit_vote(
        &self,
        previous: &Ledger,
        ledger: &Ledger,
        record: &StoryRecord,
    ) -> Result<(), StoreError> {
        self.save_ledger(ledger).await?;
        if let Err(e) = self.save_story(record).await {
            if let Err(restore) = self.save_ledger(previous).await {
                tracing::error!(story = %record.id, error = %restore, "failed to restore vote ledger");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Interactions logged for a story, oldest first.
    pub async fn interactions_for(
        &self,
        story: StoryId,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        Ok(self
            .load_ledger()
            .await?
            .interactions
            .into_iter()
            .filter(|i| i.story == story)
            .collect())
    }
}

#[async_trait]
impl StoryStore for JsonStore {
    async fn insert_story(&self, record: &StoryRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.save_story(record).await
    }

    async fn get_story(&self, id: StoryId) -> Result<StoryRecord, StoreError> {
        self.read_story(id).await
    }

    async fn latest_generated_for_location(
        &self,
        location: &str,
    ) -> Result<Option<StoryRecord>, StoreError> {
        let stories = self.all_stories().await?;
        Ok(latest_generated(&stories, location))
    }

    async fn list_public(&self, query: &FeedQuery) -> Result<Vec<StoryRecord>, StoreError> {
        Ok(query.apply(self.all_stories().await?))
    }

    async fn record_interaction(&self, interaction: &InteractionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.load_ledger().await?;
        ledger.interactions.push(interaction.clone());
        self.save_ledger(&ledger).await
    }

    async fn set_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_story(story).await?;
        let previous = self.load_ledger().await?;

        if previous.votes.iter().any(|v| v.user == user && v.story == story) {
            return Ok(record.upvotes);
        }

        let mut ledger = previous.clone();
        ledger.votes.push(VoteRecord {
            user,
            story,
            vote_type: VoteType::Upvote,
            created_at: Utc::now(),
        });
        record.upvotes += 1;

        self.commit_vote(&previous, &ledger, &record).await?;
        Ok(record.upvotes)
    }

    async fn clear_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_story(story).await?;
        let previous = self.load_ledger().await?;

        let mut ledger = previous.clone();
        ledger
            .votes
            .retain(|v| !(v.user == user && v.story == story));
        if ledger.votes.len() == previous.votes.len() {
            return Ok(record.upvotes);
        }

        record.upvotes = record.upvotes.saturating_sub(1);
        self.commit_vote(&previous, &ledger, &record).await?;
        Ok(record.upvotes)
    }

    async fn vote_of(&self, user: UserId, story: StoryId) -> Result<Option<VoteType>, StoreError> {
        Ok(self
            .load_ledger()
            .await?
            .votes
            .iter()
            .find(|v| v.user == user && v.story == story)
            .map(|v| v.vote_type))
    }

    async fn attach_audio(&self, audio: &AudioSegment) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_story(audio.story).await?;
        push_audio(&mut record, audio);
        self.save_story(&record).await
    }
}
