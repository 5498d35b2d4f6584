//! Testing utilities for the story pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockTextGenerator`, `MockImageGenerator` and `MockSpeech` for
//!   deterministic tests without API calls
//! - `FailingStore` for exercising persistence failure paths
//! - `TestHarness` for scripted generation scenarios
//! - Assertion helpers for verifying documents and traversal

use crate::assembler::AssembledStory;
use crate::config::PipelineConfig;
use crate::document::{Origin, StoryDocument, StorySegment};
use crate::feed::{Feed, FeedQuery};
use crate::pipeline::{PipelineError, StoryPipeline};
use crate::providers::{ImageGenerator, SpeechSynthesizer, TextGenerator};
use crate::reader::StoryReader;
use crate::store::{
    AudioSegment, InteractionRecord, MemoryStore, StoreError, StoryId, StoryRecord, StoryStore,
    UserId, VoteType,
};
use crate::traversal::TraversalState;
use async_trait::async_trait;
use genai::{Completion, CompletionRequest, FinishReason, GeneratedImage, ImageRequest, Usage, Voice};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Generative service doubles
// ============================================================================

/// A text generator that returns scripted replies in order.
///
/// Once the script runs out it returns the default reply if one is set,
/// otherwise [`genai::Error::EmptyResponse`].
#[derive(Default)]
pub struct MockTextGenerator {
    script: Mutex<VecDeque<Scripted>>,
    default_reply: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

struct Scripted {
    reply: Result<String, genai::Error>,
    delay: Option<Duration>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a completion text.
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.queue_reply(text);
        self
    }

    /// Queue a provider error.
    pub fn then_error(self, error: genai::Error) -> Self {
        self.queue_error(error);
        self
    }

    /// Queue a completion text that arrives only after `delay`.
    pub fn then_slow_reply(self, text: impl Into<String>, delay: Duration) -> Self {
        lock(&self.script).push_back(Scripted {
            reply: Ok(text.into()),
            delay: Some(delay),
        });
        self
    }

    /// Reply used after the script is exhausted.
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    /// Sleep this long before every reply (use with paused tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        lock(&self.script).push_back(Scripted {
            reply: Ok(text.into()),
            delay: None,
        });
    }

    pub fn queue_error(&self, error: genai::Error) {
        lock(&self.script).push_back(Scripted {
            reply: Err(error),
            delay: None,
        });
    }

    /// Number of completion requests received.
    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Prompts received, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, genai::Error> {
        lock(&self.prompts).push(request.prompt.clone());

        let next = lock(&self.script).pop_front();
        let delay = next.as_ref().and_then(|entry| entry.delay).or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let text = match next {
            Some(entry) => entry.reply?,
            None => self
                .default_reply
                .clone()
                .ok_or(genai::Error::EmptyResponse)?,
        };

        Ok(Completion {
            model: request.model.unwrap_or_else(|| "mock".to_string()),
            text,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        })
    }
}

/// An image generator that always returns the same URL, or always fails.
pub struct MockImageGenerator {
    result: Result<String, genai::Error>,
    calls: AtomicUsize,
}

impl MockImageGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            result: Ok(url.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: genai::Error) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, genai::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = self.result.clone()?;
        Ok(GeneratedImage {
            url,
            revised_prompt: Some(request.prompt),
        })
    }
}

/// A speech synthesizer returning fixed bytes and recording its requests.
pub struct MockSpeech {
    failure: Option<genai::Error>,
    requests: Mutex<Vec<(String, Voice)>>,
}

impl MockSpeech {
    /// Bytes returned by every successful synthesis.
    pub const AUDIO: &'static [u8] = b"ID3mock-audio";

    pub fn new() -> Self {
        Self {
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: genai::Error) -> Self {
        Self {
            failure: Some(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, Voice)> {
        lock(&self.requests).clone()
    }
}

impl Default for MockSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, genai::Error> {
        lock(&self.requests).push((text.to_string(), voice));
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(Self::AUDIO.to_vec()),
        }
    }
}

// ============================================================================
// Store double
// ============================================================================

/// A [`MemoryStore`] whose operations can be made to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_inserts: AtomicBool,
    fail_lookups: AtomicBool,
    fail_votes: AtomicBool,
    fail_interactions: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `insert_story`.
    pub fn failing_inserts(self) -> Self {
        self.fail_inserts.store(true, Ordering::SeqCst);
        self
    }

    /// Fail `latest_generated_for_location`.
    pub fn failing_lookups(self) -> Self {
        self.fail_lookups.store(true, Ordering::SeqCst);
        self
    }

    /// Fail `set_vote` and `clear_vote`.
    pub fn failing_votes(self) -> Self {
        self.fail_votes.store(true, Ordering::SeqCst);
        self
    }

    /// Fail `record_interaction`.
    pub fn failing_interactions(self) -> Self {
        self.fail_interactions.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// The underlying store, for inspection.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{operation} disabled for test")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoryStore for FailingStore {
    async fn insert_story(&self, record: &StoryRecord) -> Result<(), StoreError> {
        Self::check(&self.fail_inserts, "insert_story")?;
        self.inner.insert_story(record).await
    }

    async fn get_story(&self, id: StoryId) -> Result<StoryRecord, StoreError> {
        self.inner.get_story(id).await
    }

    async fn latest_generated_for_location(
        &self,
        location: &str,
    ) -> Result<Option<StoryRecord>, StoreError> {
        Self::check(&self.fail_lookups, "latest_generated_for_location")?;
        self.inner.latest_generated_for_location(location).await
    }

    async fn list_public(&self, query: &FeedQuery) -> Result<Vec<StoryRecord>, StoreError> {
        self.inner.list_public(query).await
    }

    async fn record_interaction(&self, interaction: &InteractionRecord) -> Result<(), StoreError> {
        Self::check(&self.fail_interactions, "record_interaction")?;
        self.inner.record_interaction(interaction).await
    }

    async fn set_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        Self::check(&self.fail_votes, "set_vote")?;
        self.inner.set_vote(user, story).await
    }

    async fn clear_vote(&self, user: UserId, story: StoryId) -> Result<u32, StoreError> {
        Self::check(&self.fail_votes, "clear_vote")?;
        self.inner.clear_vote(user, story).await
    }

    async fn vote_of(&self, user: UserId, story: StoryId) -> Result<Option<VoteType>, StoreError> {
        self.inner.vote_of(user, story).await
    }

    async fn attach_audio(&self, audio: &AudioSegment) -> Result<(), StoreError> {
        self.inner.attach_audio(audio).await
    }
}

// ============================================================================
// Test harness
// ============================================================================

/// Test harness for running generation scenarios against mocks.
pub struct TestHarness {
    /// Scripted text generator.
    pub text: Arc<MockTextGenerator>,
    /// Image generator returning one fixed URL.
    pub images: Arc<MockImageGenerator>,
    /// Store with switchable failures.
    pub store: Arc<FailingStore>,
    /// The user generating stories.
    pub user: UserId,
    pipeline: StoryPipeline,
}

impl TestHarness {
    /// URL returned by the harness image generator.
    pub const IMAGE_URL: &'static str = "https://images.test/scene.png";

    /// Create a harness with millisecond retry delays and no quota.
    pub fn new() -> Self {
        Self::with_store(FailingStore::new())
    }

    /// Create a harness over a pre-configured store.
    pub fn with_store(store: FailingStore) -> Self {
        let config = PipelineConfig::default()
            .with_retry_delays(Duration::from_millis(1), Duration::from_millis(2))
            .with_daily_limit(None);
        let text = Arc::new(MockTextGenerator::new());
        let images = Arc::new(MockImageGenerator::new(Self::IMAGE_URL));
        Self::build(Arc::new(store), text, images, config)
    }

    /// Replace the pipeline configuration, keeping the mocks and store.
    pub fn with_config(self, config: PipelineConfig) -> Self {
        let user = self.user;
        let mut harness = Self::build(self.store, self.text, self.images, config);
        harness.user = user;
        harness
    }

    fn build(
        store: Arc<FailingStore>,
        text: Arc<MockTextGenerator>,
        images: Arc<MockImageGenerator>,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = StoryPipeline::new(text.clone(), store.clone(), config)
            .with_images(images.clone());
        Self {
            text,
            images,
            store,
            user: UserId::new(),
            pipeline,
        }
    }

    /// Queue a completion text.
    pub fn expect_completion(&mut self, text: impl Into<String>) -> &mut Self {
        self.text.queue_reply(text);
        self
    }

    /// Queue a provider error.
    pub fn expect_error(&mut self, error: genai::Error) -> &mut Self {
        self.text.queue_error(error);
        self
    }

    pub fn pipeline(&self) -> &StoryPipeline {
        &self.pipeline
    }

    /// Generate a story as the harness user.
    pub async fn generate(&self, location: &str) -> Result<AssembledStory, PipelineError> {
        self.pipeline.generate(location, self.user).await
    }

    /// Open a reading session as the harness user.
    pub async fn read(&self, story: StoryId) -> Result<StoryReader, StoreError> {
        StoryReader::open(self.store.clone(), story, self.user).await
    }

    pub fn feed(&self) -> Feed {
        Feed::new(self.store.clone())
    }

    pub async fn story_count(&self) -> usize {
        self.store.inner().story_count().await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a document came from the given source.
#[track_caller]
pub fn assert_origin(doc: &StoryDocument, expected: Origin) {
    assert_eq!(
        doc.origin(),
        expected,
        "Expected origin '{expected}', got '{}' (error log: {:?})",
        doc.origin(),
        doc.provenance().error_log
    );
}

/// Assert a segment's choice labels, in order.
#[track_caller]
pub fn assert_choice_labels(segment: &StorySegment, expected: &[&str]) {
    let labels: Vec<&str> = segment.choices.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(labels, expected, "Unexpected choice labels on segment {}", segment.id);
}

/// Assert a segment's choice targets, in order.
#[track_caller]
pub fn assert_choice_targets(segment: &StorySegment, expected: &[u32]) {
    let targets: Vec<u32> = segment.choices.iter().map(|c| c.next_segment.get()).collect();
    assert_eq!(targets, expected, "Unexpected choice targets on segment {}", segment.id);
}

/// Assert the document is a single terminal segment.
#[track_caller]
pub fn assert_single_terminal_segment(doc: &StoryDocument) {
    assert_eq!(doc.segments().len(), 1, "Expected exactly one segment");
    assert!(doc.root().is_terminal(), "Expected the only segment to be terminal");
}

/// Assert a traversal's current segment and path.
#[track_caller]
pub fn assert_path(state: &TraversalState, expected: &[u32]) {
    let path: Vec<u32> = state.path().iter().map(|id| id.get()).collect();
    assert_eq!(path, expected, "Unexpected traversal path");
    assert_eq!(
        Some(state.current().get()),
        expected.last().copied(),
        "Current segment should be the end of the path"
    );
}
