//! Location in, persisted story out.
//!
//! The pipeline always produces *a* story: remote failures, timeouts and
//! unparseable completions all escalate to the [`FallbackResolver`]. Only
//! invalid input, an exhausted quota, cancellation and a failed primary
//! write are returned as errors.

use crate::assembler::{AssembledStory, StoryAssembler};
use crate::config::PipelineConfig;
use crate::document::{Origin, StoryDocument};
use crate::fallback::{default_insights, FallbackResolver};
use crate::parser::{parse_completion, ParseError};
use crate::prompts::{scene_prompt, story_prompt, STORYTELLER_SYSTEM_PROMPT};
use crate::providers::{ImageGenerator, TextGenerator};
use crate::quota::GenerationQuota;
use crate::store::{StoreError, StoryStore, UserId};
use chrono::{DateTime, Utc};
use genai::{CompletionRequest, ImageRequest};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry2::strategy::{jitter, ExponentialFactorBackoff};
use tokio_retry2::{Retry, RetryError};

/// Errors returned to the caller of [`StoryPipeline::generate`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a location is required")]
    InvalidLocation,

    #[error("daily limit of {limit} stories reached; resets at {next_reset}")]
    QuotaExceeded {
        limit: u32,
        next_reset: DateTime<Utc>,
    },

    #[error("generation cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Why the generation path gave up. Recorded as the fallback's error log.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("remote call failed: {0}")]
    Remote(#[from] genai::Error),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not parse completion: {0}")]
    Parse(#[from] ParseError),
}

/// The story generation pipeline.
pub struct StoryPipeline {
    text: Arc<dyn TextGenerator>,
    images: Option<Arc<dyn ImageGenerator>>,
    store: Arc<dyn StoryStore>,
    assembler: StoryAssembler,
    fallback: FallbackResolver,
    quota: Option<GenerationQuota>,
    config: PipelineConfig,
}

impl StoryPipeline {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        store: Arc<dyn StoryStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            text,
            images: None,
            assembler: StoryAssembler::new(store.clone()),
            store,
            fallback: FallbackResolver::new(),
            quota: config.daily_limit.map(GenerationQuota::new),
            config,
        }
    }

    /// Generate scene images for fresh stories.
    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_stock_images(mut self, images: Vec<String>) -> Self {
        self.assembler = self.assembler.with_stock_images(images);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.store
    }

    /// Generate and persist a story for `location`.
    pub async fn generate(
        &self,
        location: &str,
        user: UserId,
    ) -> Result<AssembledStory, PipelineError> {
        self.generate_until(location, user, std::future::pending())
            .await
    }

    /// Like [`generate`](Self::generate), abandoning the work if `cancel`
    /// completes first.
    ///
    /// Cancellation is honoured up to the start of persistence: nothing is
    /// written and [`PipelineError::Cancelled`] is returned. Once the story
    /// write has started the result is always applied and returned.
    #[tracing::instrument(skip(self, cancel), fields(user = %user))]
    pub async fn generate_until<C>(
        &self,
        location: &str,
        user: UserId,
        cancel: C,
    ) -> Result<AssembledStory, PipelineError>
    where
        C: Future<Output = ()>,
    {
        let location = location.trim();
        if location.is_empty() {
            return Err(PipelineError::InvalidLocation);
        }

        // Held until the story is stored; dropped on any early return.
        let reservation = match &self.quota {
            Some(quota) => Some(quota.reserve(user, Utc::now()).map_err(|e| {
                PipelineError::QuotaExceeded {
                    limit: quota.limit(),
                    next_reset: e.next_reset,
                }
            })?),
            None => None,
        };

        let prompt = story_prompt(location);
        let doc = tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!("generation cancelled before persistence");
                return Err(PipelineError::Cancelled);
            }
            doc = self.prepare(location, &prompt) => doc,
        };

        let assembled = self
            .assembler
            .persist(user, location, doc, Some(prompt))
            .await?;

        if let Some(reservation) = reservation {
            let remaining = reservation.commit();
            tracing::debug!(remaining, "quota consumed");
        }

        tracing::info!(
            story_id = %assembled.record.id,
            origin = %assembled.record.origin(),
            "story generated"
        );
        Ok(assembled)
    }

    /// Everything before persistence: text, parse or fallback, images.
    async fn prepare(&self, location: &str, prompt: &str) -> StoryDocument {
        let doc = match self.generate_document(prompt).await {
            Ok(doc) => doc.with_cultural_insights(default_insights(location)),
            Err(e) => {
                tracing::warn!(location, error = %e, "generation failed, using fallback");
                self.fallback
                    .resolve(self.store.as_ref(), location, &e.to_string())
                    .await
            }
        };

        let images = if doc.origin() == Origin::Generated {
            self.scene_images(&doc, location).await
        } else {
            Vec::new()
        };
        self.assembler.attach_images(doc, &images)
    }

    async fn generate_document(&self, prompt: &str) -> Result<StoryDocument, GenerationError> {
        let text = self.complete_with_retry(prompt).await?;
        Ok(parse_completion(&text)?)
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut request = CompletionRequest::new(prompt)
            .with_system(STORYTELLER_SYSTEM_PROMPT)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.text_model {
            request = request.with_model(model);
        }

        let timeout = self.config.generation_timeout;
        let strategy = retry_backoff(&self.config)
            .map(jitter)
            .take(self.config.max_attempts.saturating_sub(1));

        let completion = Retry::spawn(strategy, || {
            let request = request.clone();
            async move {
                match tokio::time::timeout(timeout, self.text.complete(request)).await {
                    Ok(Ok(completion)) => Ok(completion),
                    Ok(Err(e)) if e.is_retryable() => {
                        tracing::warn!(error = %e, "transient text generation error, will retry");
                        Err(RetryError::Transient {
                            err: GenerationError::Remote(e),
                            retry_after: None,
                        })
                    }
                    Ok(Err(e)) => Err(RetryError::Permanent(GenerationError::Remote(e))),
                    Err(_) => {
                        tracing::warn!(?timeout, "text generation timed out");
                        Err(RetryError::Transient {
                            err: GenerationError::Timeout(timeout),
                            retry_after: None,
                        })
                    }
                }
            }
        })
        .await?;

        tracing::debug!(
            model = %completion.model,
            completion_tokens = completion.usage.completion_tokens,
            "completion received"
        );
        Ok(completion.text)
    }

    /// One image per segment; a failed request leaves that slot empty.
    async fn scene_images(&self, doc: &StoryDocument, location: &str) -> Vec<Option<String>> {
        let Some(images) = self.images.as_ref().filter(|_| self.config.generate_images) else {
            return Vec::new();
        };

        let mut urls = Vec::with_capacity(doc.segments().len());
        for segment in doc.segments() {
            let request =
                ImageRequest::new(scene_prompt(doc.title(), &segment.text)).with_location(location);
            match images.generate(request).await {
                Ok(image) => urls.push(Some(image.url)),
                Err(e) => {
                    tracing::warn!(segment = %segment.id, error = %e, "image generation failed");
                    urls.push(None);
                }
            }
        }
        urls
    }
}

/// Delays between attempts before jitter: the base delay, doubling, capped.
fn retry_backoff(config: &PipelineConfig) -> ExponentialFactorBackoff {
    let base = u64::try_from(config.retry_base_delay.as_millis())
        .unwrap_or(u64::MAX)
        .max(1);
    ExponentialFactorBackoff::from_millis(base, 2.0).max_delay(config.retry_max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStore, MockImageGenerator, MockTextGenerator};
    use crate::store::MemoryStore;

    const LANTERNS: &str = "Title: The Lantern District\nYou wander past glowing lanterns.\nA. Enter the shrine\nB. Visit the tea house\nC. Follow the river";

    fn fast_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_retry_delays(Duration::from_millis(1), Duration::from_millis(2))
            .with_generation_timeout(Duration::from_secs(5))
    }

    fn pipeline(text: Arc<MockTextGenerator>, config: PipelineConfig) -> StoryPipeline {
        StoryPipeline::new(text, Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_blank_location_rejected() {
        let text = Arc::new(MockTextGenerator::new());
        let err = pipeline(text.clone(), fast_config())
            .generate("   ", UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidLocation));
        assert_eq!(text.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let text = Arc::new(
            MockTextGenerator::new()
                .then_error(genai::Error::Network("reset".into()))
                .then_reply(LANTERNS),
        );
        let story = pipeline(text.clone(), fast_config())
            .generate("Kyoto, Japan", UserId::new())
            .await
            .unwrap();

        assert_eq!(text.call_count(), 2);
        assert_eq!(story.record.origin(), Origin::Generated);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let text = Arc::new(
            MockTextGenerator::new()
                .then_error(genai::Error::Api {
                    status: 401,
                    message: "bad key".into(),
                })
                .then_reply(LANTERNS),
        );
        let story = pipeline(text.clone(), fast_config())
            .generate("Kyoto, Japan", UserId::new())
            .await
            .unwrap();

        assert_eq!(text.call_count(), 1);
        assert_eq!(story.record.origin(), Origin::FallbackGeneric);
        assert!(story.record.error_log.unwrap().contains("bad key"));
    }

    #[test]
    fn test_retry_delays_double_from_base() {
        let delays: Vec<Duration> = retry_backoff(&PipelineConfig::default()).take(5).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );

        let fast = fast_config();
        let delays: Vec<Duration> = retry_backoff(&fast).take(3).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_retried() {
        let text = Arc::new(
            MockTextGenerator::new()
                .then_slow_reply(LANTERNS, Duration::from_secs(120))
                .then_reply(LANTERNS),
        );
        let config = fast_config()
            .with_generation_timeout(Duration::from_secs(1))
            .with_max_attempts(2);
        let story = pipeline(text.clone(), config)
            .generate("Lisbon", UserId::new())
            .await
            .unwrap();

        assert_eq!(text.call_count(), 2);
        assert_eq!(story.record.origin(), Origin::Generated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_escalates_to_fallback() {
        let text = Arc::new(MockTextGenerator::new().with_delay(Duration::from_secs(120)));
        let config = fast_config()
            .with_generation_timeout(Duration::from_secs(1))
            .with_max_attempts(1);
        let story = pipeline(text, config)
            .generate("Lisbon", UserId::new())
            .await
            .unwrap();

        assert_eq!(story.record.origin(), Origin::FallbackGeneric);
        assert!(story.record.error_log.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_images_requested_for_generated_stories() {
        let text = Arc::new(MockTextGenerator::new().then_reply(LANTERNS));
        let images = Arc::new(MockImageGenerator::new("https://gen/scene.png"));
        let story = pipeline(text, fast_config())
            .with_images(images.clone())
            .generate("Kyoto, Japan", UserId::new())
            .await
            .unwrap();

        assert_eq!(images.call_count(), 1);
        assert_eq!(story.record.image_urls, vec!["https://gen/scene.png"]);
        assert_eq!(story.record.cultural_insights.len(), 3);
    }

    #[tokio::test]
    async fn test_no_images_for_fallbacks() {
        let text = Arc::new(MockTextGenerator::new().then_reply(""));
        let images = Arc::new(MockImageGenerator::new("https://gen/scene.png"));
        let story = pipeline(text, fast_config())
            .with_images(images.clone())
            .generate("Kyoto, Japan", UserId::new())
            .await
            .unwrap();

        assert_eq!(images.call_count(), 0);
        assert!(crate::assembler::STOCK_IMAGES.contains(&story.record.image_urls[0].as_str()));
    }

    #[tokio::test]
    async fn test_quota() {
        let text = Arc::new(MockTextGenerator::new().with_default_reply(LANTERNS));
        let pipeline = pipeline(text, fast_config().with_daily_limit(Some(1)));
        let user = UserId::new();

        pipeline.generate("Kyoto", user).await.unwrap();
        let err = pipeline.generate("Kyoto", user).await.unwrap_err();
        assert!(matches!(err, PipelineError::QuotaExceeded { limit: 1, .. }));

        pipeline.generate("Kyoto", UserId::new()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_generations_share_quota() {
        let text = Arc::new(
            MockTextGenerator::new()
                .with_delay(Duration::from_secs(1))
                .with_default_reply(LANTERNS),
        );
        let pipeline = pipeline(text.clone(), fast_config().with_daily_limit(Some(1)));
        let user = UserId::new();

        let (first, second) = tokio::join!(
            pipeline.generate("Kyoto", user),
            pipeline.generate("Osaka", user)
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(PipelineError::QuotaExceeded { limit: 1, .. }))));
        assert_eq!(text.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_persistence_returns_quota() {
        let store = Arc::new(FailingStore::new().failing_inserts());
        let text = Arc::new(MockTextGenerator::new().with_default_reply(LANTERNS));
        let pipeline =
            StoryPipeline::new(text, store.clone(), fast_config().with_daily_limit(Some(1)));
        let user = UserId::new();

        let err = pipeline.generate("Kyoto", user).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));

        store.set_fail_inserts(false);
        pipeline.generate("Kyoto", user).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_persistence() {
        let store = Arc::new(MemoryStore::new());
        let text = Arc::new(
            MockTextGenerator::new()
                .with_delay(Duration::from_secs(10))
                .with_default_reply(LANTERNS),
        );
        let pipeline = StoryPipeline::new(
            text,
            store.clone(),
            fast_config().with_daily_limit(Some(5)),
        );
        let user = UserId::new();

        let err = pipeline
            .generate_until("Kyoto", user, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(store.story_count().await, 0);

        // Cancelled attempts do not use quota.
        for _ in 0..5 {
            pipeline.generate("Kyoto", user).await.unwrap();
        }
        assert_eq!(store.story_count().await, 5);
    }
}
