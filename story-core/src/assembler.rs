//! Final assembly and persistence of a story.

use crate::document::StoryDocument;
use crate::store::{InteractionRecord, StoreError, StoryRecord, StoryStore, UserId};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Landscape photos used when a segment has no generated image.
pub const STOCK_IMAGES: [&str; 6] = [
    "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1470813740244-df37b8c1edcb?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1500673922987-e212871fec22?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1426604966848-d7adac402bff?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1472396961693-142e6e269027?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1582562124811-c09040d0a901?w=400&h=300&fit=crop",
];

/// A persisted story plus any auxiliary writes that failed.
#[derive(Debug, Clone)]
pub struct AssembledStory {
    pub record: StoryRecord,
    pub warnings: Vec<String>,
}

/// Fills in images and writes the story with its side records.
#[derive(Clone)]
pub struct StoryAssembler {
    store: Arc<dyn StoryStore>,
    stock_images: Vec<String>,
}

impl StoryAssembler {
    pub fn new(store: Arc<dyn StoryStore>) -> Self {
        Self {
            store,
            stock_images: STOCK_IMAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the stock pool. An empty pool is ignored.
    pub fn with_stock_images(mut self, images: Vec<String>) -> Self {
        if !images.is_empty() {
            self.stock_images = images;
        }
        self
    }

    /// Give every segment an image.
    ///
    /// `generated[i]` is the generated image for the i-th segment, if any.
    /// Segments without one keep their own image unless it is a placeholder,
    /// in which case a stock image is picked at random (repeats allowed).
    pub fn attach_images(&self, doc: StoryDocument, generated: &[Option<String>]) -> StoryDocument {
        let mut rng = rand::thread_rng();
        let mut index = 0;
        doc.map_images(|segment| {
            let image = generated
                .get(index)
                .cloned()
                .flatten()
                .filter(|url| !url.trim().is_empty());
            index += 1;

            match image {
                Some(url) => url,
                None if segment.has_placeholder_image() => self
                    .stock_images
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_else(|| genai::FALLBACK_IMAGE_URL.to_string()),
                None => segment.image.clone(),
            }
        })
    }

    /// Persist the story, then the creator's read interaction and upvote.
    ///
    /// Failure to write the story is returned. Failures of the two side
    /// writes are logged and reported in [`AssembledStory::warnings`].
    #[tracing::instrument(skip_all, fields(location = %location, origin = %doc.origin()))]
    pub async fn persist(
        &self,
        author: UserId,
        location: &str,
        doc: StoryDocument,
        prompt: Option<String>,
    ) -> Result<AssembledStory, StoreError> {
        let mut record = StoryRecord::new(author, location.trim(), doc);
        record.generation_prompt = prompt;

        self.store.insert_story(&record).await?;
        tracing::info!(story_id = %record.id, "story saved");

        let mut warnings = Vec::new();

        if let Err(e) = self
            .store
            .record_interaction(&InteractionRecord::read(author, record.id))
            .await
        {
            tracing::warn!(story_id = %record.id, error = %e, "failed to record read interaction");
            warnings.push(format!("read interaction not recorded: {e}"));
        }

        match self.store.set_vote(author, record.id).await {
            Ok(upvotes) => record.upvotes = upvotes,
            Err(e) => {
                tracing::warn!(story_id = %record.id, error = %e, "failed to record creator upvote");
                warnings.push(format!("creator upvote not recorded: {e}"));
            }
        }

        Ok(AssembledStory { record, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Choice, Provenance, StorySegment, PLACEHOLDER_IMAGE};
    use crate::store::MemoryStore;

    fn three_segments() -> StoryDocument {
        StoryDocument::new(
            "Harbor",
            vec![
                StorySegment::new(1, "Gulls.", PLACEHOLDER_IMAGE)
                    .with_choices(vec![Choice::new("A", "Sail", 2)]),
                StorySegment::new(2, "Waves.", "https://own/2"),
                StorySegment::new(3, "Fog.", ""),
            ],
            vec![],
            Provenance::generated(),
        )
        .unwrap()
    }

    #[test]
    fn test_generated_images_win() {
        let assembler = StoryAssembler::new(Arc::new(MemoryStore::new()));
        let doc = assembler.attach_images(
            three_segments(),
            &[
                Some("https://gen/1".into()),
                Some("https://gen/2".into()),
                Some("https://gen/3".into()),
            ],
        );
        assert_eq!(doc.image_urls(), vec!["https://gen/1", "https://gen/2", "https://gen/3"]);
    }

    #[test]
    fn test_placeholders_get_stock_images() {
        let assembler = StoryAssembler::new(Arc::new(MemoryStore::new()))
            .with_stock_images(vec!["https://stock/only".into()]);
        let doc = assembler.attach_images(three_segments(), &[None, Some("  ".into())]);

        assert_eq!(
            doc.image_urls(),
            vec!["https://stock/only", "https://own/2", "https://stock/only"]
        );
        assert!(doc.segments().iter().all(|s| !s.has_placeholder_image()));
    }

    #[test]
    fn test_stock_selection_stays_in_pool() {
        let assembler = StoryAssembler::new(Arc::new(MemoryStore::new()));
        for _ in 0..20 {
            let doc = assembler.attach_images(three_segments(), &[]);
            assert!(STOCK_IMAGES.contains(&doc.root().image.as_str()));
        }
    }

    #[tokio::test]
    async fn test_persist_writes_side_records() {
        let store = Arc::new(MemoryStore::new());
        let assembler = StoryAssembler::new(store.clone());
        let author = UserId::new();

        let assembled = assembler
            .persist(author, " Kyoto ", three_segments(), Some("prompt".into()))
            .await
            .unwrap();

        assert!(assembled.warnings.is_empty());
        assert_eq!(assembled.record.upvotes, 1);
        assert_eq!(assembled.record.location, "Kyoto");
        assert!(assembled.record.is_public);

        let stored = store.get_story(assembled.record.id).await.unwrap();
        assert_eq!(stored.upvotes, 1);
        assert_eq!(stored.generation_prompt.as_deref(), Some("prompt"));
        assert_eq!(store.interactions_for(stored.id).await.len(), 1);
    }
}
