//! Location-based branching stories with AI generation and graceful fallback.
//!
//! This crate provides:
//! - The branching story document model and its traversal
//! - A defensive parser for loosely structured completions
//! - A generation pipeline with timeout, retry and fallback
//! - Persistence, a community feed with upvoting, and narration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_core::{JsonStore, PipelineConfig, StoryPipeline, StoryReader, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(JsonStore::open("stories").await?);
//!     let text = Arc::new(genai::TextClient::from_env()?);
//!     let pipeline = StoryPipeline::new(text, store.clone(), PipelineConfig::from_env()?);
//!
//!     let user = UserId::new();
//!     let story = pipeline.generate("Kyoto, Japan", user).await?;
//!     println!("{} ({})", story.record.title, story.record.origin());
//!
//!     let mut reader = StoryReader::open(store, story.record.id, user).await?;
//!     reader.choose("A");
//!     reader.finish().await?;
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod document;
pub mod fallback;
pub mod feed;
pub mod narration;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod quota;
pub mod reader;
pub mod store;
pub mod testing;
pub mod traversal;

// Primary public API
pub use assembler::{AssembledStory, StoryAssembler};
pub use config::{ConfigError, PipelineConfig};
pub use document::{
    Choice, DocumentError, Origin, Provenance, SegmentId, StoryDocument, StorySegment,
};
pub use fallback::{FallbackResolver, StoryArchive};
pub use feed::{Feed, FeedCard, FeedFilter, FeedQuery, VoteOutcome};
pub use narration::{FileMediaStore, MediaStore, NarrationError, Narrator};
pub use parser::{parse_completion, ParseError};
pub use pipeline::{GenerationError, PipelineError, StoryPipeline};
pub use providers::{ImageGenerator, SpeechSynthesizer, TextGenerator};
pub use reader::StoryReader;
pub use store::{
    AudioSegment, InteractionRecord, JsonStore, MemoryStore, StoreError, StoryId, StoryRecord,
    StoryStore, UserId, VoteType,
};
pub use testing::{FailingStore, MockImageGenerator, MockSpeech, MockTextGenerator, TestHarness};
pub use traversal::{Step, TraversalState};
