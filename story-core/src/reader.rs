//! A viewing session over one persisted story.

use crate::document::{SegmentId, StoryDocument, StorySegment};
use crate::store::{InteractionRecord, StoreError, StoryId, StoryRecord, StoryStore, UserId};
use crate::traversal::{Step, TraversalState};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reads a story for one user. Only [`finish`](Self::finish) writes anything.
pub struct StoryReader {
    store: Arc<dyn StoryStore>,
    record: StoryRecord,
    user: UserId,
    state: TraversalState,
    choices: Vec<(SegmentId, String)>,
}

impl StoryReader {
    /// Load a story and start at its first segment.
    pub async fn open(
        store: Arc<dyn StoryStore>,
        story: StoryId,
        user: UserId,
    ) -> Result<Self, StoreError> {
        let record = store.get_story(story).await?;
        Ok(Self {
            store,
            record,
            user,
            state: TraversalState::start(),
            choices: Vec::new(),
        })
    }

    pub fn record(&self) -> &StoryRecord {
        &self.record
    }

    pub fn document(&self) -> &StoryDocument {
        &self.record.content
    }

    pub fn state(&self) -> &TraversalState {
        &self.state
    }

    pub fn current_segment(&self) -> Option<&StorySegment> {
        self.state.current_segment(&self.record.content)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished(&self.record.content)
    }

    /// Pick a choice on the current segment by label.
    pub fn choose(&mut self, label: &str) -> Step {
        let from = self.state.current();
        let step = self.state.choose(&self.record.content, label);
        match step {
            Step::Moved(_) => self.choices.push((from, label.trim().to_uppercase())),
            Step::Dangling(target) => {
                tracing::warn!(story_id = %self.record.id, %from, %target, "choice leads nowhere")
            }
            Step::NoSuchChoice => {}
        }
        step
    }

    /// Log the session's choices and completion time.
    pub async fn finish(self) -> Result<InteractionRecord, StoreError> {
        let choices_made: BTreeMap<String, String> = self
            .choices
            .into_iter()
            .map(|(segment, label)| (format!("segment_{segment}"), label))
            .collect();

        let now = Utc::now();
        let interaction = InteractionRecord {
            user: self.user,
            story: self.record.id,
            choices_made,
            completed_at: Some(now),
            recorded_at: now,
        };
        self.store.record_interaction(&interaction).await?;
        Ok(interaction)
    }
}
