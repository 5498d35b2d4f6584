//! Reader-side navigation through a story.
//!
//! [`TraversalState`] is a plain value owned by one viewing session. It is
//! never persisted; it can always be rebuilt from a document and a path.

use crate::document::{Choice, SegmentId, StoryDocument, StorySegment};
use serde::{Deserialize, Serialize};

/// Result of trying to follow a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Moved to this segment.
    Moved(SegmentId),
    /// The choice names a segment the document does not contain. State is
    /// unchanged.
    Dangling(SegmentId),
    /// The current segment offers no choice with that label. State is
    /// unchanged.
    NoSuchChoice,
}

impl Step {
    pub fn moved(&self) -> bool {
        matches!(self, Step::Moved(_))
    }
}

/// Current segment plus every segment visited, revisits included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalState {
    current: SegmentId,
    path: Vec<SegmentId>,
}

impl TraversalState {
    /// Start at the root.
    pub fn start() -> Self {
        Self {
            current: SegmentId::ROOT,
            path: vec![SegmentId::ROOT],
        }
    }

    /// Rebuild a state by replaying `path` against `doc`.
    ///
    /// Replay stops at the first id that does not resolve or that no choice
    /// of the previous segment leads to. A leading root id is optional.
    pub fn from_path(doc: &StoryDocument, path: &[SegmentId]) -> Self {
        let mut state = Self::start();
        let steps = match path.first() {
            Some(&SegmentId::ROOT) => &path[1..],
            _ => path,
        };

        for &target in steps {
            let offered = state
                .current_segment(doc)
                .and_then(|s| s.choices.iter().find(|c| c.next_segment == target));
            match offered {
                Some(choice) if state.advance(doc, choice).moved() => {}
                _ => {
                    tracing::debug!(%target, "stopping path replay");
                    break;
                }
            }
        }
        state
    }

    pub fn current(&self) -> SegmentId {
        self.current
    }

    pub fn path(&self) -> &[SegmentId] {
        &self.path
    }

    /// One-based chapter number, the length of the path.
    pub fn chapter(&self) -> usize {
        self.path.len()
    }

    pub fn current_segment<'a>(&self, doc: &'a StoryDocument) -> Option<&'a StorySegment> {
        doc.segment(self.current)
    }

    /// True when the current segment has no choices (or is missing).
    pub fn is_finished(&self, doc: &StoryDocument) -> bool {
        self.current_segment(doc)
            .map(StorySegment::is_terminal)
            .unwrap_or(true)
    }

    /// Follow a choice. Moves only if its target exists in `doc`.
    pub fn advance(&mut self, doc: &StoryDocument, choice: &Choice) -> Step {
        let target = choice.next_segment;
        if !doc.contains(target) {
            return Step::Dangling(target);
        }
        self.current = target;
        self.path.push(target);
        Step::Moved(target)
    }

    /// Follow the current segment's choice with the given label.
    pub fn choose(&mut self, doc: &StoryDocument, label: &str) -> Step {
        let Some(choice) = self
            .current_segment(doc)
            .and_then(|segment| segment.choice(label))
        else {
            return Step::NoSuchChoice;
        };
        let choice = choice.clone();
        self.advance(doc, &choice)
    }
}

impl Default for TraversalState {
    fn default() -> Self {
        Self::start()
    }
}
