//! The branching story document.
//!
//! A [`StoryDocument`] is built once, persisted, and never mutated after
//! that. Its JSON shape matches the stored `content` column, so field names
//! follow that format (`culturalInsights`, `nextSegment`).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Image reference used before a real image has been chosen.
pub const PLACEHOLDER_IMAGE: &str = "placeholder://scene";

/// Errors from constructing a document that breaks the model's invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("a story needs at least one segment")]
    NoSegments,

    #[error("segment 1 (the starting segment) is missing")]
    MissingRoot,

    #[error("segment id {0} appears more than once")]
    DuplicateSegment(SegmentId),

    #[error("segment ids must be positive, found {0}")]
    InvalidSegmentId(SegmentId),

    #[error("segment {0} has no text")]
    EmptySegmentText(SegmentId),
}

/// Identity of a segment within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// The traversal root. Every document has it.
    pub const ROOT: SegmentId = SegmentId(1);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for SegmentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One option offered at the end of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Short label, conventionally "A".."C".
    pub id: String,
    pub text: String,
    /// May name a segment that does not exist; resolution is checked when
    /// a reader picks the choice.
    #[serde(rename = "nextSegment")]
    pub next_segment: SegmentId,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>, next_segment: u32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            next_segment: SegmentId(next_segment),
        }
    }
}

/// A block of narrative with its illustration and outgoing choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySegment {
    pub id: SegmentId,
    pub text: String,
    pub image: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl StorySegment {
    pub fn new(id: u32, text: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: SegmentId(id),
            text: text.into(),
            image: image.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }

    /// No further transitions are possible from a terminal segment.
    pub fn is_terminal(&self) -> bool {
        self.choices.is_empty()
    }

    /// Find a choice by its label (case-insensitive).
    pub fn choice(&self, label: &str) -> Option<&Choice> {
        let label = label.trim();
        self.choices
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(label))
    }

    pub fn has_placeholder_image(&self) -> bool {
        self.image.trim().is_empty() || self.image == PLACEHOLDER_IMAGE
    }
}

/// Where a document's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Parsed from a fresh AI completion.
    Generated,
    /// A previously generated story for the same location, reused.
    FallbackCached,
    /// The fixed generic story.
    FallbackGeneric,
}

impl Origin {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Origin::Generated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Generated => "generated",
            Origin::FallbackCached => "fallback-cached",
            Origin::FallbackGeneric => "fallback-generic",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a document came to exist, plus the error that forced a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: Origin,
    #[serde(rename = "errorLog", default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
}

impl Provenance {
    pub fn generated() -> Self {
        Self {
            origin: Origin::Generated,
            error_log: None,
        }
    }

    pub fn fallback_cached(error: impl Into<String>) -> Self {
        Self {
            origin: Origin::FallbackCached,
            error_log: Some(error.into()),
        }
    }

    pub fn fallback_generic(error: impl Into<String>) -> Self {
        Self {
            origin: Origin::FallbackGeneric,
            error_log: Some(error.into()),
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::generated()
    }
}

/// A complete branching story.
///
/// Invariants (checked by [`StoryDocument::new`] and on deserialisation):
/// at least one segment, segment 1 exists, ids are positive and unique,
/// every segment has text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDocument", rename_all = "camelCase")]
pub struct StoryDocument {
    title: String,
    segments: Vec<StorySegment>,
    #[serde(default)]
    cultural_insights: Vec<String>,
    #[serde(default)]
    provenance: Provenance,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    title: String,
    segments: Vec<StorySegment>,
    #[serde(default)]
    cultural_insights: Vec<String>,
    #[serde(default)]
    provenance: Provenance,
}

impl TryFrom<RawDocument> for StoryDocument {
    type Error = DocumentError;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        StoryDocument::new(raw.title, raw.segments, raw.cultural_insights, raw.provenance)
    }
}

impl StoryDocument {
    /// Build a document, enforcing the model's invariants.
    pub fn new(
        title: impl Into<String>,
        segments: Vec<StorySegment>,
        cultural_insights: Vec<String>,
        provenance: Provenance,
    ) -> Result<Self, DocumentError> {
        validate_segments(&segments)?;
        Ok(Self {
            title: title.into(),
            segments,
            cultural_insights,
            provenance,
        })
    }

    /// Build a document the caller has already shaped to satisfy the
    /// invariants. Checked in debug builds only.
    pub(crate) fn from_trusted_parts(
        title: String,
        segments: Vec<StorySegment>,
        cultural_insights: Vec<String>,
        provenance: Provenance,
    ) -> Self {
        debug_assert_eq!(validate_segments(&segments), Ok(()));
        Self {
            title,
            segments,
            cultural_insights,
            provenance,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn segments(&self) -> &[StorySegment] {
        &self.segments
    }

    pub fn cultural_insights(&self) -> &[String] {
        &self.cultural_insights
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn origin(&self) -> Origin {
        self.provenance.origin
    }

    /// The starting segment.
    pub fn root(&self) -> &StorySegment {
        // Construction guarantees the root exists; fall back to the first
        // segment rather than panic.
        self.segment(SegmentId::ROOT).unwrap_or(&self.segments[0])
    }

    pub fn segment(&self, id: SegmentId) -> Option<&StorySegment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segment(id).is_some()
    }

    /// Choices whose target segment is absent, with the segment offering them.
    pub fn dangling_choices(&self) -> Vec<(SegmentId, &Choice)> {
        self.segments
            .iter()
            .flat_map(|s| s.choices.iter().map(move |c| (s.id, c)))
            .filter(|(_, c)| !self.contains(c.next_segment))
            .collect()
    }

    /// Segment images in segment order.
    pub fn image_urls(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.image.clone()).collect()
    }

    /// Equality ignoring provenance.
    pub fn same_content(&self, other: &StoryDocument) -> bool {
        self.title == other.title
            && self.segments == other.segments
            && self.cultural_insights == other.cultural_insights
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_cultural_insights(mut self, insights: Vec<String>) -> Self {
        self.cultural_insights = insights;
        self
    }

    /// Replace every segment's image. Ids, text and choices are untouched,
    /// so the invariants still hold.
    pub fn map_images(mut self, mut f: impl FnMut(&StorySegment) -> String) -> Self {
        for segment in &mut self.segments {
            segment.image = f(segment);
        }
        self
    }
}

fn validate_segments(segments: &[StorySegment]) -> Result<(), DocumentError> {
    if segments.is_empty() {
        return Err(DocumentError::NoSegments);
    }

    let mut seen = std::collections::HashSet::new();
    for segment in segments {
        if segment.id.0 == 0 {
            return Err(DocumentError::InvalidSegmentId(segment.id));
        }
        if !seen.insert(segment.id) {
            return Err(DocumentError::DuplicateSegment(segment.id));
        }
        if segment.text.trim().is_empty() {
            return Err(DocumentError::EmptySegmentText(segment.id));
        }
    }

    if !seen.contains(&SegmentId::ROOT) {
        return Err(DocumentError::MissingRoot);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_segment_document() -> StoryDocument {
        StoryDocument::new(
            "The Lantern District",
            vec![
                StorySegment::new(1, "You wander past glowing lanterns.", "https://img/1")
                    .with_choices(vec![
                        Choice::new("A", "Enter the shrine", 2),
                        Choice::new("B", "Visit the tea house", 3),
                    ]),
                StorySegment::new(2, "The shrine is silent.", "https://img/2"),
            ],
            vec!["Kyoto was the imperial capital for over a thousand years.".into()],
            Provenance::generated(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_document() {
        let doc = two_segment_document();
        assert_eq!(doc.title(), "The Lantern District");
        assert_eq!(doc.root().id, SegmentId::ROOT);
        assert!(doc.contains(SegmentId(2)));
        assert!(!doc.contains(SegmentId(3)));
        assert!(doc.segment(SegmentId(2)).unwrap().is_terminal());
    }

    #[test]
    fn test_rejects_empty_segments() {
        let err = StoryDocument::new("t", vec![], vec![], Provenance::generated()).unwrap_err();
        assert_eq!(err, DocumentError::NoSegments);
    }

    #[test]
    fn test_rejects_missing_root() {
        let err = StoryDocument::new(
            "t",
            vec![StorySegment::new(2, "text", PLACEHOLDER_IMAGE)],
            vec![],
            Provenance::generated(),
        )
        .unwrap_err();
        assert_eq!(err, DocumentError::MissingRoot);
    }

    #[test]
    fn test_rejects_duplicates_zero_and_blank_text() {
        let dup = StoryDocument::new(
            "t",
            vec![
                StorySegment::new(1, "a", PLACEHOLDER_IMAGE),
                StorySegment::new(1, "b", PLACEHOLDER_IMAGE),
            ],
            vec![],
            Provenance::generated(),
        );
        assert_eq!(dup.unwrap_err(), DocumentError::DuplicateSegment(SegmentId(1)));

        let zero = StoryDocument::new(
            "t",
            vec![StorySegment::new(0, "a", PLACEHOLDER_IMAGE)],
            vec![],
            Provenance::generated(),
        );
        assert_eq!(zero.unwrap_err(), DocumentError::InvalidSegmentId(SegmentId(0)));

        let blank = StoryDocument::new(
            "t",
            vec![StorySegment::new(1, "   ", PLACEHOLDER_IMAGE)],
            vec![],
            Provenance::generated(),
        );
        assert_eq!(blank.unwrap_err(), DocumentError::EmptySegmentText(SegmentId(1)));
    }

    #[test]
    fn test_dangling_choices_are_tolerated() {
        let doc = two_segment_document();
        let dangling = doc.dangling_choices();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].0, SegmentId(1));
        assert_eq!(dangling[0].1.next_segment, SegmentId(3));
    }

    #[test]
    fn test_json_field_names() {
        let doc = two_segment_document().with_provenance(Provenance::fallback_cached("timeout"));
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["title"], "The Lantern District");
        assert_eq!(json["segments"][0]["choices"][0]["nextSegment"], 2);
        assert!(json["culturalInsights"].is_array());
        assert_eq!(json["provenance"]["origin"], "fallback-cached");
        assert_eq!(json["provenance"]["errorLog"], "timeout");
    }

    #[test]
    fn test_deserialisation_validates() {
        let invalid = r#"{"title": "t", "segments": [{"id": 3, "text": "x", "image": ""}]}"#;
        assert!(serde_json::from_str::<StoryDocument>(invalid).is_err());

        let minimal = r#"{"title": "t", "segments": [{"id": 1, "text": "x", "image": ""}]}"#;
        let doc: StoryDocument = serde_json::from_str(minimal).unwrap();
        assert_eq!(doc.origin(), Origin::Generated);
        assert!(doc.root().has_placeholder_image());
    }

    #[test]
    fn test_same_content_ignores_provenance() {
        let a = two_segment_document();
        let b = a.clone().with_provenance(Provenance::fallback_generic("boom"));
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        let c = a.clone().map_images(|_| "https://other".into());
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_choice_lookup_is_case_insensitive() {
        let doc = two_segment_document();
        assert_eq!(doc.root().choice("b").unwrap().text, "Visit the tea house");
        assert!(doc.root().choice("C").is_none());
    }
}
