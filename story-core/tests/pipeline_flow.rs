//! End-to-end generation scenarios driven through the test harness.

use story_core::testing::{
    assert_choice_labels, assert_choice_targets, assert_origin, assert_path,
    assert_single_terminal_segment,
};
use story_core::{
    Choice, FailingStore, Origin, PipelineError, Provenance, SegmentId, Step, StoryDocument,
    StoryRecord, StorySegment, StoryStore, TestHarness, UserId,
};

const KYOTO: &str = "Title: The Lantern Keeper of Gion\n\
Evening settles over the narrow streets of Gion. A paper lantern flickers \
outside a tea house, and an old keeper beckons you closer.\n\
A. Follow the keeper inside\n\
B. Walk toward the Yasaka shrine\n\
C. Cross the Shirakawa bridge";

#[tokio::test]
async fn test_generated_story_is_persisted() {
    let mut harness = TestHarness::new();
    harness.expect_completion(KYOTO);

    let story = harness.generate("Kyoto, Japan").await.unwrap();
    let doc = &story.record.content;

    assert_origin(doc, Origin::Generated);
    assert_eq!(doc.title(), "The Lantern Keeper of Gion");
    assert_eq!(doc.segments().len(), 1);
    assert!(doc.root().text.starts_with("Evening settles"));
    assert_choice_labels(doc.root(), &["A", "B", "C"]);
    assert_choice_targets(doc.root(), &[2, 3, 4]);
    assert_eq!(doc.root().image, TestHarness::IMAGE_URL);
    assert_eq!(doc.cultural_insights().len(), 3);

    assert!(story.warnings.is_empty());
    assert_eq!(story.record.upvotes, 1);
    assert!(story.record.is_public);
    assert_eq!(story.record.image_urls, vec![TestHarness::IMAGE_URL.to_string()]);
    assert_eq!(harness.story_count().await, 1);
    assert_eq!(harness.images.call_count(), 1);

    let prompts = harness.text.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Kyoto, Japan"));
}

#[tokio::test]
async fn test_empty_completion_falls_back_to_generic() {
    let mut harness = TestHarness::new();
    harness.expect_completion("   \n  ");

    let story = harness.generate("Lisbon, Portugal").await.unwrap();
    let doc = &story.record.content;

    assert_origin(doc, Origin::FallbackGeneric);
    assert_single_terminal_segment(doc);
    assert_eq!(doc.title(), "The Enchanted Tales of Lisbon");
    assert!(doc.provenance().error_log.is_some());
    assert!(!doc.root().has_placeholder_image());
    assert_eq!(harness.images.call_count(), 0);
}

#[tokio::test]
async fn test_failure_reuses_earlier_story_for_location() {
    let mut harness = TestHarness::new();
    harness
        .expect_completion(KYOTO)
        .expect_error(genai::Error::Api {
            status: 401,
            message: "invalid key".to_string(),
        });

    let first = harness.generate("Kyoto, Japan").await.unwrap();
    let second = harness.generate("  kyoto, japan ").await.unwrap();

    assert_origin(&second.record.content, Origin::FallbackCached);
    assert!(second.record.content.same_content(&first.record.content));
    assert_ne!(first.record.id, second.record.id);
    let log = second.record.content.provenance().error_log.clone().unwrap();
    assert!(log.contains("invalid key"), "error log was {log:?}");
    assert_eq!(harness.story_count().await, 2);
}

#[tokio::test]
async fn test_failed_lookup_still_yields_generic_story() {
    let mut harness = TestHarness::with_store(FailingStore::new().failing_lookups());
    harness.expect_error(genai::Error::Timeout);

    let story = harness.generate("Marrakesh").await.unwrap();
    assert_origin(&story.record.content, Origin::FallbackGeneric);
    assert_single_terminal_segment(&story.record.content);
}

#[tokio::test]
async fn test_insert_failure_is_surfaced() {
    let mut harness = TestHarness::with_store(FailingStore::new().failing_inserts());
    harness.expect_completion(KYOTO);

    let result = harness.generate("Kyoto, Japan").await;
    assert!(matches!(result, Err(PipelineError::Persistence(_))));
    assert_eq!(harness.story_count().await, 0);
}

#[tokio::test]
async fn test_auxiliary_failures_become_warnings() {
    let mut harness = TestHarness::with_store(
        FailingStore::new()
            .failing_votes()
            .failing_interactions(),
    );
    harness.expect_completion(KYOTO);

    let story = harness.generate("Kyoto, Japan").await.unwrap();
    assert_eq!(story.warnings.len(), 2);
    assert_eq!(harness.story_count().await, 1);

    let stored = harness.store.get_story(story.record.id).await.unwrap();
    assert!(stored.content.same_content(&story.record.content));
}

#[tokio::test]
async fn test_reading_a_two_segment_story() {
    let harness = TestHarness::new();
    let doc = StoryDocument::new(
        "The Night Market",
        vec![
            StorySegment::new(1, "Steam rises from the stalls.", "https://img/1").with_choices(
                vec![
                    Choice::new("A", "Try the dumplings", 2),
                    Choice::new("B", "Ask the fortune teller", 3),
                ],
            ),
            StorySegment::new(2, "The dumplings are perfect.", "https://img/2"),
        ],
        vec![],
        Provenance::generated(),
    )
    .unwrap();
    let record = StoryRecord::new(UserId::new(), "Taipei", doc);
    harness.store.insert_story(&record).await.unwrap();

    let mut reader = harness.read(record.id).await.unwrap();
    assert_path(reader.state(), &[1]);

    assert_eq!(reader.choose("B"), Step::Dangling(SegmentId(3)));
    assert_path(reader.state(), &[1]);

    assert_eq!(reader.choose("A"), Step::Moved(SegmentId(2)));
    assert_path(reader.state(), &[1, 2]);
    assert!(reader.is_finished());
    assert_eq!(reader.choose("A"), Step::NoSuchChoice);

    let interaction = reader.finish().await.unwrap();
    assert_eq!(interaction.choices_made["segment_1"], "A");
    assert_eq!(
        harness.store.inner().interactions_for(record.id).await,
        vec![interaction]
    );
}

#[tokio::test]
async fn test_generated_story_reads_back_identically() {
    let mut harness = TestHarness::new();
    harness.expect_completion(KYOTO);

    let story = harness.generate("Kyoto, Japan").await.unwrap();
    let reader = harness.read(story.record.id).await.unwrap();

    assert!(reader.document().same_content(&story.record.content));
    assert_eq!(reader.document().origin(), Origin::Generated);
}

#[tokio::test]
async fn test_feed_shows_generated_stories() {
    let mut harness = TestHarness::new();
    harness.expect_completion(KYOTO).expect_completion("");

    let generated = harness.generate("Kyoto, Japan").await.unwrap();
    let fallback = harness.generate("Oslo").await.unwrap();

    let feed = harness.feed();
    let cards = feed.list(&Default::default()).await.unwrap();
    assert_eq!(cards.len(), 2);

    let degraded: Vec<bool> = [generated.record.id, fallback.record.id]
        .iter()
        .map(|id| cards.iter().find(|c| c.id == *id).unwrap().degraded)
        .collect();
    assert_eq!(degraded, vec![false, true]);

    let other = UserId::new();
    let outcome = feed.toggle_upvote(other, fallback.record.id).await.unwrap();
    assert!(outcome.voted);
    assert_eq!(outcome.upvotes, 2);
}
