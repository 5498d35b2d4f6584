//! Narrative parser: loosely structured completion text to a story skeleton.
//!
//! The expected shape is a title line, some narrative lines, then
//! enumerated choices (`A.`, `B:`, `1.`, ...). Providers drift from that
//! shape constantly, so the rules are deliberately forgiving:
//!
//! - blank lines are ignored, the first remaining line is the title
//! - every line before the first enumerated line is narrative
//! - every line from the first enumerated line onward is a choice
//! - choices are relabelled `A, B, C` and point at segments 2, 3, 4
//! - fewer than three choices means the generic default set is used

use crate::document::{Choice, DocumentError, Provenance, StoryDocument, StorySegment, PLACEHOLDER_IMAGE};
use regex::Regex;
use thiserror::Error;

/// Number of choices a parsed segment always carries.
pub const CHOICE_COUNT: usize = 3;

/// Title used when the first line is only a "Title:" prefix.
pub const UNTITLED: &str = "Untitled Story";

/// Choices substituted when the completion offers fewer than three.
pub const DEFAULT_CHOICES: [&str; CHOICE_COUNT] = [
    "Explore the mysterious alleyways",
    "Visit the local marketplace",
    "Seek out the town's historian",
];

lazy_static::lazy_static! {
    static ref ENUMERATOR: Regex =
        Regex::new(r"^([A-Za-z]|[0-9]{1,2})[.:)]\s*(.*)$").expect("enumerator pattern is valid");
    static ref TITLE_PREFIX: Regex =
        Regex::new(r"(?i)^title\s*:\s*").expect("title pattern is valid");
}

/// Errors from parsing a completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("completion contained no text")]
    Empty,

    #[error("completion has a title but no narrative")]
    MissingNarrative,

    #[error("parsed story is invalid: {0}")]
    Document(#[from] DocumentError),
}

/// Parse a completion into a single-segment document.
///
/// The segment's image is [`PLACEHOLDER_IMAGE`]; the assembler fills it in.
/// Deterministic for a given input.
pub fn parse_completion(text: &str) -> Result<StoryDocument, ParseError> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let Some((first, rest)) = lines.split_first() else {
        return Err(ParseError::Empty);
    };

    let title = clean_title(first);

    let first_choice = rest
        .iter()
        .position(|line| enumerated(line).is_some())
        .unwrap_or(rest.len());
    let (narrative, choice_lines) = rest.split_at(first_choice);

    if narrative.is_empty() {
        return Err(ParseError::MissingNarrative);
    }

    let choices = build_choices(choice_lines);
    let segment =
        StorySegment::new(1, narrative.join(" "), PLACEHOLDER_IMAGE).with_choices(choices);

    Ok(StoryDocument::new(
        title,
        vec![segment],
        Vec::new(),
        Provenance::generated(),
    )?)
}

/// The generic three-choice set.
pub fn default_choices() -> Vec<Choice> {
    DEFAULT_CHOICES
        .iter()
        .enumerate()
        .map(|(i, text)| relabel(i, text))
        .collect()
}

fn build_choices(lines: &[&str]) -> Vec<Choice> {
    let detected: Vec<String> = lines
        .iter()
        .map(|line| match enumerated(line) {
            Some(rest) => rest,
            None => strip_markup(line).to_string(),
        })
        .filter(|text| !text.is_empty())
        .collect();

    if detected.len() < CHOICE_COUNT {
        tracing::debug!(
            detected = detected.len(),
            "too few choices in completion, using defaults"
        );
        return default_choices();
    }

    detected
        .iter()
        .take(CHOICE_COUNT)
        .enumerate()
        .map(|(i, text)| relabel(i, text))
        .collect()
}

fn relabel(index: usize, text: &str) -> Choice {
    let label = char::from(b'A' + index as u8).to_string();
    Choice::new(label, text, index as u32 + 2)
}

/// If the line starts with an enumerator, return the text after it.
fn enumerated(line: &str) -> Option<String> {
    let cleaned = strip_markup(line);
    ENUMERATOR
        .captures(cleaned)
        .map(|caps| strip_markup(caps.get(2).map_or("", |m| m.as_str())).to_string())
}

fn clean_title(line: &str) -> String {
    let stripped = strip_markup(line);
    let without_prefix = TITLE_PREFIX.replace(stripped, "");
    let title = strip_markup(&without_prefix).trim_matches(['"', '\'']).trim();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title.to_string()
    }
}

/// Remove markdown emphasis, heading and bullet characters around a line.
fn strip_markup(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['#', '-', '>'])
        .trim_matches(['*', '_'])
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Origin, SegmentId};

    const LANTERNS: &str = "Title: The Lantern District\nYou wander past glowing lanterns.\nA. Enter the shrine\nB. Visit the tea house\nC. Follow the river";

    fn labels(doc: &StoryDocument) -> Vec<String> {
        doc.root().choices.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn test_well_formed_completion() {
        let doc = parse_completion(LANTERNS).unwrap();

        assert_eq!(doc.title(), "The Lantern District");
        assert_eq!(doc.segments().len(), 1);
        assert_eq!(doc.root().text, "You wander past glowing lanterns.");
        assert_eq!(labels(&doc), vec!["A", "B", "C"]);

        let targets: Vec<u32> = doc.root().choices.iter().map(|c| c.next_segment.get()).collect();
        assert_eq!(targets, vec![2, 3, 4]);
        assert_eq!(doc.root().choices[2].text, "Follow the river");
        assert_eq!(doc.origin(), Origin::Generated);
        assert!(doc.root().has_placeholder_image());
    }

    #[test]
    fn test_extra_choices_are_truncated() {
        let text = "Night Market\nStalls hum with voices.\n1. Haggle\n2. Eat\n3: Watch\n4) Leave";
        let doc = parse_completion(text).unwrap();

        assert_eq!(labels(&doc), vec!["A", "B", "C"]);
        assert_eq!(doc.root().choices[0].text, "Haggle");
        assert_eq!(doc.root().choices[2].text, "Watch");
    }

    #[test]
    fn test_too_few_choices_use_defaults() {
        for text in [
            "Title: Quiet\nNothing happens.",
            "Title: Quiet\nNothing happens.\nA. Wait",
            "Title: Quiet\nNothing happens.\nA. Wait\nB. Sleep",
        ] {
            let doc = parse_completion(text).unwrap();
            let texts: Vec<&str> = doc.root().choices.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(texts, DEFAULT_CHOICES.to_vec(), "input: {text:?}");
            assert_eq!(labels(&doc), vec!["A", "B", "C"]);
        }
    }

    #[test]
    fn test_empty_input_fails() {
        assert_eq!(parse_completion(""), Err(ParseError::Empty));
        assert_eq!(parse_completion("  \n\n\t  \n"), Err(ParseError::Empty));
    }

    #[test]
    fn test_title_only_fails() {
        assert_eq!(
            parse_completion("Title: Alone"),
            Err(ParseError::MissingNarrative)
        );
        assert_eq!(
            parse_completion("Title: Alone\nA. One\nB. Two\nC. Three"),
            Err(ParseError::MissingNarrative)
        );
    }

    #[test]
    fn test_narrative_lines_are_joined() {
        let text = "\n\nTitle: Fog\n\nThe harbor is grey.\n  A bell rings somewhere.  \nA. Follow the bell\nB. Stay\nC. Run";
        let doc = parse_completion(text).unwrap();
        assert_eq!(doc.root().text, "The harbor is grey. A bell rings somewhere.");
    }

    #[test]
    fn test_lines_after_first_choice_are_choices() {
        let text = "Fog\nThe harbor is grey.\nA. Follow the bell\nor maybe wait by the water\nC. Run";
        let doc = parse_completion(text).unwrap();
        assert_eq!(doc.root().choices[1].text, "or maybe wait by the water");
        assert_eq!(doc.root().choices[1].next_segment, SegmentId(3));
    }

    #[test]
    fn test_title_cleanup() {
        let doc = parse_completion("**TITLE: \"The Clockmaker\"**\nTick.\n").unwrap();
        assert_eq!(doc.title(), "The Clockmaker");

        let doc = parse_completion("# The Phantom of Montmartre\nWhispers.").unwrap();
        assert_eq!(doc.title(), "The Phantom of Montmartre");

        let doc = parse_completion("Title:\nWhispers.").unwrap();
        assert_eq!(doc.title(), UNTITLED);
    }

    #[test]
    fn test_markdown_choices() {
        let text = "Title: Canals\nGondolas drift.\n**A.** Board a gondola\n- B. Cross the bridge\n* C: Enter the palace";
        let doc = parse_completion(text).unwrap();
        let texts: Vec<&str> = doc.root().choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Board a gondola", "Cross the bridge", "Enter the palace"]);
    }

    #[test]
    fn test_parsing_is_deterministic() {
        assert_eq!(parse_completion(LANTERNS), parse_completion(LANTERNS));
    }
}
