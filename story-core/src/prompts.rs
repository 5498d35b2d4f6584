//! Prompt text for the generative services.

/// System prompt for story generation.
pub const STORYTELLER_SYSTEM_PROMPT: &str = "You are a master storyteller who creates immersive, \
culturally rich interactive stories. Follow the requested format exactly and never add commentary.";

/// Build the story generation prompt for a location.
///
/// The requested shape (title line, narrative, `A.`-`C.` choices) is what
/// [`crate::parser::parse_completion`] expects, though it tolerates drift.
pub fn story_prompt(location: &str) -> String {
    let location = location.trim();
    format!(
        "Create the opening of an immersive interactive story set in {location}.\n\
         \n\
         The story should:\n\
         1. Be culturally authentic and respectful to the location\n\
         2. Include rich historical and cultural details\n\
         3. Be engaging and a little magical\n\
         \n\
         Format your reply exactly like this:\n\
         Title: <an engaging story title>\n\
         <150-200 words of narrative, in second person>\n\
         A. <first choice>\n\
         B. <second choice>\n\
         C. <third choice>"
    )
}

/// Describe a segment for the image generator.
pub fn scene_prompt(title: &str, segment_text: &str) -> String {
    let scene: String = segment_text.chars().take(300).collect();
    format!("{title}: {scene}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_prompt_mentions_location_and_format() {
        let prompt = story_prompt("  Kyoto, Japan ");
        assert!(prompt.contains("set in Kyoto, Japan."));
        assert!(prompt.contains("Title:"));
        assert!(prompt.contains("\nC. <third choice>"));
    }

    #[test]
    fn test_scene_prompt_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(scene_prompt("T", &long).chars().count(), 303);
    }
}
