//! Substitute stories for when generation or parsing fails.
//!
//! Preference order: the most recent AI-generated story for the same
//! location, then a fixed generic story. Resolution never fails.

use crate::document::{Provenance, StoryDocument, StorySegment, PLACEHOLDER_IMAGE};
use crate::store::{StoreError, StoryStore};
use async_trait::async_trait;

/// Lookup of previously generated stories by location.
#[async_trait]
pub trait StoryArchive: Send + Sync {
    async fn cached_for_location(&self, location: &str)
        -> Result<Option<StoryDocument>, StoreError>;
}

#[async_trait]
impl<S: StoryStore + ?Sized> StoryArchive for S {
    async fn cached_for_location(
        &self,
        location: &str,
    ) -> Result<Option<StoryDocument>, StoreError> {
        Ok(self
            .latest_generated_for_location(location)
            .await?
            .map(|record| record.content))
    }
}

/// The city part of a location ("Kyoto, Japan" -> "Kyoto").
pub fn city_of(location: &str) -> &str {
    let city = location.split(',').next().unwrap_or(location).trim();
    if city.is_empty() {
        "this place"
    } else {
        city
    }
}

/// Location-templated cultural notes for stories without real ones.
pub fn default_insights(location: &str) -> Vec<String> {
    let location = location.trim();
    let location = if location.is_empty() {
        "This place"
    } else {
        location
    };
    vec![
        format!("{location} has a rich cultural heritage spanning centuries."),
        "Local traditions are deeply woven into daily life.".to_string(),
        "The architecture tells stories of different historical periods.".to_string(),
    ]
}

/// Supplies a usable document when the generation path fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackResolver;

impl FallbackResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a substitute for `location`, recording `error` as the cause.
    ///
    /// A failing archive lookup is logged and falls through to the generic
    /// story.
    pub async fn resolve<A>(&self, archive: &A, location: &str, error: &str) -> StoryDocument
    where
        A: StoryArchive + ?Sized,
    {
        match archive.cached_for_location(location).await {
            Ok(Some(cached)) => {
                tracing::info!(location, "using cached story as fallback");
                return cached.with_provenance(Provenance::fallback_cached(error));
            }
            Ok(None) => {
                tracing::debug!(location, "no cached story for location");
            }
            Err(lookup) => {
                tracing::warn!(location, error = %lookup, "fallback lookup failed");
            }
        }
        self.generic(location, error)
    }

    /// The fixed generic story: one terminal segment with a placeholder image.
    pub fn generic(&self, location: &str, error: &str) -> StoryDocument {
        let city = city_of(location);
        let segment = StorySegment::new(
            1,
            format!(
                "You arrive in {city} as the light begins to change. Every street \
                 seems to hold a story of its own, and the people you pass carry \
                 traditions older than any map. Today is for wandering, listening, \
                 and letting the city reveal itself at its own pace."
            ),
            PLACEHOLDER_IMAGE,
        );

        StoryDocument::from_trusted_parts(
            format!("The Enchanted Tales of {city}"),
            vec![segment],
            default_insights(location),
            Provenance::fallback_generic(error),
        )
    }
}
