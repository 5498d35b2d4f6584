//! Community feed and upvoting.

use crate::store::{StoreError, StoryId, StoryRecord, StoryStore, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stories shown per feed page.
pub const DEFAULT_PAGE_SIZE: usize = 9;

/// How far back the trending filter looks.
pub const TRENDING_WINDOW_DAYS: i64 = 7;

/// Preview shown for a story whose first segment has no text.
pub const EMPTY_PREVIEW: &str = "An enchanting story awaits...";

/// Feed ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFilter {
    /// Most upvoted first.
    #[default]
    Popular,
    /// Newest first.
    Recent,
    /// Most upvoted among the last week's stories.
    Trending,
}

impl fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedFilter::Popular => "popular",
            FeedFilter::Recent => "recent",
            FeedFilter::Trending => "trending",
        })
    }
}

impl FromStr for FeedFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "popular" => Ok(FeedFilter::Popular),
            "recent" => Ok(FeedFilter::Recent),
            "trending" => Ok(FeedFilter::Trending),
            other => Err(format!("unknown feed filter '{other}'")),
        }
    }
}

/// A feed page request.
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub filter: FeedFilter,
    pub limit: usize,
    /// Reference time for the trending window.
    pub as_of: DateTime<Utc>,
}

impl FeedQuery {
    pub fn new(filter: FeedFilter) -> Self {
        Self {
            filter,
            limit: DEFAULT_PAGE_SIZE,
            as_of: Utc::now(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }

    /// Filter, order and truncate records. Stores call this so every backend
    /// orders the feed the same way.
    pub fn apply(&self, records: impl IntoIterator<Item = StoryRecord>) -> Vec<StoryRecord> {
        let since = self.as_of - Duration::days(TRENDING_WINDOW_DAYS);
        let mut page: Vec<StoryRecord> = records
            .into_iter()
            .filter(|r| r.is_public)
            .filter(|r| self.filter != FeedFilter::Trending || r.created_at >= since)
            .collect();

        match self.filter {
            FeedFilter::Popular | FeedFilter::Trending => page.sort_by(|a, b| {
                b.upvotes
                    .cmp(&a.upvotes)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
            FeedFilter::Recent => page.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        page.truncate(self.limit);
        page
    }
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self::new(FeedFilter::default())
    }
}

/// A story as shown in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedCard {
    pub id: StoryId,
    pub title: String,
    pub location: String,
    pub preview: String,
    pub image: Option<String>,
    pub upvotes: u32,
    /// The story is fallback content rather than a fresh generation.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&StoryRecord> for FeedCard {
    fn from(record: &StoryRecord) -> Self {
        let root = record.content.root();
        let preview = if root.text.trim().is_empty() {
            EMPTY_PREVIEW.to_string()
        } else {
            root.text.clone()
        };

        Self {
            id: record.id,
            title: record.title.clone(),
            location: record.location.clone(),
            preview,
            image: record.image_urls.first().cloned(),
            upvotes: record.upvotes,
            degraded: record.origin().is_fallback(),
            created_at: record.created_at,
        }
    }
}

/// Outcome of toggling a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub voted: bool,
    pub upvotes: u32,
}

/// The community feed over a story store.
#[derive(Clone)]
pub struct Feed {
    store: Arc<dyn StoryStore>,
}

impl Feed {
    pub fn new(store: Arc<dyn StoryStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: &FeedQuery) -> Result<Vec<FeedCard>, StoreError> {
        let records = self.store.list_public(query).await?;
        Ok(records.iter().map(FeedCard::from).collect())
    }

    /// Upvote if the user has not voted, otherwise clear their vote.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_upvote(
        &self,
        user: UserId,
        story: StoryId,
    ) -> Result<VoteOutcome, StoreError> {
        let outcome = match self.store.vote_of(user, story).await? {
            Some(_) => VoteOutcome {
                voted: false,
                upvotes: self.store.clear_vote(user, story).await?,
            },
            None => VoteOutcome {
                voted: true,
                upvotes: self.store.set_vote(user, story).await?,
            },
        };
        tracing::debug!(voted = outcome.voted, upvotes = outcome.upvotes, "vote toggled");
        Ok(outcome)
    }
}
