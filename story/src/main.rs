//! Location-based branching stories from the command line.
//!
//! ```bash
//! cargo run -p story -- generate "Kyoto, Japan"
//! cargo run -p story -- read <STORY_ID>
//! cargo run -p story -- feed --filter trending
//! ```

mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genai::{ImageClient, SpeechClient, TextClient, Voice};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use story_core::{
    AssembledStory, Feed, FeedFilter, FeedQuery, FileMediaStore, JsonStore, Narrator,
    PipelineConfig, SegmentId, StoryId, StoryPipeline, StoryReader, UserId,
};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "story")]
#[command(about = "Generate, read and share branching stories set in real places")]
#[command(version)]
struct Cli {
    /// Directory holding stories, votes and audio
    #[arg(long, env = "STORY_DATA_DIR", default_value = "stories")]
    data_dir: PathBuf,

    /// Acting user id (defaults to one remembered in the data directory)
    #[arg(long, env = "STORY_USER_ID")]
    user: Option<UserId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new story for a location
    Generate {
        location: String,

        /// Skip scene illustration
        #[arg(long)]
        no_images: bool,
    },
    /// Read a story interactively
    Read { story: StoryId },
    /// List public stories
    Feed {
        #[arg(long, default_value_t = FeedFilter::Popular)]
        filter: FeedFilter,

        #[arg(long, default_value_t = story_core::feed::DEFAULT_PAGE_SIZE)]
        limit: usize,
    },
    /// Toggle your upvote on a story
    Upvote { story: StoryId },
    /// Narrate one segment of a story to an audio file
    Narrate {
        story: StoryId,

        #[arg(long, default_value_t = 1)]
        segment: u32,

        #[arg(long, default_value_t = Voice::Alice)]
        voice: Voice,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(
        JsonStore::open(&cli.data_dir)
            .await
            .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?,
    );
    let user = match cli.user {
        Some(user) => user,
        None => remembered_user(&cli.data_dir).await?,
    };

    match cli.command {
        Command::Generate {
            location,
            no_images,
        } => {
            let config = PipelineConfig::from_env()?.with_images(!no_images);
            let text = TextClient::from_env().context("text generation is not configured")?;
            let mut pipeline = StoryPipeline::new(Arc::new(text), store, config);
            if !no_images {
                match ImageClient::from_env() {
                    Ok(images) => pipeline = pipeline.with_images(Arc::new(images)),
                    Err(e) => tracing::warn!(error = %e, "image generation unavailable"),
                }
            }

            let cancel = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let story = pipeline.generate_until(&location, user, cancel).await?;
            print_story(&story);
        }
        Command::Read { story } => {
            let reader = StoryReader::open(store, story, user).await?;
            session::run(reader).await?;
        }
        Command::Feed { filter, limit } => {
            let cards = Feed::new(store)
                .list(&FeedQuery::new(filter).with_limit(limit))
                .await?;
            if cards.is_empty() {
                println!("No stories yet.");
            }
            for card in cards {
                let marker = if card.degraded { " (fallback)" } else { "" };
                println!("[{}] {}{} - {}", card.upvotes, card.title, marker, card.location);
                println!("    {}", card.id);
                println!("    {}", card.preview);
            }
        }
        Command::Upvote { story } => {
            let outcome = Feed::new(store).toggle_upvote(user, story).await?;
            let verb = if outcome.voted { "Upvoted" } else { "Removed upvote from" };
            println!("{verb} {story} ({} upvotes)", outcome.upvotes);
        }
        Command::Narrate {
            story,
            segment,
            voice,
        } => {
            let speech = SpeechClient::from_env().context("speech synthesis is not configured")?;
            let media = FileMediaStore::open(cli.data_dir.join("audio")).await?;
            let narrator = Narrator::new(Arc::new(speech), Arc::new(media), store);
            let audio = narrator.narrate(story, SegmentId(segment), voice).await?;
            println!("Narrated segment {} as {}: {}", segment, voice, audio.audio_url);
        }
    }

    Ok(())
}

fn print_story(story: &AssembledStory) {
    let record = &story.record;
    println!("=== {} ===", record.title);
    println!("Location: {}", record.location);
    println!("Story id: {}", record.id);
    if record.origin().is_fallback() {
        println!("(The storyteller was unavailable; this is a {} story.)", record.origin());
    }
    println!();
    for segment in record.content.segments() {
        println!("{}", segment.text);
        for choice in &segment.choices {
            println!("  {}. {}", choice.id, choice.text);
        }
        println!();
    }
    for warning in &story.warnings {
        println!("[WARNING] {warning}");
    }
}

/// Load the user id kept in the data directory, creating one on first use.
async fn remembered_user(data_dir: &Path) -> Result<UserId> {
    let path = data_dir.join("user_id");
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents
            .trim()
            .parse()
            .with_context(|| format!("invalid user id in {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let user = UserId::new();
            tokio::fs::write(&path, user.to_string()).await?;
            tracing::info!(%user, "created local user id");
            Ok(user)
        }
        Err(e) => Err(e.into()),
    }
}
