//! Seams over the generative services.
//!
//! The pipeline only sees these traits, so tests swap in the doubles from
//! [`crate::testing`] and the binary plugs in the `genai` clients.

use async_trait::async_trait;
use genai::{
    Completion, CompletionRequest, GeneratedImage, ImageClient, ImageRequest, SpeechClient,
    TextClient, Voice,
};

/// Produces a free-text completion for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, genai::Error>;
}

/// Produces an image URL for a scene description.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, genai::Error>;
}

/// Turns narration text into audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, genai::Error>;
}

#[async_trait]
impl TextGenerator for TextClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, genai::Error> {
        TextClient::complete(self, request).await
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, genai::Error> {
        ImageClient::generate(self, request).await
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, genai::Error> {
        SpeechClient::synthesize(self, text, voice).await
    }
}
