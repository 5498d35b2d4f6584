//! Scene illustration generation.

use crate::{bearer_headers, ensure_success, read_api_key, ClientConfig, Error};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.openai.com/v1";
const API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_MODEL: &str = "dall-e-3";

/// Image shown when generation is unavailable or fails.
pub const FALLBACK_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=400&h=300&fit=crop&q=80";

/// Image generation client.
#[derive(Clone)]
pub struct ImageClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ImageClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_config(api_key, &ClientConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: &ClientConfig) -> Result<Self, Error> {
        Ok(Self {
            client: config.build_http()?,
            api_key: api_key.into(),
            base_url: config.base_url_or(API_BASE),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the OPENAI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(read_api_key(API_KEY_VAR)?)
    }

    pub fn from_env_with_config(config: &ClientConfig) -> Result<Self, Error> {
        Self::with_config(read_api_key(API_KEY_VAR)?, config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Generate one image and return its URL.
    ///
    /// Callers that must always show something should substitute
    /// [`FALLBACK_IMAGE_URL`] on error.
    pub async fn generate(&self, request: ImageRequest) -> Result<GeneratedImage, Error> {
        if request.prompt.trim().is_empty() {
            return Err(Error::Config("Image prompt is required".to_string()));
        }

        let api_request = ApiRequest {
            model: self.model.clone(),
            prompt: enhance_prompt(&request.prompt, request.location.as_deref()),
            n: 1,
            size: request.size.clone(),
            quality: "standard",
        };

        tracing::debug!(prompt = %api_request.prompt, "requesting image");

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .headers(bearer_headers(&self.api_key)?)
            .json(&api_request)
            .send()
            .await?;

        let api_response: ApiResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .data
            .into_iter()
            .find_map(|d| {
                d.url.map(|url| GeneratedImage {
                    url,
                    revised_prompt: d.revised_prompt,
                })
            })
            .ok_or(Error::EmptyResponse)
    }
}

/// Wrap a scene description with location context and style guidance.
pub fn enhance_prompt(prompt: &str, location: Option<&str>) -> String {
    let place = location
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or("a mystical place");
    format!(
        "A beautiful, atmospheric scene for a story set in {place}. {}. \
         Fantasy art style, detailed, cinematic lighting, high quality.",
        prompt.trim().trim_end_matches('.')
    )
}

/// An image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub location: Option<String>,
    pub size: String,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            location: None,
            size: "1024x1024".to_string(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }
}

/// A generated image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    n: u8,
    size: String,
    quality: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}
