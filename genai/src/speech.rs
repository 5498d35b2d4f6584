//! Narration speech synthesis.

use crate::{ensure_success, read_api_key, ClientConfig, Error};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const API_BASE: &str = "https://api.elevenlabs.io/v1";
const API_KEY_VAR: &str = "ELEVENLABS_API_KEY";
const DEFAULT_MODEL: &str = "eleven_monolingual_v1";

/// Narrator voices offered to readers.
///
/// Each friendly name maps to one provider voice id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alice,
    Brian,
    Charlie,
    Dorothy,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Alice, Voice::Brian, Voice::Charlie, Voice::Dorothy];

    /// The provider's voice id.
    pub fn provider_id(&self) -> &'static str {
        match self {
            Voice::Alice => "Xb7hH8MSUJpSbSDYk0k2",
            Voice::Brian => "nPczCjzI2devNBz1zQrb",
            Voice::Charlie => "IKne3meq5aSn9XLyUdCD",
            Voice::Dorothy => "ThT5KcBeYPX3keUQqHPh",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Voice::Alice => "Alice",
            Voice::Brian => "Brian",
            Voice::Charlie => "Charlie",
            Voice::Dorothy => "Dorothy",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Voice::Alice => "Warm and friendly",
            Voice::Brian => "Deep and authoritative",
            Voice::Charlie => "Youthful and energetic",
            Voice::Dorothy => "Wise and maternal",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a voice name is not one of [`Voice::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown voice '{0}' (expected alice, brian, charlie or dorothy)")]
pub struct ParseVoiceError(pub String);

impl FromStr for Voice {
    type Err = ParseVoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseVoiceError(s.to_string()))
    }
}

/// Text-to-speech client.
#[derive(Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl SpeechClient {
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

    /// Create a client from the ELEVENLABS_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(read_api_key(API_KEY_VAR)?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Synthesize narration and return the raw MPEG audio bytes.
    pub async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>, Error> {
        if text.trim().is_empty() {
            return Err(Error::Config("Narration text is required".to_string()));
        }

        let body = ApiRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        tracing::debug!(voice = %voice, chars = text.len(), "requesting narration");

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}",
                self.base_url,
                voice.provider_id()
            ))
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await?;

        let bytes = ensure_success(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(bytes.to_vec())
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("audio/mpeg"));
        headers.insert(
            "xi-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}
