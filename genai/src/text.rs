//! Chat-completion text generation.

use crate::{bearer_headers, ensure_success, read_api_key, ClientConfig, Error};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.openai.com/v1";
const API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Text completion client.
#[derive(Clone)]
pub struct TextClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl TextClient {
    /// Create a new client with the given API key and default HTTP settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_config(api_key, &ClientConfig::default())
    }

    /// Create a new client with explicit HTTP settings.
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

    /// Create a client from the environment with explicit HTTP settings.
    pub fn from_env_with_config(config: &ClientConfig) -> Result<Self, Error> {
        Self::with_config(read_api_key(API_KEY_VAR)?, config)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the first choice's text.
    pub async fn complete(&self, request: CompletionRequest) -> Result<Completion, Error> {
        let api_request = self.build_api_request(&request);
        let headers = bearer_headers(&self.api_key)?;

        tracing::debug!(model = %api_request.model, "requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await?;

        let api_response: ApiResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_response(api_response)
    }

    fn build_api_request(&self, request: &CompletionRequest) -> ApiRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

fn parse_response(api_response: ApiResponse) -> Result<Completion, Error> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or(Error::EmptyResponse)?;

    let text = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(Error::EmptyResponse)?;

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    let usage = api_response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion {
        model: api_response.model,
        text,
        finish_reason,
        usage,
    })
}

// ============================================================================
// Public types
// ============================================================================

/// A single-prompt completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: usize,
}

impl CompletionRequest {
    /// Create a new request for the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            prompt: prompt.into(),
            temperature: Some(0.8),
            max_tokens: 2000,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text completion. The text is opaque; no structure is promised.
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: String,
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}
