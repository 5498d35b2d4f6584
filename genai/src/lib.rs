//! Minimal generative AI HTTP clients.
//!
//! This crate provides focused clients for the three remote services a
//! story needs:
//! - [`TextClient`] for chat completions
//! - [`ImageClient`] for scene illustrations
//! - [`SpeechClient`] for narration audio
//!
//! Every client carries an explicit request timeout so a hung provider
//! surfaces as [`Error::Timeout`] instead of stalling the caller.

mod image;
mod speech;
mod text;

pub use image::{enhance_prompt, GeneratedImage, ImageClient, ImageRequest, FALLBACK_IMAGE_URL};
pub use speech::{ParseVoiceError, SpeechClient, Voice};
pub use text::{Completion, CompletionRequest, FinishReason, TextClient, Usage};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when calling a generation provider.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("API key not configured (set {0})")]
    NoApiKey(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,
}

impl Error {
    /// Whether a second attempt could plausibly succeed.
    ///
    /// Network failures, timeouts, rate limiting (429) and server errors
    /// (5xx) are transient; authentication, quota and malformed requests
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_decode() {
            Error::Parse(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// HTTP settings shared by every client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Override for the provider's API base URL (proxies, test servers).
    pub base_url: Option<String>,

    /// Upper bound on a whole request, including reading the body.
    pub timeout: Duration,

    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn build_http(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
    }

    fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

fn read_api_key(var: &'static str) -> Result<String, Error> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(Error::NoApiKey(var)),
    }
}

fn bearer_headers(api_key: &str) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
    );
    Ok(headers)
}

/// Turn a non-success response into [`Error::Api`], passing successes through.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    tracing::debug!(status, body = %message, "provider returned an error status");
    Err(Error::Api { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(Error::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());

        assert!(!Error::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!Error::Api {
            status: 402,
            message: "quota".into()
        }
        .is_retryable());
        assert!(!Error::Parse("nope".into()).is_retryable());
        assert!(!Error::NoApiKey("OPENAI_API_KEY").is_retryable());
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let config = ClientConfig::default().with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            config.base_url_or("https://api.openai.com/v1"),
            "http://localhost:8080/v1"
        );

        let config = ClientConfig::default();
        assert_eq!(
            config.base_url_or("https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn test_bearer_headers() {
        let headers = bearer_headers("sk-test").unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-test");
        assert_eq!(headers["content-type"], "application/json");

        assert!(matches!(bearer_headers("bad\nkey"), Err(Error::Config(_))));
    }
}
