//! Pipeline configuration.

use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be a {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Configuration for [`crate::StoryPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Text model override (the client default is used otherwise).
    pub text_model: Option<String>,

    /// Sampling temperature for story text.
    pub temperature: f32,

    /// Maximum tokens for story text.
    pub max_tokens: usize,

    /// Upper bound on one text generation attempt.
    pub generation_timeout: Duration,

    /// Total attempts at text generation, including the first.
    pub max_attempts: usize,

    /// First retry delay; doubles per attempt.
    pub retry_base_delay: Duration,

    /// Cap on a single retry delay.
    pub retry_max_delay: Duration,

    /// Stories per user per rolling day. `None` disables the limit.
    pub daily_limit: Option<u32>,

    /// Request one generated image per segment of fresh stories.
    pub generate_images: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_model: None,
            temperature: 0.8,
            max_tokens: 2000,
            generation_timeout: Duration::from_secs(45),
            max_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(5),
            daily_limit: Some(5),
            generate_images: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STORY_TEXT_MODEL`, `STORY_TIMEOUT_SECS`,
    /// `STORY_MAX_ATTEMPTS` and `STORY_DAILY_LIMIT` (0 disables the limit).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(model) = lookup("STORY_TEXT_MODEL").filter(|m| !m.trim().is_empty()) {
            config.text_model = Some(model.trim().to_string());
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "STORY_TIMEOUT_SECS")? {
            config.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<usize>(&lookup, "STORY_MAX_ATTEMPTS")? {
            config.max_attempts = attempts.max(1);
        }
        if let Some(limit) = parse_var::<u32>(&lookup, "STORY_DAILY_LIMIT")? {
            config.daily_limit = (limit > 0).then_some(limit);
        }

        Ok(config)
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Set total attempts (at least one is always made).
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_daily_limit(mut self, limit: Option<u32>) -> Self {
        self.daily_limit = limit;
        self
    }

    pub fn with_images(mut self, enabled: bool) -> Self {
        self.generate_images = enabled;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected: "non-negative integer",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.generation_timeout, Duration::from_secs(45));
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.daily_limit, Some(5));
        assert_eq!(config.max_tokens, 2000);
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("STORY_TEXT_MODEL", "gpt-4o"),
            ("STORY_TIMEOUT_SECS", "10"),
            ("STORY_MAX_ATTEMPTS", "0"),
            ("STORY_DAILY_LIMIT", "0"),
        ]))
        .unwrap();

        assert_eq!(config.text_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.generation_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.daily_limit, None);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = PipelineConfig::from_lookup(lookup(&[("STORY_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("STORY_TIMEOUT_SECS"));
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::new()
            .with_text_model("m")
            .with_max_attempts(3)
            .with_daily_limit(None)
            .with_images(false);
        assert_eq!(config.max_attempts, 3);
        assert!(!config.generate_images);
    }
}
