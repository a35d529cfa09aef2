mod ollama;
mod openai;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// Request to a provider
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Instructions sent ahead of the prompt
    pub system: String,
    /// The prompt text
    pub prompt: String,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    /// Timeout for the request
    pub timeout: Duration,
    /// Ask the provider to answer with a JSON object
    pub json: bool,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about the LLM response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "openai", "ollama")
    pub provider: String,
    /// Model name used
    pub model: String,
    /// Tokens consumed (if available)
    pub tokens_used: Option<u32>,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Manager for multiple LLM providers
pub struct LlmManager {
    pub providers: Vec<Box<dyn LlmProvider>>,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl LlmManager {
    /// Create a new LLM manager with the given providers
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            providers,
            timeout: defaults.default_timeout,
            max_tokens: defaults.default_max_tokens,
        }
    }

    /// Ask providers in order; the first success wins
    pub async fn generate_first(
        &self,
        request: GenerateRequest,
    ) -> LlmResult<(String, GenerateResponse)> {
        let mut last_error = None;

        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(response) => {
                    tracing::debug!(
                        "Provider {} ({}) answered in {}ms",
                        provider.name(),
                        response.metadata.model,
                        response.metadata.latency_ms
                    );
                    return Ok((provider.name().to_string(), response));
                }
                Err(e) => {
                    tracing::error!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::ConfigError("No LLM providers configured".to_string())))
    }

    /// Did `player` play for both clubs? With identical clubs, did they play only there?
    pub async fn verify_crossover(&self, team_a: &str, team_b: &str, player: &str) -> LlmResult<bool> {
        let prompt = if team_a.eq_ignore_ascii_case(team_b) {
            format!(
                "True or False: Did football player \"{}\" spend their whole senior career at {}?",
                player, team_a
            )
        } else {
            format!(
                "True or False: Did football player \"{}\" play for BOTH {} and {} in their senior career (Serie A context preferred)?",
                player, team_a, team_b
            )
        };

        let request = GenerateRequest {
            system: CROSSOVER_SYSTEM_PROMPT.to_string(),
            prompt,
            max_tokens: Some(self.max_tokens),
            timeout: self.timeout,
            json: true,
        };

        let (provider, response) = self.generate_first(request).await?;
        let verdict = parse_verdict(&response.text)?;
        tracing::info!(
            "AI ({}) says {} for {} / {}: {}",
            provider,
            player,
            team_a,
            team_b,
            verdict
        );
        Ok(verdict)
    }
}

const CROSSOVER_SYSTEM_PROMPT: &str = "You are a football statistics checker. \
    Answer strictly with a JSON object of the form {\"isValid\": true} or {\"isValid\": false}. \
    No explanations.";

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(rename = "isValid")]
    is_valid: bool,
}

/// Read a yes/no answer out of a model reply. JSON first, then a bare word.
pub fn parse_verdict(text: &str) -> LlmResult<bool> {
    let trimmed = text.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<Verdict>(&trimmed[start..=end]) {
                return Ok(verdict.is_valid);
            }
        }
    }

    let word: String = trimmed
        .trim_start_matches('`')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    match word.as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(LlmError::ParseError(format!(
            "Unrecognized verdict: {}",
            trimmed.chars().take(80).collect::<String>()
        ))),
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Default timeout for LLM requests
    pub default_timeout: Duration,
    /// Default max tokens for responses
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: None,
            ollama_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(10),
            default_max_tokens: 50,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_model: non_empty_var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url: non_empty_var("OLLAMA_BASE_URL"),
            ollama_model: non_empty_var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            default_timeout: std::env::var("LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// Build an LlmManager with all configured providers
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        // Add OpenAI if API key is available
        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        // Add Ollama if base URL is available
        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "No LLM providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(LlmManager {
            providers,
            timeout: self.default_timeout,
            max_tokens: self.default_max_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::{Arc, Mutex};

    struct Scripted {
        name: &'static str,
        reply: Option<&'static str>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
            self.prompts.lock().unwrap().push(request.prompt);
            match self.reply {
                Some(text) => Ok(GenerateResponse {
                    text: text.to_string(),
                    metadata: ResponseMetadata {
                        provider: self.name.to_string(),
                        model: "scripted".to_string(),
                        tokens_used: None,
                        latency_ms: 1,
                    },
                }),
                None => Err(LlmError::ApiError("offline".to_string())),
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.ollama_model, "llama3.2");
        assert!(config.build_manager().is_err());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("OPENAI_API_KEY", "  sk-test ");
        std::env::set_var("LLM_TIMEOUT", "3");
        std::env::remove_var("OLLAMA_BASE_URL");

        let config = LlmConfig::from_env();
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.default_timeout, Duration::from_secs(3));
        assert!(config.ollama_base_url.is_none());
        assert_eq!(config.build_manager().unwrap().providers.len(), 1);

        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("LLM_TIMEOUT");
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict(r#"{"isValid": true}"#).unwrap());
        assert!(!parse_verdict("```json\n{\"isValid\": false}\n```").unwrap());
        assert!(parse_verdict("True.").unwrap());
        assert!(!parse_verdict("no").unwrap());
        assert!(parse_verdict("I am not sure").is_err());
    }

    #[tokio::test]
    async fn test_manager_falls_through_failing_provider() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let manager = LlmManager::new(vec![
            Box::new(Scripted {
                name: "down",
                reply: None,
                prompts: prompts.clone(),
            }),
            Box::new(Scripted {
                name: "up",
                reply: Some(r#"{"isValid": true}"#),
                prompts: prompts.clone(),
            }),
        ]);

        assert!(manager
            .verify_crossover("Juventus", "Bologna", "Roberto Baggio")
            .await
            .unwrap());

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("BOTH Juventus and Bologna"));
    }

    #[tokio::test]
    async fn test_same_team_asks_about_one_club_career() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let manager = LlmManager::new(vec![Box::new(Scripted {
            name: "up",
            reply: Some("false"),
            prompts: prompts.clone(),
        })]);

        assert!(!manager
            .verify_crossover("Roma", "roma", "Francesco Totti")
            .await
            .unwrap());
        assert!(prompts.lock().unwrap()[0].contains("whole senior career at Roma"));
    }

    #[tokio::test]
    async fn test_manager_without_providers_errors() {
        let manager = LlmManager::new(Vec::new());
        assert!(matches!(
            manager.verify_crossover("Inter", "Milan", "Ronaldo").await,
            Err(LlmError::ConfigError(_))
        ));
    }
}
