use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text-generation backend used by persona executors.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` under an optional system prompt.
    ///
    /// `temperature` overrides the client default when set.
    async fn generate(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        temperature: Option<f32>,
    ) -> CadenceResult<String>;
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL without the `/v1/...` suffix.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Bearer token. Left empty for local servers that need none.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// Chat-completions client for OpenAI, Ollama, vLLM and other compatible servers.
pub struct OpenAiCompatClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Client for the endpoint in `config`.
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn build_messages(system_prompt: Option<&str>, prompt: &str) -> Vec<Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));
        messages
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        temperature: Option<f32>,
    ) -> CadenceResult<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": temperature.unwrap_or(self.config.temperature),
            "messages": Self::build_messages(system_prompt, prompt),
        });

        let mut request = self.http.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| CadenceError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CadenceError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(CadenceError::Http(format!(
                "LLM API error {status}: {text}"
            )));
        }

        let parsed: Value = serde_json::from_str(&text)?;
        parse_completion(&parsed)
    }
}

/// Extract the first choice's message content.
fn parse_completion(body: &Value) -> CadenceResult<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CadenceError::Http(format!("Malformed completion response: {body}")))
}
