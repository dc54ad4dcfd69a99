//! HTTP text-generation provider.
//!
//! Speaks the chat-completions wire shape against a configurable endpoint.
//! Server errors and rate limiting surface as transient failures so the
//! coordinator's retry policy applies; every other rejection is permanent.

use async_trait::async_trait;
use serde_json::json;

use super::traits::{GenerateError, TextGenerator};

/// Text generator backed by an OpenAI-style chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    /// Create a generator for the given endpoint and model.
    ///
    /// # Arguments
    /// * `endpoint` - Full URL of the chat-completions endpoint.
    /// * `model` - Model name sent with each request.
    /// * `api_key` - Optional bearer token.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    /// Model name sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerateError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GenerateError::Transient(format!(
                "provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(GenerateError::Permanent(format!(
                "provider returned {}",
                status
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Transient(format!("invalid response body: {}", e)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                GenerateError::Permanent("completion payload missing message content".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_carries_model() {
        let provider = HttpTextGenerator::new(
            "http://127.0.0.1:9999/v1/chat/completions",
            "gemini-2.5-flash",
            None,
        );
        assert_eq!(provider.model(), "gemini-2.5-flash");
    }
}
