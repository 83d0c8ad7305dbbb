//! `VisionModelClient` and `LanguageModelClient` — the AI RPCs Parse and
//! Categorize treat as black-box subroutines: request `(apiKey, modelId,
//! payload, systemPrompt, responseSchema)`, response UTF-8 JSON matching the
//! schema, HTTP 429, HTTP 5xx, or a parse error. The 429/backoff split itself
//! is `pipeline_core::rate_limit::{ai_rate_limit_backoff, ai_transient_backoff}`,
//! which the stage processors' retry loops call directly rather than through
//! this trait.

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// HTTP 429 — the caller's retry loop backs off per
    /// `rate_limit::ai_rate_limit_backoff`.
    #[error("rate limited")]
    RateLimited,
    /// HTTP 5xx, a network error, or a malformed JSON body — the caller's
    /// retry loop backs off per `rate_limit::ai_transient_backoff`.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Credential missing/rejected, or the service is fundamentally
    /// unreachable — not worth retrying.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait VisionModelClient: Send + Sync {
    /// One vision call: extract a single question from `image_bytes`
    /// (`image/png` or `image/jpeg`) using a fixed system instruction and
    /// response shape.
    async fn extract_question(
        &self,
        credential: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<Value, AiError>;
}

#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    /// One language call: classify `prompt` (question text + correct answer)
    /// against `category_names`, constrained to `subcategories_by_category`
    /// for the category the model picks.
    async fn categorize_question(
        &self,
        credential: &str,
        prompt: &str,
        category_names: &[String],
    ) -> Result<Value, AiError>;
}

const VISION_SYSTEM_PROMPT: &str = "You are transcribing one exam question from an image. \
Return JSON with exactly these fields: question_number (string), points (integer), \
question_text (string; use a markdown table with blank answer cells for tabular content), \
question_type (one of \"multiple_choice\", \"fill_in\", \"matching\", \"open\"), \
correct_answer (string; markdown table with filled cells for tabular answers), \
options (array of strings, empty if not multiple choice).";

fn categorize_system_prompt(category_names: &[String]) -> String {
    let numbered = category_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}. {}", i + 1, name))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are categorizing one exam question into exactly one of the following categories:\n\
        {numbered}\n\n\
        Return JSON with fields: category (must be one of the category names above), \
        subcategory (string or null), reasoning (a short string)."
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    contents: Vec<ContentPart<'a>>,
    response_mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    InlineImage { mime_type: &'a str, data: String },
}

/// One HTTP-backed client implementing both AI collaborator traits — the
/// same JSON-schema-constrained generation endpoint serves vision and text
/// prompts alike, distinguished only by which `ContentPart` variant is sent.
pub struct HttpAiClient {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl HttpAiClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build AI http client"),
        }
    }

    async fn generate(&self, credential: &str, request: &GenerateRequest<'_>) -> Result<Value, AiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::Transient(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(AiError::RateLimited);
        }
        if response.status().is_server_error() {
            return Err(AiError::Transient(format!("HTTP {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(AiError::Fatal(format!("HTTP {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AiError::Transient(format!("invalid JSON response: {e}")))
    }
}

#[async_trait]
impl VisionModelClient for HttpAiClient {
    async fn extract_question(
        &self,
        credential: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<Value, AiError> {
        let data = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let request = GenerateRequest {
            model: &self.model,
            system_prompt: VISION_SYSTEM_PROMPT,
            contents: vec![ContentPart::InlineImage { mime_type, data }],
            response_mime_type: "application/json",
        };
        self.generate(credential, &request).await
    }
}

#[async_trait]
impl LanguageModelClient for HttpAiClient {
    async fn categorize_question(
        &self,
        credential: &str,
        prompt: &str,
        category_names: &[String],
    ) -> Result<Value, AiError> {
        let system_prompt = categorize_system_prompt(category_names);
        let request = GenerateRequest {
            model: &self.model,
            system_prompt: &system_prompt,
            contents: vec![ContentPart::Text { text: prompt }],
            response_mime_type: "application/json",
        };
        self.generate(credential, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_prompt_numbers_every_category() {
        let names = vec!["Anatomy".to_string(), "Physiology".to_string()];
        let prompt = categorize_system_prompt(&names);
        assert!(prompt.contains("1. Anatomy"));
        assert!(prompt.contains("2. Physiology"));
    }
}
